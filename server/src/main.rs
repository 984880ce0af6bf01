use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use roomchat_server::auth::token::JwtVerifier;
use roomchat_server::config::ServerConfig;
use roomchat_server::db::pool::{create_pool, run_migrations};
use roomchat_server::db::store::SqliteStore;
use roomchat_server::engine::chat_engine::{ChatEngine, Collaborators};
use roomchat_server::engine::clock::SystemClock;
use roomchat_server::web::app_state::AppState;
use roomchat_server::web::rate_limit::ApiRateLimiters;
use roomchat_server::web::router::build_router;

/// Flood-limit buckets idle this long are dropped.
const RATE_LIMIT_IDLE: Duration = Duration::from_secs(600);

#[derive(Parser, Debug)]
#[command(name = "roomchat-server")]
#[command(about = "Room-based real-time chat server")]
#[command(version)]
struct Args {
    /// Path to the TOML configuration file
    #[arg(short, long, default_value = "roomchat.toml")]
    config: String,
}

#[tokio::main]
async fn main() {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let config = ServerConfig::load(&args.config).expect("failed to load configuration");

    // Initialize database
    let pool = create_pool(&config.database.url)
        .await
        .expect("failed to connect to database");

    run_migrations(&pool)
        .await
        .expect("failed to run database migrations");

    let store = Arc::new(SqliteStore::new(pool));
    store
        .reset_presence()
        .await
        .expect("failed to reset presence flags");

    let collaborators = Collaborators {
        identity: Arc::new(JwtVerifier::new(config.auth.jwt_secret.clone())),
        directory: store.clone(),
        rooms: store.clone(),
        relationships: store,
    };
    let engine = Arc::new(ChatEngine::new(
        collaborators,
        config.room_settings(),
        Arc::new(SystemClock),
    ));

    // Load persisted rooms into memory before accepting connections
    let loaded = engine
        .load_rooms_from_db()
        .await
        .expect("failed to load rooms from database");
    info!(rooms = loaded, "rooms loaded");

    let rate_limiters = Arc::new(ApiRateLimiters::default());

    let sweeper_engine = engine.clone();
    let sweeper_limiters = rate_limiters.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(60));
        loop {
            interval.tick().await;
            sweeper_engine.cleanup_rate_limits(RATE_LIMIT_IDLE);
            sweeper_limiters.cleanup(RATE_LIMIT_IDLE);
        }
    });

    let app_state = Arc::new(AppState::new(engine, &config));
    let app = build_router(app_state, rate_limiters);

    info!("Roomchat server starting on {}", config.server.web_address);

    let listener = tokio::net::TcpListener::bind(&config.server.web_address)
        .await
        .expect("failed to bind web listener");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await
    .expect("server error");
}
