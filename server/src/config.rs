use serde::Deserialize;
use std::path::Path;
use std::time::Duration;
use tracing::info;

use crate::engine::room::RoomStatus;

/// Top-level server configuration, loaded from roomchat.toml.
#[derive(Deserialize, Default)]
#[serde(default)]
pub struct ServerConfig {
    pub server: ServerSection,
    pub database: DatabaseSection,
    pub auth: AuthSection,
    pub rooms: RoomsSection,
    pub limits: LimitsSection,
}

#[derive(Deserialize)]
#[serde(default)]
pub struct ServerSection {
    pub web_address: String,
    /// Origin allowed by CORS. Anything on localhost allows every origin.
    pub public_url: String,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            web_address: "0.0.0.0:8080".into(),
            public_url: "http://localhost:4200".into(),
        }
    }
}

#[derive(Deserialize)]
#[serde(default)]
pub struct DatabaseSection {
    pub url: String,
}

impl Default for DatabaseSection {
    fn default() -> Self {
        Self {
            url: "sqlite:roomchat.db?mode=rwc".into(),
        }
    }
}

#[derive(Deserialize)]
#[serde(default)]
pub struct AuthSection {
    pub jwt_secret: String,
    /// Cookie carrying the access token on the WebSocket handshake.
    pub cookie_name: String,
}

impl Default for AuthSection {
    fn default() -> Self {
        Self {
            jwt_secret: "roomchat-dev-secret-change-me".into(),
            cookie_name: "access_token".into(),
        }
    }
}

/// A room created on first start when the store is empty.
#[derive(Deserialize, Clone, Debug)]
pub struct SeedRoom {
    pub name: String,
    pub status: RoomStatus,
}

#[derive(Deserialize)]
#[serde(default)]
pub struct RoomsSection {
    pub mute_seconds: u64,
    /// Messages a user may send in a burst before the flood guard kicks in.
    pub message_burst: u32,
    /// Seconds to refill one message token.
    pub message_refill_seconds: f64,
    /// Messages retained in memory per room (the durable log keeps everything).
    pub history_limit: usize,
    pub auto_join_public: bool,
    pub seed_rooms: Vec<SeedRoom>,
}

impl Default for RoomsSection {
    fn default() -> Self {
        let seed = |name: &str, status| SeedRoom {
            name: name.into(),
            status,
        };
        Self {
            mute_seconds: 60,
            message_burst: 10,
            message_refill_seconds: 1.0,
            history_limit: 200,
            auto_join_public: true,
            seed_rooms: vec![
                seed("Global", RoomStatus::Public),
                seed("Help", RoomStatus::Public),
                seed("Private", RoomStatus::Private),
                seed("Protected", RoomStatus::Protected),
            ],
        }
    }
}

#[derive(Deserialize)]
#[serde(default)]
pub struct LimitsSection {
    /// Maximum queued outbound events per connection before events are dropped.
    pub outbound_queue: usize,
}

impl Default for LimitsSection {
    fn default() -> Self {
        Self {
            outbound_queue: 1024,
        }
    }
}

/// Engine-facing subset of the configuration.
#[derive(Clone, Debug)]
pub struct RoomSettings {
    pub mute_duration: Duration,
    pub message_burst: u32,
    pub message_refill_seconds: f64,
    pub history_limit: usize,
    pub auto_join_public: bool,
    pub outbound_queue: usize,
    pub seed_rooms: Vec<SeedRoom>,
}

impl Default for RoomSettings {
    fn default() -> Self {
        ServerConfig::default().room_settings()
    }
}

impl ServerConfig {
    /// Load config from a TOML file. Falls back to defaults if the file doesn't exist.
    /// Environment variables override TOML values.
    pub fn load(path: &str) -> Result<Self, String> {
        let mut config = if Path::new(path).exists() {
            let contents = std::fs::read_to_string(path)
                .map_err(|e| format!("failed to read config file {path}: {e}"))?;
            Self::parse(&contents).map_err(|e| format!("failed to parse config file {path}: {e}"))?
        } else {
            info!("No config file found at {}, using defaults", path);
            Self::default()
        };

        config.apply_env_overrides();
        Ok(config)
    }

    pub fn parse(contents: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(contents)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("WEB_ADDRESS") {
            self.server.web_address = v;
        }
        if let Ok(v) = std::env::var("PUBLIC_URL") {
            self.server.public_url = v;
        }
        if let Ok(v) = std::env::var("DATABASE_URL") {
            self.database.url = v;
        }
        if let Ok(v) = std::env::var("JWT_SECRET") {
            self.auth.jwt_secret = v;
        }
        if let Ok(v) = std::env::var("MUTE_SECONDS")
            && let Ok(secs) = v.parse()
        {
            self.rooms.mute_seconds = secs;
        }
        if let Ok(v) = std::env::var("MESSAGE_BURST")
            && let Ok(burst) = v.parse()
        {
            self.rooms.message_burst = burst;
        }
        if let Ok(v) = std::env::var("HISTORY_LIMIT")
            && let Ok(limit) = v.parse()
        {
            self.rooms.history_limit = limit;
        }
    }

    pub fn room_settings(&self) -> RoomSettings {
        RoomSettings {
            mute_duration: Duration::from_secs(self.rooms.mute_seconds),
            message_burst: self.rooms.message_burst,
            message_refill_seconds: self.rooms.message_refill_seconds,
            history_limit: self.rooms.history_limit,
            auto_join_public: self.rooms.auto_join_public,
            outbound_queue: self.limits.outbound_queue,
            seed_rooms: self.rooms.seed_rooms.clone(),
        }
    }
}
