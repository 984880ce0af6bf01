use std::sync::Arc;

use crate::config::ServerConfig;
use crate::engine::chat_engine::ChatEngine;

/// Shared state handed to every HTTP and WebSocket handler.
pub struct AppState {
    pub engine: Arc<ChatEngine>,
    /// Cookie that carries the access token.
    pub cookie_name: String,
    /// Origin allowed by CORS.
    pub public_url: String,
}

impl AppState {
    pub fn new(engine: Arc<ChatEngine>, config: &ServerConfig) -> Self {
        Self {
            engine,
            cookie_name: config.auth.cookie_name.clone(),
            public_url: config.server.public_url.clone(),
        }
    }
}
