use std::sync::Mutex;

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;

use super::events::{ChatEvent, SessionId, UserId};

/// A verified user acting on the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Actor {
    pub user_id: UserId,
    pub nickname: String,
}

impl Actor {
    pub fn new(user_id: UserId, nickname: impl Into<String>) -> Self {
        Self {
            user_id,
            nickname: nickname.into(),
        }
    }
}

/// Session record for one live connection. Created only after the identity
/// verifier has accepted the connection's token.
#[derive(Debug)]
pub struct UserSession {
    pub id: SessionId,
    pub user_id: UserId,
    pub nickname: String,
    /// Send outbound events to this session's write loop (bounded to prevent memory exhaustion).
    pub outbound: mpsc::Sender<ChatEvent>,
    pub connected_at: DateTime<Utc>,
    last_room: Mutex<Option<String>>,
}

impl UserSession {
    pub fn new(
        id: SessionId,
        user_id: UserId,
        nickname: String,
        outbound: mpsc::Sender<ChatEvent>,
    ) -> Self {
        Self {
            id,
            user_id,
            nickname,
            outbound,
            connected_at: Utc::now(),
            last_room: Mutex::new(None),
        }
    }

    pub fn actor(&self) -> Actor {
        Actor::new(self.user_id, self.nickname.clone())
    }

    /// Send an event to this session. Returns false if the channel is closed
    /// or the outbound queue is full. Slow clients lose events rather than block senders.
    pub fn send(&self, event: ChatEvent) -> bool {
        self.outbound.try_send(event).is_ok()
    }

    /// Room this connection last spoke in or joined.
    pub fn last_room(&self) -> Option<String> {
        self.last_room
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn set_last_room(&self, room: &str) {
        *self.last_room.lock().unwrap_or_else(|e| e.into_inner()) = Some(room.to_string());
    }
}
