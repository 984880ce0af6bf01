use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::room::RoomStatus;

/// Unique identifier for a message.
pub type MessageId = Uuid;

/// Unique identifier for a connected session (one per connection, not per user).
pub type SessionId = Uuid;

/// User identifier issued by the identity provider.
pub type UserId = i64;

/// Durable room identifier assigned by the room repository.
pub type RoomId = i64;

/// Sender id used for messages the server writes on its own behalf.
pub const SYSTEM_USER_ID: UserId = -1;

/// Owner of the rooms seeded on first start.
pub const SYSTEM_OWNER_ID: UserId = 0;

pub const SYSTEM_NICKNAME: &str = "system";

/// What a message carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    #[default]
    Chat,
    /// Game invitation; the text is an opaque key for the game subsystem.
    Game,
    /// Written by the server (joins, leaves, moderation notices).
    System,
}

impl MessageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Chat => "chat",
            Self::Game => "game",
            Self::System => "system",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "game" => Self::Game,
            "system" => Self::System,
            _ => Self::Chat,
        }
    }
}

/// One entry of a room's ordered log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomMessage {
    pub id: MessageId,
    pub room_id: RoomId,
    pub room_name: String,
    pub sender_id: UserId,
    pub sender_name: String,
    pub message: String,
    pub kind: MessageKind,
    pub created: DateTime<Utc>,
}

/// A mute that has not yet expired.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MuteInfo {
    pub user_id: UserId,
    pub until: DateTime<Utc>,
}

/// Client-facing view of a room. Only rooms with an allocated id have one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomSnapshot {
    pub id: RoomId,
    pub name: String,
    pub owner: UserId,
    pub admins: Vec<UserId>,
    pub banned: Vec<UserId>,
    pub muted: Vec<MuteInfo>,
    pub members: Vec<UserId>,
    pub status: RoomStatus,
    pub password_protected: bool,
}

impl RoomSnapshot {
    pub fn is_visible_to(&self, user_id: UserId) -> bool {
        self.status.is_discoverable() || self.members.contains(&user_id)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OnlineUser {
    pub user_id: UserId,
    pub nickname: String,
}

/// Event pushed to connections. Serialized as `{"event": <name>, "data": {...}}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(
    tag = "event",
    content = "data",
    rename_all = "camelCase",
    rename_all_fields = "camelCase"
)]
pub enum ChatEvent {
    /// A chat, game or system message appended to a room.
    Message(RoomMessage),

    /// A command failed. Only ever sent to the acting connection.
    #[serde(rename = "error_message")]
    ErrorMessage {
        msg: String,
        status_code: u8,
        #[serde(skip_serializing_if = "Option::is_none")]
        room: Option<String>,
    },

    /// Nicknames of a room's members, in join order.
    UserList { room: String, users: Vec<String> },

    /// Every room the receiving user can currently see, keyed by name.
    RoomSnapshotSet {
        rooms: BTreeMap<String, RoomSnapshot>,
    },

    /// A room the receiver is subscribed to changed.
    RoomUpdated { room: RoomSnapshot },

    /// A discoverable room appeared or changed.
    PublicRoomUpdated { room: RoomSnapshot },

    RoomDeleted { name: String },

    OnlineUsersChanged { users: Vec<OnlineUser> },

    /// Retained log of a room, sent to a connection when it subscribes.
    History {
        room: String,
        messages: Vec<RoomMessage>,
    },
}

/// Build the `{"event": ..., "data": ...}` frame for an event.
pub fn encode(event: &ChatEvent) -> Result<String, serde_json::Error> {
    serde_json::to_string(event)
}
