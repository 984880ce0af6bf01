//! Seams to the systems this engine consumes but does not own: identity
//! verification, the user directory, durable room storage and the block list.

use std::collections::HashSet;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use super::events::{RoomId, RoomMessage, UserId};
use super::room::RoomStatus;

#[derive(Debug, Error)]
pub enum RepositoryError {
    /// A unique constraint rejected the write (e.g. a room name already stored).
    #[error("conflicting record")]
    Conflict,
    #[error("not authorized: {0}")]
    Unauthorized(String),
    #[error("backing store unavailable: {0}")]
    Unavailable(String),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("corrupt record: {0}")]
    Corrupt(String),
}

/// What the repository needs to allocate a durable id.
#[derive(Debug, Clone)]
pub struct RoomDraft {
    pub name: String,
    pub owner: UserId,
    pub status: RoomStatus,
    pub password_hash: Option<String>,
}

/// Full durable state of a room.
#[derive(Debug, Clone, PartialEq)]
pub struct RoomRecord {
    pub id: RoomId,
    pub name: String,
    pub owner: UserId,
    pub admins: Vec<UserId>,
    pub banned: Vec<UserId>,
    pub muted: Vec<(UserId, DateTime<Utc>)>,
    pub members: Vec<UserId>,
    pub status: RoomStatus,
    pub password_hash: Option<String>,
}

/// Resolves a transport token to a user id.
#[async_trait]
pub trait IdentityVerifier: Send + Sync {
    async fn verify(&self, token: &str) -> Result<UserId, RepositoryError>;
}

#[async_trait]
pub trait UserDirectory: Send + Sync {
    async fn nickname(&self, user_id: UserId) -> Result<Option<String>, RepositoryError>;
    async fn find_by_nickname(&self, nickname: &str) -> Result<Option<UserId>, RepositoryError>;
    async fn set_online(&self, user_id: UserId, online: bool) -> Result<(), RepositoryError>;
}

#[async_trait]
pub trait RoomRepository: Send + Sync {
    /// Reserve a durable id. Must fail with `Conflict` if the name is stored already.
    async fn allocate_room(&self, draft: &RoomDraft) -> Result<RoomId, RepositoryError>;
    async fn save_room(&self, record: &RoomRecord) -> Result<(), RepositoryError>;
    async fn delete_room(&self, room_id: RoomId) -> Result<(), RepositoryError>;
    /// Drop a stored room that is no longer live, looked up by name.
    async fn delete_room_by_name(&self, name: &str) -> Result<(), RepositoryError>;
    async fn append_message(&self, message: &RoomMessage) -> Result<(), RepositoryError>;
    async fn load_rooms(&self) -> Result<Vec<RoomRecord>, RepositoryError>;
    /// The newest `limit` messages of a room, oldest first.
    async fn load_messages(
        &self,
        room_id: RoomId,
        limit: usize,
    ) -> Result<Vec<RoomMessage>, RepositoryError>;
}

/// Block list lookups used before fan-out.
#[async_trait]
pub trait RelationshipFilter: Send + Sync {
    /// Users who have blocked `sender`.
    async fn blocked_by(&self, sender: UserId) -> Result<HashSet<UserId>, RepositoryError>;
    async fn block(&self, sender: UserId, target: UserId) -> Result<(), RepositoryError>;
    async fn unblock(&self, sender: UserId, target: UserId) -> Result<(), RepositoryError>;
}
