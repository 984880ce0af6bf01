use std::collections::HashSet;

use async_trait::async_trait;
use chrono::SecondsFormat;
use sqlx::SqlitePool;
use tracing::{debug, info};

use super::models::{encode_ids, encode_mutes};
use super::queries;
use crate::engine::collaborators::{
    RelationshipFilter, RepositoryError, RoomDraft, RoomRecord, RoomRepository, UserDirectory,
};
use crate::engine::events::{RoomId, RoomMessage, UserId};

/// SQLite-backed user directory, room repository and block list.
#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Mirror an account from the identity service into the local directory.
    ///
    /// The server never creates accounts on its own: `authenticate` rejects any
    /// verified token whose user has no row here, so whatever provisions accounts
    /// (the service issuing the JWTs, or an admin task) must call this first.
    pub async fn register_user(&self, id: UserId, nickname: &str) -> Result<(), RepositoryError> {
        queries::users::upsert_user(&self.pool, id, nickname).await?;
        Ok(())
    }

    /// Clear stale online flags left behind by a previous process.
    pub async fn reset_presence(&self) -> Result<(), RepositoryError> {
        let cleared = queries::users::reset_online(&self.pool).await?;
        if cleared > 0 {
            info!(count = cleared, "cleared stale online flags");
        }
        Ok(())
    }
}

fn map_write_error(err: sqlx::Error) -> RepositoryError {
    match &err {
        sqlx::Error::Database(db_err) if db_err.is_unique_violation() => RepositoryError::Conflict,
        _ => RepositoryError::Database(err),
    }
}

#[async_trait]
impl UserDirectory for SqliteStore {
    async fn nickname(&self, user_id: UserId) -> Result<Option<String>, RepositoryError> {
        let row = queries::users::get_user(&self.pool, user_id).await?;
        Ok(row.map(|r| r.nickname))
    }

    async fn find_by_nickname(&self, nickname: &str) -> Result<Option<UserId>, RepositoryError> {
        Ok(queries::users::find_by_nickname(&self.pool, nickname).await?)
    }

    async fn set_online(&self, user_id: UserId, online: bool) -> Result<(), RepositoryError> {
        queries::users::set_online(&self.pool, user_id, online).await?;
        Ok(())
    }
}

#[async_trait]
impl RoomRepository for SqliteStore {
    async fn allocate_room(&self, draft: &RoomDraft) -> Result<RoomId, RepositoryError> {
        let owner = [draft.owner];
        let id = queries::rooms::insert_room(
            &self.pool,
            &draft.name,
            draft.owner,
            draft.status.as_str(),
            draft.password_hash.as_deref(),
            &encode_ids(&owner),
            &encode_ids(&owner),
        )
        .await
        .map_err(map_write_error)?;
        debug!(room = %draft.name, room_id = id, "room id allocated");
        Ok(id)
    }

    async fn save_room(&self, record: &RoomRecord) -> Result<(), RepositoryError> {
        let admins = encode_ids(&record.admins);
        let banned = encode_ids(&record.banned);
        let members = encode_ids(&record.members);
        let muted = encode_mutes(&record.muted);
        let touched = queries::rooms::update_room(
            &self.pool,
            &queries::rooms::UpdateRoom {
                id: record.id,
                name: &record.name,
                owner_id: record.owner,
                status: record.status.as_str(),
                password_hash: record.password_hash.as_deref(),
                admins: &admins,
                banned: &banned,
                muted: &muted,
                members: &members,
            },
        )
        .await
        .map_err(map_write_error)?;
        if touched == 0 {
            debug!(room_id = record.id, "save skipped, room no longer stored");
        }
        Ok(())
    }

    async fn delete_room(&self, room_id: RoomId) -> Result<(), RepositoryError> {
        queries::rooms::delete_room(&self.pool, room_id).await?;
        Ok(())
    }

    async fn delete_room_by_name(&self, name: &str) -> Result<(), RepositoryError> {
        let removed = queries::rooms::delete_room_by_name(&self.pool, name).await?;
        debug!(room = %name, removed, "stale stored room dropped");
        Ok(())
    }

    async fn append_message(&self, message: &RoomMessage) -> Result<(), RepositoryError> {
        let id = message.id.to_string();
        let created_at = message.created.to_rfc3339_opts(SecondsFormat::Micros, true);
        queries::messages::insert_message(
            &self.pool,
            &queries::messages::InsertMessage {
                id: &id,
                room_id: message.room_id,
                sender_id: message.sender_id,
                sender_nick: &message.sender_name,
                content: &message.message,
                kind: message.kind.as_str(),
                created_at: &created_at,
            },
        )
        .await?;
        Ok(())
    }

    async fn load_rooms(&self) -> Result<Vec<RoomRecord>, RepositoryError> {
        queries::rooms::list_rooms(&self.pool)
            .await?
            .into_iter()
            .map(RoomRecord::try_from)
            .collect()
    }

    async fn load_messages(
        &self,
        room_id: RoomId,
        limit: usize,
    ) -> Result<Vec<RoomMessage>, RepositoryError> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        queries::messages::fetch_recent(&self.pool, room_id, limit)
            .await?
            .into_iter()
            .map(RoomMessage::try_from)
            .collect()
    }
}

#[async_trait]
impl RelationshipFilter for SqliteStore {
    async fn blocked_by(&self, sender: UserId) -> Result<HashSet<UserId>, RepositoryError> {
        let blockers = queries::blocks::list_blockers(&self.pool, sender).await?;
        Ok(blockers.into_iter().collect())
    }

    async fn block(&self, sender: UserId, target: UserId) -> Result<(), RepositoryError> {
        queries::blocks::insert_block(&self.pool, sender, target).await?;
        Ok(())
    }

    async fn unblock(&self, sender: UserId, target: UserId) -> Result<(), RepositoryError> {
        queries::blocks::delete_block(&self.pool, sender, target).await?;
        Ok(())
    }
}
