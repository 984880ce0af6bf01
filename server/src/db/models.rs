use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::engine::collaborators::{RepositoryError, RoomRecord};
use crate::engine::events::{MessageKind, MuteInfo, RoomMessage, UserId};
use crate::engine::room::RoomStatus;

/// A stored room. List columns hold JSON arrays.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct RoomRow {
    pub id: i64,
    pub name: String,
    pub owner_id: i64,
    pub status: String,
    pub password_hash: Option<String>,
    pub admins: String,
    pub banned: String,
    pub muted: String,
    pub members: String,
}

/// A stored message joined with its room's name.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct MessageRow {
    pub id: String,
    pub room_id: i64,
    pub room_name: String,
    pub sender_id: i64,
    pub sender_nick: String,
    pub content: String,
    pub kind: String,
    pub created_at: String,
}

/// A row of the user directory.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct UserRow {
    pub id: i64,
    pub nickname: String,
    pub is_online: i32,
}

/// Encode a user id list for a JSON column.
pub fn encode_ids(ids: &[UserId]) -> String {
    serde_json::to_string(ids).unwrap_or_else(|_| "[]".into())
}

/// Encode mutes as `[{"userId":..,"until":..}]`.
pub fn encode_mutes(muted: &[(UserId, DateTime<Utc>)]) -> String {
    let entries: Vec<MuteInfo> = muted
        .iter()
        .map(|&(user_id, until)| MuteInfo { user_id, until })
        .collect();
    serde_json::to_string(&entries).unwrap_or_else(|_| "[]".into())
}

fn decode_ids(room: &str, column: &str, raw: &str) -> Result<Vec<UserId>, RepositoryError> {
    serde_json::from_str(raw)
        .map_err(|e| RepositoryError::Corrupt(format!("room {room}: {column}: {e}")))
}

impl TryFrom<RoomRow> for RoomRecord {
    type Error = RepositoryError;

    fn try_from(row: RoomRow) -> Result<Self, Self::Error> {
        let status = RoomStatus::parse(&row.status).ok_or_else(|| {
            RepositoryError::Corrupt(format!("room {}: unknown status {:?}", row.name, row.status))
        })?;
        let muted: Vec<MuteInfo> = serde_json::from_str(&row.muted)
            .map_err(|e| RepositoryError::Corrupt(format!("room {}: muted: {e}", row.name)))?;

        Ok(RoomRecord {
            id: row.id,
            admins: decode_ids(&row.name, "admins", &row.admins)?,
            banned: decode_ids(&row.name, "banned", &row.banned)?,
            members: decode_ids(&row.name, "members", &row.members)?,
            muted: muted.into_iter().map(|m| (m.user_id, m.until)).collect(),
            owner: row.owner_id,
            status,
            password_hash: row.password_hash,
            name: row.name,
        })
    }
}

impl TryFrom<MessageRow> for RoomMessage {
    type Error = RepositoryError;

    fn try_from(row: MessageRow) -> Result<Self, Self::Error> {
        let id = Uuid::parse_str(&row.id)
            .map_err(|e| RepositoryError::Corrupt(format!("message {}: {e}", row.id)))?;
        let created = DateTime::parse_from_rfc3339(&row.created_at)
            .map_err(|e| RepositoryError::Corrupt(format!("message {}: {e}", row.id)))?
            .with_timezone(&Utc);

        Ok(RoomMessage {
            id,
            room_id: row.room_id,
            room_name: row.room_name,
            sender_id: row.sender_id,
            sender_name: row.sender_nick,
            message: row.content,
            kind: MessageKind::parse(&row.kind),
            created,
        })
    }
}
