use sqlx::SqlitePool;

use crate::db::models::MessageRow;

/// Parameters for appending a message to a room's log.
pub struct InsertMessage<'a> {
    pub id: &'a str,
    pub room_id: i64,
    pub sender_id: i64,
    pub sender_nick: &'a str,
    pub content: &'a str,
    pub kind: &'a str,
    pub created_at: &'a str,
}

/// Append a message. Re-inserting the same id is a no-op.
pub async fn insert_message(
    pool: &SqlitePool,
    message: &InsertMessage<'_>,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        "INSERT OR IGNORE INTO chat_messages \
         (id, room_id, sender_id, sender_nick, content, kind, created_at) \
         VALUES (?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(message.id)
    .bind(message.room_id)
    .bind(message.sender_id)
    .bind(message.sender_nick)
    .bind(message.content)
    .bind(message.kind)
    .bind(message.created_at)
    .execute(pool)
    .await?;
    Ok(())
}

/// The newest `limit` messages of a room, returned oldest first.
pub async fn fetch_recent(
    pool: &SqlitePool,
    room_id: i64,
    limit: i64,
) -> Result<Vec<MessageRow>, sqlx::Error> {
    let mut rows = sqlx::query_as::<_, MessageRow>(
        "SELECT m.id, m.room_id, r.name AS room_name, m.sender_id, m.sender_nick, \
                m.content, m.kind, m.created_at \
         FROM chat_messages m JOIN chat_rooms r ON r.id = m.room_id \
         WHERE m.room_id = ? \
         ORDER BY m.created_at DESC, m.rowid DESC LIMIT ?",
    )
    .bind(room_id)
    .bind(limit)
    .fetch_all(pool)
    .await?;
    rows.reverse();
    Ok(rows)
}

/// Number of stored messages in a room.
pub async fn count_for_room(pool: &SqlitePool, room_id: i64) -> Result<i64, sqlx::Error> {
    sqlx::query_scalar("SELECT COUNT(*) FROM chat_messages WHERE room_id = ?")
        .bind(room_id)
        .fetch_one(pool)
        .await
}
