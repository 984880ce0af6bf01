use sqlx::SqlitePool;

use crate::db::models::RoomRow;

/// Insert a new room row and return its id. Fails on a duplicate name.
pub async fn insert_room(
    pool: &SqlitePool,
    name: &str,
    owner_id: i64,
    status: &str,
    password_hash: Option<&str>,
    admins: &str,
    members: &str,
) -> Result<i64, sqlx::Error> {
    let id: i64 = sqlx::query_scalar(
        "INSERT INTO chat_rooms (name, owner_id, status, password_hash, admins, members) \
         VALUES (?, ?, ?, ?, ?, ?) RETURNING id",
    )
    .bind(name)
    .bind(owner_id)
    .bind(status)
    .bind(password_hash)
    .bind(admins)
    .bind(members)
    .fetch_one(pool)
    .await?;
    Ok(id)
}

/// Parameters for overwriting a room's mutable state.
pub struct UpdateRoom<'a> {
    pub id: i64,
    pub name: &'a str,
    pub owner_id: i64,
    pub status: &'a str,
    pub password_hash: Option<&'a str>,
    pub admins: &'a str,
    pub banned: &'a str,
    pub muted: &'a str,
    pub members: &'a str,
}

/// Overwrite a room. Returns the number of rows touched (0 if it was deleted).
pub async fn update_room(pool: &SqlitePool, room: &UpdateRoom<'_>) -> Result<u64, sqlx::Error> {
    let result = sqlx::query(
        "UPDATE chat_rooms SET name = ?, owner_id = ?, status = ?, password_hash = ?, \
         admins = ?, banned = ?, muted = ?, members = ?, updated_at = datetime('now') \
         WHERE id = ?",
    )
    .bind(room.name)
    .bind(room.owner_id)
    .bind(room.status)
    .bind(room.password_hash)
    .bind(room.admins)
    .bind(room.banned)
    .bind(room.muted)
    .bind(room.members)
    .bind(room.id)
    .execute(pool)
    .await?;
    Ok(result.rows_affected())
}

/// Delete a room together with its message log.
pub async fn delete_room(pool: &SqlitePool, id: i64) -> Result<(), sqlx::Error> {
    let mut tx = pool.begin().await?;
    sqlx::query("DELETE FROM chat_messages WHERE room_id = ?")
        .bind(id)
        .execute(&mut *tx)
        .await?;
    sqlx::query("DELETE FROM chat_rooms WHERE id = ?")
        .bind(id)
        .execute(&mut *tx)
        .await?;
    tx.commit().await?;
    Ok(())
}

/// Delete a room looked up by name, together with its message log.
/// Returns the number of rooms removed.
pub async fn delete_room_by_name(pool: &SqlitePool, name: &str) -> Result<u64, sqlx::Error> {
    let mut tx = pool.begin().await?;
    sqlx::query(
        "DELETE FROM chat_messages WHERE room_id IN (SELECT id FROM chat_rooms WHERE name = ?)",
    )
    .bind(name)
    .execute(&mut *tx)
    .await?;
    let result = sqlx::query("DELETE FROM chat_rooms WHERE name = ?")
        .bind(name)
        .execute(&mut *tx)
        .await?;
    tx.commit().await?;
    Ok(result.rows_affected())
}

/// Load every stored room, oldest first.
pub async fn list_rooms(pool: &SqlitePool) -> Result<Vec<RoomRow>, sqlx::Error> {
    sqlx::query_as::<_, RoomRow>(
        "SELECT id, name, owner_id, status, password_hash, admins, banned, muted, members \
         FROM chat_rooms ORDER BY id",
    )
    .fetch_all(pool)
    .await
}
