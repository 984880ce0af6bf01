use sqlx::SqlitePool;

use crate::db::models::UserRow;

/// Insert a user or refresh its nickname.
pub async fn upsert_user(pool: &SqlitePool, id: i64, nickname: &str) -> Result<(), sqlx::Error> {
    sqlx::query(
        "INSERT INTO users (id, nickname) VALUES (?, ?) \
         ON CONFLICT(id) DO UPDATE SET nickname = excluded.nickname",
    )
    .bind(id)
    .bind(nickname)
    .execute(pool)
    .await?;
    Ok(())
}

/// Get a user by id.
pub async fn get_user(pool: &SqlitePool, id: i64) -> Result<Option<UserRow>, sqlx::Error> {
    sqlx::query_as::<_, UserRow>("SELECT id, nickname, is_online FROM users WHERE id = ?")
        .bind(id)
        .fetch_optional(pool)
        .await
}

/// Look up a user id by nickname (case-insensitive).
pub async fn find_by_nickname(
    pool: &SqlitePool,
    nickname: &str,
) -> Result<Option<i64>, sqlx::Error> {
    sqlx::query_scalar("SELECT id FROM users WHERE nickname = ? COLLATE NOCASE LIMIT 1")
        .bind(nickname)
        .fetch_optional(pool)
        .await
}

/// Record whether a user currently has a live connection.
pub async fn set_online(pool: &SqlitePool, id: i64, online: bool) -> Result<(), sqlx::Error> {
    sqlx::query("UPDATE users SET is_online = ? WHERE id = ?")
        .bind(online)
        .bind(id)
        .execute(pool)
        .await?;
    Ok(())
}

/// Mark everyone offline. Run at startup, since no connection survives a restart.
pub async fn reset_online(pool: &SqlitePool) -> Result<u64, sqlx::Error> {
    let result = sqlx::query("UPDATE users SET is_online = 0 WHERE is_online != 0")
        .execute(pool)
        .await?;
    Ok(result.rows_affected())
}
