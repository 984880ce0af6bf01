use sqlx::SqlitePool;

/// Record that `blocker_id` no longer wants to hear from `blocked_id`.
pub async fn insert_block(
    pool: &SqlitePool,
    blocker_id: i64,
    blocked_id: i64,
) -> Result<(), sqlx::Error> {
    sqlx::query("INSERT OR IGNORE INTO blocks (blocker_id, blocked_id) VALUES (?, ?)")
        .bind(blocker_id)
        .bind(blocked_id)
        .execute(pool)
        .await?;
    Ok(())
}

pub async fn delete_block(
    pool: &SqlitePool,
    blocker_id: i64,
    blocked_id: i64,
) -> Result<(), sqlx::Error> {
    sqlx::query("DELETE FROM blocks WHERE blocker_id = ? AND blocked_id = ?")
        .bind(blocker_id)
        .bind(blocked_id)
        .execute(pool)
        .await?;
    Ok(())
}

/// Everyone who has blocked `user_id`.
pub async fn list_blockers(pool: &SqlitePool, user_id: i64) -> Result<Vec<i64>, sqlx::Error> {
    sqlx::query_scalar("SELECT blocker_id FROM blocks WHERE blocked_id = ?")
        .bind(user_id)
        .fetch_all(pool)
        .await
}
