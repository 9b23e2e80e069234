use sqlx::SqlitePool;

/// Record a user's durable presence. `last_seen_at` is only overwritten when a
/// value is given, so going online keeps the previous last-seen time.
pub async fn set_presence(
    pool: &SqlitePool,
    user_id: &str,
    status: &str,
    last_seen_at: Option<&str>,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        "UPDATE users SET status = ?, last_seen_at = COALESCE(?, last_seen_at) WHERE id = ?",
    )
    .bind(status)
    .bind(last_seen_at)
    .bind(user_id)
    .execute(pool)
    .await?;
    Ok(())
}

/// Mark every user still recorded as online as offline, stamping
/// `last_seen_at`. Used when no connection can be live, at startup and after
/// shutdown. Returns the number of rows changed.
pub async fn reset_all_offline(pool: &SqlitePool, last_seen_at: &str) -> Result<u64, sqlx::Error> {
    let result =
        sqlx::query("UPDATE users SET status = 'offline', last_seen_at = ? WHERE status != 'offline'")
            .bind(last_seen_at)
            .execute(pool)
            .await?;
    Ok(result.rows_affected())
}
