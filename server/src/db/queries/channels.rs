use sqlx::SqlitePool;

use crate::db::models::ChannelMemberRow;

/// Create a channel.
pub async fn create_channel(
    pool: &SqlitePool,
    id: &str,
    name: &str,
    description: Option<&str>,
) -> Result<(), sqlx::Error> {
    sqlx::query("INSERT INTO channels (id, name, description) VALUES (?, ?, ?)")
        .bind(id)
        .bind(name)
        .bind(description)
        .execute(pool)
        .await?;
    Ok(())
}

/// Add a member to a channel.
pub async fn add_member(
    pool: &SqlitePool,
    channel_id: &str,
    user_id: &str,
) -> Result<(), sqlx::Error> {
    sqlx::query("INSERT OR IGNORE INTO channel_members (channel_id, user_id) VALUES (?, ?)")
        .bind(channel_id)
        .bind(user_id)
        .execute(pool)
        .await?;
    Ok(())
}

/// Remove a member from a channel.
pub async fn remove_member(
    pool: &SqlitePool,
    channel_id: &str,
    user_id: &str,
) -> Result<(), sqlx::Error> {
    sqlx::query("DELETE FROM channel_members WHERE channel_id = ? AND user_id = ?")
        .bind(channel_id)
        .bind(user_id)
        .execute(pool)
        .await?;
    Ok(())
}

/// Get a single membership row.
pub async fn get_member(
    pool: &SqlitePool,
    channel_id: &str,
    user_id: &str,
) -> Result<Option<ChannelMemberRow>, sqlx::Error> {
    sqlx::query_as::<_, ChannelMemberRow>(
        "SELECT channel_id, user_id, last_read_at, joined_at \
         FROM channel_members WHERE channel_id = ? AND user_id = ?",
    )
    .bind(channel_id)
    .bind(user_id)
    .fetch_optional(pool)
    .await
}

/// IDs of every channel a user belongs to.
pub async fn get_user_channel_ids(
    pool: &SqlitePool,
    user_id: &str,
) -> Result<Vec<String>, sqlx::Error> {
    sqlx::query_scalar::<_, String>(
        "SELECT channel_id FROM channel_members WHERE user_id = ? ORDER BY joined_at",
    )
    .bind(user_id)
    .fetch_all(pool)
    .await
}

/// Move a member's read marker. Returns false when there is no such membership.
pub async fn set_last_read(
    pool: &SqlitePool,
    channel_id: &str,
    user_id: &str,
    at: &str,
) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        "UPDATE channel_members SET last_read_at = ? WHERE channel_id = ? AND user_id = ?",
    )
    .bind(at)
    .bind(channel_id)
    .bind(user_id)
    .execute(pool)
    .await?;
    Ok(result.rows_affected() > 0)
}
