use sqlx::SqlitePool;

use crate::db::models::ReadReceiptRow;

/// Create the (message, user) receipt unless one exists, then return the stored
/// row. Only messages of `channel_id` get receipts; for any other id this
/// returns `None`.
pub async fn find_or_create(
    pool: &SqlitePool,
    id: &str,
    channel_id: &str,
    message_id: &str,
    user_id: &str,
    read_at: &str,
) -> Result<Option<ReadReceiptRow>, sqlx::Error> {
    sqlx::query(
        "INSERT OR IGNORE INTO read_receipts (id, message_id, user_id, read_at) \
         SELECT ?, m.id, ?, ? FROM messages m WHERE m.id = ? AND m.channel_id = ?",
    )
    .bind(id)
    .bind(user_id)
    .bind(read_at)
    .bind(message_id)
    .bind(channel_id)
    .execute(pool)
    .await?;

    sqlx::query_as::<_, ReadReceiptRow>(
        "SELECT r.id, r.message_id, r.user_id, r.read_at FROM read_receipts r \
         JOIN messages m ON m.id = r.message_id \
         WHERE r.message_id = ? AND r.user_id = ? AND m.channel_id = ?",
    )
    .bind(message_id)
    .bind(user_id)
    .bind(channel_id)
    .fetch_optional(pool)
    .await
}
