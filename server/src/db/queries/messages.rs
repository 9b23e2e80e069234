use sqlx::SqlitePool;

use crate::db::models::{InsertMessageParams, MessageWithAuthorRow};

/// Message columns joined with the author projection and the parent message's
/// author. The parent join is restricted to the same channel.
const MESSAGE_WITH_AUTHOR_SELECT: &str = "\
    SELECT m.id, m.channel_id, m.user_id, m.content, m.reply_to, m.message_type, \
           m.is_moderated, m.moderation_flags, m.created_at, \
           u.username AS author_username, \
           u.profile_picture AS author_profile_picture, \
           u.status AS author_status, \
           p.id AS parent_id, p.user_id AS parent_user_id, pu.username AS parent_username \
    FROM messages m \
    JOIN users u ON u.id = m.user_id \
    LEFT JOIN messages p ON p.id = m.reply_to AND p.channel_id = m.channel_id \
    LEFT JOIN users pu ON pu.id = p.user_id";

/// Insert a new channel message.
pub async fn insert_message(
    pool: &SqlitePool,
    params: &InsertMessageParams<'_>,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        "INSERT INTO messages (id, channel_id, user_id, content, reply_to, message_type, \
         is_moderated, moderation_flags, created_at) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(params.id)
    .bind(params.channel_id)
    .bind(params.user_id)
    .bind(params.content)
    .bind(params.reply_to)
    .bind(params.message_type)
    .bind(params.is_moderated as i32)
    .bind(params.moderation_flags)
    .bind(params.created_at)
    .execute(pool)
    .await?;
    Ok(())
}

/// Load one message with its author.
pub async fn get_message_with_author(
    pool: &SqlitePool,
    message_id: &str,
) -> Result<Option<MessageWithAuthorRow>, sqlx::Error> {
    let sql = format!("{MESSAGE_WITH_AUTHOR_SELECT} WHERE m.id = ?");
    sqlx::query_as::<_, MessageWithAuthorRow>(&sql)
        .bind(message_id)
        .fetch_optional(pool)
        .await
}

/// Fetch channel message history with cursor-based pagination.
/// Returns messages strictly before `before_time`, ordered newest first.
pub async fn fetch_channel_history(
    pool: &SqlitePool,
    channel_id: &str,
    before_time: Option<&str>,
    limit: i64,
) -> Result<Vec<MessageWithAuthorRow>, sqlx::Error> {
    match before_time {
        Some(before) => {
            let sql = format!(
                "{MESSAGE_WITH_AUTHOR_SELECT} \
                 WHERE m.channel_id = ? AND m.created_at < ? \
                 ORDER BY m.created_at DESC, m.id DESC \
                 LIMIT ?"
            );
            sqlx::query_as::<_, MessageWithAuthorRow>(&sql)
                .bind(channel_id)
                .bind(before)
                .bind(limit)
                .fetch_all(pool)
                .await
        }
        None => {
            let sql = format!(
                "{MESSAGE_WITH_AUTHOR_SELECT} \
                 WHERE m.channel_id = ? \
                 ORDER BY m.created_at DESC, m.id DESC \
                 LIMIT ?"
            );
            sqlx::query_as::<_, MessageWithAuthorRow>(&sql)
                .bind(channel_id)
                .bind(limit)
                .fetch_all(pool)
                .await
        }
    }
}
