use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::engine::error::RepoError;

/// Fixed-width UTC timestamp layout. Lexicographic order of the stored text
/// equals chronological order, which the history cursor relies on.
const DB_TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.6fZ";

pub fn to_db_timestamp(at: DateTime<Utc>) -> String {
    at.format(DB_TIMESTAMP_FORMAT).to_string()
}

pub fn parse_db_timestamp(raw: &str) -> Result<DateTime<Utc>, RepoError> {
    raw.parse::<DateTime<Utc>>()
        .or_else(|_| {
            // Column defaults written by SQLite itself have no offset.
            NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S").map(|ndt| ndt.and_utc())
        })
        .map_err(|e| RepoError::Corrupt(format!("timestamp '{raw}': {e}")))
}

pub fn parse_id(raw: &str) -> Result<Uuid, RepoError> {
    raw.parse()
        .map_err(|e| RepoError::Corrupt(format!("id '{raw}': {e}")))
}

/// A stored user (profile projection only).
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct UserRow {
    pub id: String,
    pub username: String,
    pub profile_picture: Option<String>,
    pub status: String,
    pub last_seen_at: Option<String>,
    pub created_at: String,
}

/// A channel membership record.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct ChannelMemberRow {
    pub channel_id: String,
    pub user_id: String,
    pub last_read_at: Option<String>,
    pub joined_at: String,
}

/// A message joined with its author and, when present, its parent's author.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct MessageWithAuthorRow {
    pub id: String,
    pub channel_id: String,
    pub user_id: String,
    pub content: String,
    pub reply_to: Option<String>,
    pub message_type: String,
    pub is_moderated: i32,
    pub moderation_flags: String,
    pub created_at: String,
    pub author_username: String,
    pub author_profile_picture: Option<String>,
    pub author_status: String,
    pub parent_id: Option<String>,
    pub parent_user_id: Option<String>,
    pub parent_username: Option<String>,
}

/// A read receipt.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct ReadReceiptRow {
    pub id: String,
    pub message_id: String,
    pub user_id: String,
    pub read_at: String,
}

/// Parameters for inserting a new message.
pub struct InsertMessageParams<'a> {
    pub id: &'a str,
    pub channel_id: &'a str,
    pub user_id: &'a str,
    pub content: &'a str,
    pub reply_to: Option<&'a str>,
    pub message_type: &'a str,
    pub is_moderated: bool,
    pub moderation_flags: &'a str,
    pub created_at: &'a str,
}
