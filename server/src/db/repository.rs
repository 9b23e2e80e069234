use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::db::models::{
    parse_db_timestamp, parse_id, to_db_timestamp, ChannelMemberRow, InsertMessageParams,
    MessageWithAuthorRow, ReadReceiptRow, UserRow,
};
use crate::db::queries;
use crate::engine::error::RepoError;
use crate::engine::events::{
    AuthorInfo, ChannelId, MessageId, MessageType, MessageWithAuthor, ParentAuthorInfo,
    ParentMessageInfo, PresenceStatus, ReadReceipt, UserId,
};

/// A user as the messaging core sees it.
#[derive(Debug, Clone, PartialEq)]
pub struct User {
    pub id: UserId,
    pub username: String,
    pub profile_picture: Option<String>,
    pub status: PresenceStatus,
    pub last_seen: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Membership {
    pub channel_id: ChannelId,
    pub user_id: UserId,
    pub last_read_at: Option<DateTime<Utc>>,
}

/// A message ready to be persisted.
#[derive(Debug, Clone)]
pub struct NewMessage {
    pub id: MessageId,
    pub channel_id: ChannelId,
    pub user_id: UserId,
    pub content: String,
    pub reply_to: Option<MessageId>,
    pub message_type: MessageType,
    pub is_moderated: bool,
    pub moderation_flags: Vec<String>,
    pub created_at: DateTime<Utc>,
}

/// Durable store consumed by the messaging core.
#[async_trait]
pub trait Repository: Send + Sync {
    async fn find_user(&self, user_id: UserId) -> Result<Option<User>, RepoError>;

    async fn list_channel_ids_for_user(&self, user_id: UserId)
    -> Result<Vec<ChannelId>, RepoError>;

    async fn find_membership(
        &self,
        channel_id: ChannelId,
        user_id: UserId,
    ) -> Result<Option<Membership>, RepoError>;

    /// Move the membership's read marker to `at`. Returns false when the user
    /// is not a member.
    async fn touch_last_read(
        &self,
        channel_id: ChannelId,
        user_id: UserId,
        at: DateTime<Utc>,
    ) -> Result<bool, RepoError>;

    async fn insert_message(&self, message: &NewMessage) -> Result<(), RepoError>;

    async fn find_message_with_author(
        &self,
        message_id: MessageId,
    ) -> Result<Option<MessageWithAuthor>, RepoError>;

    /// Up to `limit` messages strictly older than `before`, newest first.
    async fn list_messages(
        &self,
        channel_id: ChannelId,
        before: Option<DateTime<Utc>>,
        limit: u32,
    ) -> Result<Vec<MessageWithAuthor>, RepoError>;

    /// Idempotent per (message, user). `None` when `message_id` is not a
    /// message of `channel_id`.
    async fn find_or_create_read_receipt(
        &self,
        channel_id: ChannelId,
        message_id: MessageId,
        user_id: UserId,
        at: DateTime<Utc>,
    ) -> Result<Option<ReadReceipt>, RepoError>;

    async fn set_presence(
        &self,
        user_id: UserId,
        status: PresenceStatus,
        last_seen: Option<DateTime<Utc>>,
    ) -> Result<(), RepoError>;
}

/// Run a repository call with an upper bound on its duration.
pub async fn bounded<T, F>(limit: Duration, call: F) -> Result<T, RepoError>
where
    F: Future<Output = Result<T, RepoError>>,
{
    match tokio::time::timeout(limit, call).await {
        Ok(result) => result,
        Err(_) => Err(RepoError::Timeout),
    }
}

/// `Repository` backed by the SQLite pool.
#[derive(Debug, Clone)]
pub struct SqliteRepository {
    pool: SqlitePool,
}

impl SqliteRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl Repository for SqliteRepository {
    async fn find_user(&self, user_id: UserId) -> Result<Option<User>, RepoError> {
        queries::users::get_user(&self.pool, &user_id.to_string())
            .await?
            .map(User::try_from)
            .transpose()
    }

    async fn list_channel_ids_for_user(
        &self,
        user_id: UserId,
    ) -> Result<Vec<ChannelId>, RepoError> {
        queries::channels::get_user_channel_ids(&self.pool, &user_id.to_string())
            .await?
            .iter()
            .map(|id| parse_id(id))
            .collect()
    }

    async fn find_membership(
        &self,
        channel_id: ChannelId,
        user_id: UserId,
    ) -> Result<Option<Membership>, RepoError> {
        queries::channels::get_member(&self.pool, &channel_id.to_string(), &user_id.to_string())
            .await?
            .map(Membership::try_from)
            .transpose()
    }

    async fn touch_last_read(
        &self,
        channel_id: ChannelId,
        user_id: UserId,
        at: DateTime<Utc>,
    ) -> Result<bool, RepoError> {
        let updated = queries::channels::set_last_read(
            &self.pool,
            &channel_id.to_string(),
            &user_id.to_string(),
            &to_db_timestamp(at),
        )
        .await?;
        Ok(updated)
    }

    async fn insert_message(&self, message: &NewMessage) -> Result<(), RepoError> {
        let flags = serde_json::to_string(&message.moderation_flags)
            .map_err(|e| RepoError::Corrupt(format!("moderation flags: {e}")))?;
        let reply_to = message.reply_to.map(|id| id.to_string());
        queries::messages::insert_message(
            &self.pool,
            &InsertMessageParams {
                id: &message.id.to_string(),
                channel_id: &message.channel_id.to_string(),
                user_id: &message.user_id.to_string(),
                content: &message.content,
                reply_to: reply_to.as_deref(),
                message_type: message.message_type.as_str(),
                is_moderated: message.is_moderated,
                moderation_flags: &flags,
                created_at: &to_db_timestamp(message.created_at),
            },
        )
        .await?;
        Ok(())
    }

    async fn find_message_with_author(
        &self,
        message_id: MessageId,
    ) -> Result<Option<MessageWithAuthor>, RepoError> {
        queries::messages::get_message_with_author(&self.pool, &message_id.to_string())
            .await?
            .map(MessageWithAuthor::try_from)
            .transpose()
    }

    async fn list_messages(
        &self,
        channel_id: ChannelId,
        before: Option<DateTime<Utc>>,
        limit: u32,
    ) -> Result<Vec<MessageWithAuthor>, RepoError> {
        let before = before.map(to_db_timestamp);
        queries::messages::fetch_channel_history(
            &self.pool,
            &channel_id.to_string(),
            before.as_deref(),
            i64::from(limit),
        )
        .await?
        .into_iter()
        .map(MessageWithAuthor::try_from)
        .collect()
    }

    async fn find_or_create_read_receipt(
        &self,
        channel_id: ChannelId,
        message_id: MessageId,
        user_id: UserId,
        at: DateTime<Utc>,
    ) -> Result<Option<ReadReceipt>, RepoError> {
        queries::read_receipts::find_or_create(
            &self.pool,
            &Uuid::new_v4().to_string(),
            &channel_id.to_string(),
            &message_id.to_string(),
            &user_id.to_string(),
            &to_db_timestamp(at),
        )
        .await?
        .map(ReadReceipt::try_from)
        .transpose()
    }

    async fn set_presence(
        &self,
        user_id: UserId,
        status: PresenceStatus,
        last_seen: Option<DateTime<Utc>>,
    ) -> Result<(), RepoError> {
        let last_seen = last_seen.map(to_db_timestamp);
        queries::presence::set_presence(
            &self.pool,
            &user_id.to_string(),
            status.as_str(),
            last_seen.as_deref(),
        )
        .await?;
        Ok(())
    }
}

impl TryFrom<UserRow> for User {
    type Error = RepoError;

    fn try_from(row: UserRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: parse_id(&row.id)?,
            username: row.username,
            profile_picture: row.profile_picture,
            status: PresenceStatus::parse(&row.status),
            last_seen: row.last_seen_at.as_deref().map(parse_db_timestamp).transpose()?,
        })
    }
}

impl TryFrom<ChannelMemberRow> for Membership {
    type Error = RepoError;

    fn try_from(row: ChannelMemberRow) -> Result<Self, Self::Error> {
        Ok(Self {
            channel_id: parse_id(&row.channel_id)?,
            user_id: parse_id(&row.user_id)?,
            last_read_at: row.last_read_at.as_deref().map(parse_db_timestamp).transpose()?,
        })
    }
}

impl TryFrom<ReadReceiptRow> for ReadReceipt {
    type Error = RepoError;

    fn try_from(row: ReadReceiptRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: parse_id(&row.id)?,
            message_id: parse_id(&row.message_id)?,
            user_id: parse_id(&row.user_id)?,
            read_at: parse_db_timestamp(&row.read_at)?,
        })
    }
}

impl TryFrom<MessageWithAuthorRow> for MessageWithAuthor {
    type Error = RepoError;

    fn try_from(row: MessageWithAuthorRow) -> Result<Self, Self::Error> {
        let message_type = MessageType::parse(&row.message_type)
            .ok_or_else(|| RepoError::Corrupt(format!("message type '{}'", row.message_type)))?;
        let moderation_flags: Vec<String> = serde_json::from_str(&row.moderation_flags)
            .map_err(|e| RepoError::Corrupt(format!("moderation flags: {e}")))?;
        let user_id = parse_id(&row.user_id)?;

        let parent_message = match (row.parent_id, row.parent_user_id, row.parent_username) {
            (Some(id), Some(parent_user_id), Some(username)) => Some(ParentMessageInfo {
                id: parse_id(&id)?,
                user: ParentAuthorInfo {
                    id: parse_id(&parent_user_id)?,
                    username,
                },
            }),
            _ => None,
        };

        Ok(Self {
            id: parse_id(&row.id)?,
            channel_id: parse_id(&row.channel_id)?,
            user_id,
            content: row.content,
            reply_to: row.reply_to.as_deref().map(parse_id).transpose()?,
            message_type,
            created_at: parse_db_timestamp(&row.created_at)?,
            is_moderated: row.is_moderated != 0,
            moderation_flags,
            user: AuthorInfo {
                id: user_id,
                username: row.author_username,
                profile_picture: row.author_profile_picture,
                status: PresenceStatus::parse(&row.author_status),
            },
            parent_message,
        })
    }
}
