use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{error, info, warn};
use uuid::Uuid;

use super::chat_engine::EngineSettings;
use super::error::{QueryError, RepoError, SendError};
use super::events::{ChannelId, MessageId, MessageType, MessageWithAuthor, ReadReceipt, ServerEvent, UserId};
use super::moderation::{Moderator, bounded_moderation};
use super::rooms::RoomManager;
use super::validation;
use crate::db::repository::{NewMessage, Repository, bounded};

pub const DEFAULT_HISTORY_LIMIT: u32 = 50;
pub const MAX_HISTORY_LIMIT: u32 = 200;

/// A request to post a message to a channel.
#[derive(Debug, Clone)]
pub struct SendRequest {
    pub channel_id: ChannelId,
    pub content: String,
    pub reply_to: Option<MessageId>,
}

/// A committed message plus what moderation flagged in it.
#[derive(Debug, Clone)]
pub struct SendOutcome {
    pub message: MessageWithAuthor,
    pub violations: Vec<String>,
}

/// Orchestrates every message send, read receipt and history read.
pub struct MessagePipeline {
    rooms: Arc<RoomManager>,
    repo: Arc<dyn Repository>,
    moderator: Arc<dyn Moderator>,
    settings: EngineSettings,
}

impl MessagePipeline {
    pub fn new(
        rooms: Arc<RoomManager>,
        repo: Arc<dyn Repository>,
        moderator: Arc<dyn Moderator>,
        settings: EngineSettings,
    ) -> Self {
        Self {
            rooms,
            repo,
            moderator,
            settings,
        }
    }

    /// Mute check, membership check, content scan, persist, reload, fan out to
    /// the channel room, then move the sender's read marker. Each step
    /// short-circuits; nothing is persisted or broadcast unless every earlier
    /// step passed.
    pub async fn send(&self, user_id: UserId, request: SendRequest) -> Result<SendOutcome, SendError> {
        let SendRequest {
            channel_id,
            content,
            reply_to,
        } = request;

        let muted = bounded_moderation(
            self.settings.moderation_timeout,
            self.moderator.is_user_muted(user_id),
        )
        .await
        .map_err(|e| {
            warn!(%user_id, error = %e, "mute check failed");
            SendError::ModerationUnavailable
        })?;
        if muted {
            return Err(SendError::UserMuted);
        }

        if !self.rooms.is_member(channel_id, user_id).await? {
            return Err(SendError::NotMember);
        }

        validation::validate_content(&content, self.settings.max_message_length)
            .map_err(SendError::InvalidContent)?;

        let scan = bounded_moderation(
            self.settings.moderation_timeout,
            self.moderator.scan_message(&content, user_id),
        )
        .await
        .map_err(|e| {
            warn!(%user_id, error = %e, "content scan failed");
            SendError::ModerationUnavailable
        })?;
        if scan.should_block {
            info!(%user_id, %channel_id, violations = ?scan.violations, "message blocked");
            return Err(SendError::ContentBlocked {
                violations: scan.violations,
            });
        }

        let new_message = NewMessage {
            id: Uuid::new_v4(),
            channel_id,
            user_id,
            content: if scan.is_clean {
                content
            } else {
                scan.filtered_content
            },
            reply_to,
            message_type: MessageType::Text,
            is_moderated: !scan.is_clean,
            moderation_flags: scan.violations.clone(),
            created_at: Utc::now(),
        };

        if let Err(e) = self.call(self.repo.insert_message(&new_message)).await {
            error!(%user_id, %channel_id, error = %e, "failed to persist message");
            return Err(SendError::PersistenceError(e));
        }

        let message = match self
            .call(self.repo.find_message_with_author(new_message.id))
            .await
        {
            Ok(Some(message)) => message,
            Ok(None) => {
                error!(message_id = %new_message.id, "message missing right after insert");
                return Err(SendError::PersistenceError(RepoError::Corrupt(format!(
                    "message {} not found after insert",
                    new_message.id
                ))));
            }
            Err(e) => {
                error!(message_id = %new_message.id, error = %e, "failed to reload message");
                return Err(SendError::PersistenceError(e));
            }
        };

        let recipients = self.rooms.broadcast(
            channel_id,
            &ServerEvent::NewMessage {
                message: message.clone(),
            },
            None,
        );

        // Sending implies having read up to this point. Best-effort only.
        match self
            .call(self.repo.touch_last_read(channel_id, user_id, Utc::now()))
            .await
        {
            Ok(true) => {}
            Ok(false) => warn!(%user_id, %channel_id, "no membership to update after send"),
            Err(e) => warn!(%user_id, %channel_id, error = %e, "failed to update last read after send"),
        }

        info!(message_id = %message.id, %channel_id, %user_id, recipients, "message sent");
        Ok(SendOutcome {
            message,
            violations: scan.violations,
        })
    }

    /// Record read receipts for the given messages and move the channel read
    /// marker to now. Ids that are not messages of this channel are skipped.
    pub async fn mark_read(
        &self,
        user_id: UserId,
        channel_id: ChannelId,
        message_ids: &[MessageId],
    ) -> Result<Vec<ReadReceipt>, QueryError> {
        if !self.rooms.is_member(channel_id, user_id).await? {
            return Err(QueryError::NotMember);
        }

        let now = Utc::now();
        let mut seen = HashSet::new();
        let mut receipts = Vec::with_capacity(message_ids.len());
        for &message_id in message_ids {
            if !seen.insert(message_id) {
                continue;
            }
            let receipt = self
                .call(
                    self.repo
                        .find_or_create_read_receipt(channel_id, message_id, user_id, now),
                )
                .await?;
            if let Some(receipt) = receipt {
                receipts.push(receipt);
            }
        }

        self.call(self.repo.touch_last_read(channel_id, user_id, now))
            .await?;

        Ok(receipts)
    }

    /// A page of channel history in chronological order: up to `limit`
    /// messages created strictly before `before`.
    pub async fn get_messages(
        &self,
        user_id: UserId,
        channel_id: ChannelId,
        before: Option<DateTime<Utc>>,
        limit: Option<u32>,
    ) -> Result<Vec<MessageWithAuthor>, QueryError> {
        if !self.rooms.is_member(channel_id, user_id).await? {
            return Err(QueryError::NotMember);
        }

        let limit = clamp_limit(limit);
        let mut messages = self
            .call(self.repo.list_messages(channel_id, before, limit))
            .await?;
        messages.reverse();
        Ok(messages)
    }

    async fn call<T>(
        &self,
        fut: impl std::future::Future<Output = Result<T, RepoError>>,
    ) -> Result<T, RepoError> {
        bounded(self.settings.repository_timeout, fut).await
    }
}

/// Clamp a requested page size to `1..=MAX_HISTORY_LIMIT`.
pub fn clamp_limit(limit: Option<u32>) -> u32 {
    limit
        .unwrap_or(DEFAULT_HISTORY_LIMIT)
        .clamp(1, MAX_HISTORY_LIMIT)
}
