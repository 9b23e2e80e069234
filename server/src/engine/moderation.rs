use std::collections::HashSet;
use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tracing::info;

use super::error::ModerationError;
use super::events::UserId;

/// Verdict of a content scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanResult {
    pub is_clean: bool,
    /// Content with flagged words masked. Equals the input when clean.
    pub filtered_content: String,
    pub should_block: bool,
    pub violations: Vec<String>,
}

impl ScanResult {
    pub fn clean(content: &str) -> Self {
        Self {
            is_clean: true,
            filtered_content: content.to_string(),
            should_block: false,
            violations: Vec::new(),
        }
    }
}

/// Content policy consumed by the message pipeline.
#[async_trait]
pub trait Moderator: Send + Sync {
    async fn scan_message(&self, content: &str, user_id: UserId)
    -> Result<ScanResult, ModerationError>;

    async fn is_user_muted(&self, user_id: UserId) -> Result<bool, ModerationError>;
}

/// Run a moderation call with an upper bound on its duration.
pub async fn bounded_moderation<T, F>(limit: Duration, call: F) -> Result<T, ModerationError>
where
    F: Future<Output = Result<T, ModerationError>>,
{
    tokio::time::timeout(limit, call)
        .await
        .unwrap_or(Err(ModerationError::Timeout))
}

/// Word-list moderator. Blocked words reject the message outright; filtered
/// words are masked. Matching is case-insensitive on whole words.
pub struct WordFilter {
    blocked: HashSet<String>,
    filtered: HashSet<String>,
    /// user -> mute expiry
    mutes: DashMap<UserId, DateTime<Utc>>,
}

impl WordFilter {
    pub fn new<B, F>(blocked: B, filtered: F) -> Self
    where
        B: IntoIterator<Item = String>,
        F: IntoIterator<Item = String>,
    {
        let normalize = |w: String| w.trim().to_lowercase();
        Self {
            blocked: blocked
                .into_iter()
                .map(normalize)
                .filter(|w| !w.is_empty())
                .collect(),
            filtered: filtered
                .into_iter()
                .map(normalize)
                .filter(|w| !w.is_empty())
                .collect(),
            mutes: DashMap::new(),
        }
    }

    pub fn mute(&self, user_id: UserId, until: DateTime<Utc>) {
        info!(%user_id, %until, "user muted");
        self.mutes.insert(user_id, until);
    }

    pub fn unmute(&self, user_id: UserId) {
        if self.mutes.remove(&user_id).is_some() {
            info!(%user_id, "user unmuted");
        }
    }

    pub fn is_muted_at(&self, user_id: UserId, now: DateTime<Utc>) -> bool {
        // Expired entries are dropped on read.
        self.mutes.remove_if(&user_id, |_, until| *until <= now);
        self.mutes.contains_key(&user_id)
    }

    pub fn scan(&self, content: &str) -> ScanResult {
        let mut output = String::with_capacity(content.len());
        let mut violations: Vec<String> = Vec::new();
        let mut should_block = false;

        let mut rest = content;
        while !rest.is_empty() {
            let word_len = rest
                .char_indices()
                .find(|(_, c)| !is_word_char(*c))
                .map(|(i, _)| i)
                .unwrap_or(rest.len());

            if word_len == 0 {
                // Copy one separator character.
                let sep_len = rest.chars().next().map(char::len_utf8).unwrap_or(1);
                output.push_str(&rest[..sep_len]);
                rest = &rest[sep_len..];
                continue;
            }

            let word = &rest[..word_len];
            let lower = word.to_lowercase();
            let blocked = self.blocked.contains(&lower);
            let filtered = self.filtered.contains(&lower);

            if blocked {
                should_block = true;
            }
            if blocked || filtered {
                if !violations.contains(&lower) {
                    violations.push(lower);
                }
                output.extend(std::iter::repeat_n('*', word.chars().count()));
            } else {
                output.push_str(word);
            }
            rest = &rest[word_len..];
        }

        ScanResult {
            is_clean: violations.is_empty(),
            filtered_content: output,
            should_block,
            violations,
        }
    }
}

fn is_word_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_' || c == '\''
}

#[async_trait]
impl Moderator for WordFilter {
    async fn scan_message(
        &self,
        content: &str,
        _user_id: UserId,
    ) -> Result<ScanResult, ModerationError> {
        Ok(self.scan(content))
    }

    async fn is_user_muted(&self, user_id: UserId) -> Result<bool, ModerationError> {
        Ok(self.is_muted_at(user_id, Utc::now()))
    }
}
