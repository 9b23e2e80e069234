//! Shared fixtures for unit and integration tests.

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::db::pool::{create_pool, run_migrations};
use crate::db::queries;
use crate::db::repository::{Membership, NewMessage, Repository, SqliteRepository, User};
use crate::engine::error::{ModerationError, RepoError};
use crate::engine::events::{
    ChannelId, MessageId, MessageWithAuthor, PresenceStatus, ReadReceipt, ServerEvent, UserId,
};
use crate::engine::moderation::{Moderator, ScanResult};

pub async fn setup_db() -> SqlitePool {
    let pool = create_pool("sqlite::memory:").await.unwrap();
    run_migrations(&pool).await.unwrap();
    pool
}

pub async fn setup_repo() -> (SqlitePool, Arc<dyn Repository>) {
    let pool = setup_db().await;
    let repo: Arc<dyn Repository> = Arc::new(SqliteRepository::new(pool.clone()));
    (pool, repo)
}

pub async fn create_user(pool: &SqlitePool, username: &str) -> UserId {
    let id = Uuid::new_v4();
    queries::users::create_user(pool, &id.to_string(), username, None)
        .await
        .unwrap();
    id
}

pub async fn create_channel(pool: &SqlitePool, name: &str) -> ChannelId {
    let id = Uuid::new_v4();
    queries::channels::create_channel(pool, &id.to_string(), name, None)
        .await
        .unwrap();
    id
}

pub async fn add_member(pool: &SqlitePool, channel_id: ChannelId, user_id: UserId) {
    queries::channels::add_member(pool, &channel_id.to_string(), &user_id.to_string())
        .await
        .unwrap();
}

/// Number of stored messages in a channel.
pub async fn message_count(pool: &SqlitePool, channel_id: ChannelId) -> i64 {
    sqlx::query_scalar("SELECT COUNT(*) FROM messages WHERE channel_id = ?")
        .bind(channel_id.to_string())
        .fetch_one(pool)
        .await
        .unwrap()
}

/// Next queued event, failing the test if none arrives within two seconds.
pub async fn next_event(rx: &mut mpsc::Receiver<ServerEvent>) -> ServerEvent {
    tokio::time::timeout(Duration::from_secs(2), rx.recv())
        .await
        .expect("timed out waiting for event")
        .expect("event channel closed")
}

/// Discard queued events until the stream has been quiet for a moment, so
/// asynchronous presence broadcasts do not leak into later assertions.
pub async fn drain(rx: &mut mpsc::Receiver<ServerEvent>) {
    while let Ok(Some(_)) = tokio::time::timeout(Duration::from_millis(100), rx.recv()).await {}
}

/// Moderator with configurable word lists, mutes and failure mode.
#[derive(Default)]
pub struct StubModerator {
    blocked: Mutex<HashSet<String>>,
    filtered: Mutex<HashSet<String>>,
    muted: Mutex<HashSet<UserId>>,
    failing: AtomicBool,
}

impl StubModerator {
    pub fn block_word(&self, word: &str) {
        self.blocked.lock().unwrap().insert(word.to_string());
    }

    pub fn filter_word(&self, word: &str) {
        self.filtered.lock().unwrap().insert(word.to_string());
    }

    pub fn mute(&self, user_id: UserId) {
        self.muted.lock().unwrap().insert(user_id);
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    fn check_failing(&self) -> Result<(), ModerationError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(ModerationError::Backend("stub failure".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl Moderator for StubModerator {
    async fn scan_message(
        &self,
        content: &str,
        _user_id: UserId,
    ) -> Result<ScanResult, ModerationError> {
        self.check_failing()?;
        let blocked = self.blocked.lock().unwrap().clone();
        let filtered = self.filtered.lock().unwrap().clone();

        let mut violations = Vec::new();
        let mut should_block = false;
        let words: Vec<String> = content
            .split(' ')
            .map(|word| {
                if blocked.contains(word) {
                    should_block = true;
                    violations.push(word.to_string());
                    word.to_string()
                } else if filtered.contains(word) {
                    violations.push(word.to_string());
                    "*".repeat(word.len())
                } else {
                    word.to_string()
                }
            })
            .collect();

        Ok(ScanResult {
            is_clean: violations.is_empty(),
            filtered_content: words.join(" "),
            should_block,
            violations,
        })
    }

    async fn is_user_muted(&self, user_id: UserId) -> Result<bool, ModerationError> {
        self.check_failing()?;
        Ok(self.muted.lock().unwrap().contains(&user_id))
    }
}

/// SQLite repository with injectable failures and latency.
pub struct FlakyRepository {
    inner: SqliteRepository,
    inserts: AtomicUsize,
    fail_inserts: AtomicBool,
    fail_last_read: AtomicBool,
    delay_ms: AtomicU64,
}

impl FlakyRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            inner: SqliteRepository::new(pool),
            inserts: AtomicUsize::new(0),
            fail_inserts: AtomicBool::new(false),
            fail_last_read: AtomicBool::new(false),
            delay_ms: AtomicU64::new(0),
        }
    }

    /// Number of `insert_message` calls seen, successful or not.
    pub fn insert_count(&self) -> usize {
        self.inserts.load(Ordering::SeqCst)
    }

    pub fn fail_inserts(&self, fail: bool) {
        self.fail_inserts.store(fail, Ordering::SeqCst);
    }

    pub fn fail_last_read(&self, fail: bool) {
        self.fail_last_read.store(fail, Ordering::SeqCst);
    }

    /// Delay applied before every call.
    pub fn set_delay(&self, delay: Duration) {
        self.delay_ms.store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    async fn pause(&self) {
        let ms = self.delay_ms.load(Ordering::SeqCst);
        if ms > 0 {
            tokio::time::sleep(Duration::from_millis(ms)).await;
        }
    }
}

fn injected() -> RepoError {
    RepoError::Database(sqlx::Error::Protocol("injected failure".into()))
}

#[async_trait]
impl Repository for FlakyRepository {
    async fn find_user(&self, user_id: UserId) -> Result<Option<User>, RepoError> {
        self.pause().await;
        self.inner.find_user(user_id).await
    }

    async fn list_channel_ids_for_user(
        &self,
        user_id: UserId,
    ) -> Result<Vec<ChannelId>, RepoError> {
        self.pause().await;
        self.inner.list_channel_ids_for_user(user_id).await
    }

    async fn find_membership(
        &self,
        channel_id: ChannelId,
        user_id: UserId,
    ) -> Result<Option<Membership>, RepoError> {
        self.pause().await;
        self.inner.find_membership(channel_id, user_id).await
    }

    async fn touch_last_read(
        &self,
        channel_id: ChannelId,
        user_id: UserId,
        at: DateTime<Utc>,
    ) -> Result<bool, RepoError> {
        self.pause().await;
        if self.fail_last_read.load(Ordering::SeqCst) {
            return Err(injected());
        }
        self.inner.touch_last_read(channel_id, user_id, at).await
    }

    async fn insert_message(&self, message: &NewMessage) -> Result<(), RepoError> {
        self.pause().await;
        self.inserts.fetch_add(1, Ordering::SeqCst);
        if self.fail_inserts.load(Ordering::SeqCst) {
            return Err(injected());
        }
        self.inner.insert_message(message).await
    }

    async fn find_message_with_author(
        &self,
        message_id: MessageId,
    ) -> Result<Option<MessageWithAuthor>, RepoError> {
        self.pause().await;
        self.inner.find_message_with_author(message_id).await
    }

    async fn list_messages(
        &self,
        channel_id: ChannelId,
        before: Option<DateTime<Utc>>,
        limit: u32,
    ) -> Result<Vec<MessageWithAuthor>, RepoError> {
        self.pause().await;
        self.inner.list_messages(channel_id, before, limit).await
    }

    async fn find_or_create_read_receipt(
        &self,
        channel_id: ChannelId,
        message_id: MessageId,
        user_id: UserId,
        at: DateTime<Utc>,
    ) -> Result<Option<ReadReceipt>, RepoError> {
        self.pause().await;
        self.inner
            .find_or_create_read_receipt(channel_id, message_id, user_id, at)
            .await
    }

    async fn set_presence(
        &self,
        user_id: UserId,
        status: PresenceStatus,
        last_seen: Option<DateTime<Utc>>,
    ) -> Result<(), RepoError> {
        self.pause().await;
        self.inner.set_presence(user_id, status, last_seen).await
    }
}
