use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};
use uuid::Uuid;

use super::error::{RegistryError, SendError};
use super::events::{ClientCommand, ConnectionId, ServerEvent, UserId};
use super::moderation::Moderator;
use super::pipeline::{MessagePipeline, SendOutcome, SendRequest};
use super::presence::PresenceTracker;
use super::rate_limiter::RateLimiter;
use super::registry::{ConnectionRegistry, RegistryEvents};
use super::rooms::RoomManager;
use super::session::{Connection, MAX_OUTBOUND_QUEUE};
use super::validation::MAX_MESSAGE_LENGTH;
use crate::db::repository::Repository;

/// Tunables shared by the engine components.
#[derive(Debug, Clone)]
pub struct EngineSettings {
    /// Upper bound on any single repository call.
    pub repository_timeout: Duration,
    /// Upper bound on any single moderation call.
    pub moderation_timeout: Duration,
    pub outbound_queue_size: usize,
    pub max_message_length: usize,
    /// Sends allowed per user within `message_rate_window`.
    pub message_rate_limit: u32,
    pub message_rate_window: Duration,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            repository_timeout: Duration::from_millis(5000),
            moderation_timeout: Duration::from_millis(2000),
            outbound_queue_size: MAX_OUTBOUND_QUEUE,
            max_message_length: MAX_MESSAGE_LENGTH,
            message_rate_limit: 60,
            message_rate_window: Duration::from_secs(60),
        }
    }
}

/// The central hub. Transports hand it connections and decoded commands; each
/// command maps to exactly one component call.
pub struct ChatEngine {
    registry: Arc<ConnectionRegistry>,
    rooms: Arc<RoomManager>,
    presence: Arc<PresenceTracker>,
    pipeline: Arc<MessagePipeline>,
    message_limiter: RateLimiter,
    settings: EngineSettings,
}

impl ChatEngine {
    /// Build the engine. The returned stream must be handed to
    /// [`ChatEngine::spawn_presence`] for presence transitions to take effect.
    pub fn new(
        repo: Arc<dyn Repository>,
        moderator: Arc<dyn Moderator>,
        settings: EngineSettings,
    ) -> (Self, RegistryEvents) {
        let (registry, events) = ConnectionRegistry::new();
        let registry = Arc::new(registry);
        let rooms = Arc::new(RoomManager::new(
            registry.clone(),
            repo.clone(),
            settings.repository_timeout,
        ));
        let presence = Arc::new(PresenceTracker::new(
            registry.clone(),
            rooms.clone(),
            repo.clone(),
            settings.repository_timeout,
        ));
        let pipeline = Arc::new(MessagePipeline::new(
            rooms.clone(),
            repo,
            moderator,
            settings.clone(),
        ));

        let engine = Self {
            registry,
            rooms,
            presence,
            pipeline,
            message_limiter: RateLimiter::new(
                settings.message_rate_limit,
                settings.message_rate_window,
            ),
            settings,
        };
        (engine, events)
    }

    /// Run the presence tracker on its own task.
    pub fn spawn_presence(&self, events: RegistryEvents) -> JoinHandle<()> {
        tokio::spawn(self.presence.clone().run(events))
    }

    // ── Connection lifecycle ────────────────────────────────────────

    /// Register an authenticated connection. Returns its id and the receiver
    /// its write loop drains. The first queued event is `ready`.
    pub fn connect(
        &self,
        user_id: UserId,
        username: String,
    ) -> Result<(ConnectionId, mpsc::Receiver<ServerEvent>), RegistryError> {
        let connection_id = Uuid::new_v4();
        let (tx, rx) = mpsc::channel(self.settings.outbound_queue_size.max(1));
        let connection = Arc::new(Connection::new(connection_id, user_id, username.clone(), tx));

        connection.send(ServerEvent::Ready { user_id, username });
        self.registry.register(connection)?;
        Ok((connection_id, rx))
    }

    /// Tear down every live connection. Returns how many were closed.
    pub fn disconnect_all(&self) -> usize {
        let connections = self.registry.all();
        for connection in &connections {
            self.disconnect(connection.id);
        }
        connections.len()
    }

    /// Tear down a connection. Safe to call more than once.
    pub fn disconnect(&self, connection_id: ConnectionId) {
        // Unregister before leaving rooms; join_channels relies on this order.
        let Some(connection) = self.registry.unregister(connection_id) else {
            return;
        };
        let left = self.rooms.leave_all(connection_id);
        info!(
            %connection_id,
            user_id = %connection.user_id,
            rooms = left.len(),
            "connection closed"
        );
    }

    // ── Command dispatch ────────────────────────────────────────────

    /// Handle one inbound command. Failures are reported to the issuing
    /// connection as an `error` event.
    pub async fn dispatch(&self, connection_id: ConnectionId, command: ClientCommand) {
        let Some(connection) = self.registry.get(connection_id) else {
            warn!(%connection_id, "command from unknown connection ignored");
            return;
        };

        match command {
            ClientCommand::JoinChannels => {
                if let Err(e) = self
                    .rooms
                    .join_channels(connection_id, connection.user_id)
                    .await
                {
                    error!(%connection_id, error = %e, "failed to join channel rooms");
                    connection.send(ServerEvent::Error {
                        message: "Failed to join channels".into(),
                    });
                }
            }
            ClientCommand::SendMessage {
                channel_id,
                content,
                reply_to,
            } => {
                let request = SendRequest {
                    channel_id,
                    content,
                    reply_to,
                };
                if let Err(e) = self.send_message(connection.user_id, request).await {
                    connection.send(ServerEvent::Error {
                        message: e.to_string(),
                    });
                }
            }
            ClientCommand::TypingStart { channel_id } => {
                self.presence.relay_typing(&connection, channel_id, true);
            }
            ClientCommand::TypingStop { channel_id } => {
                self.presence.relay_typing(&connection, channel_id, false);
            }
        }
    }

    /// Run a send on its own task and wait for it. Dropping the returned
    /// future (a closed socket, an aborted HTTP request) does not cancel the
    /// send; it still commits and fans out. Rate limiting is checked first
    /// and applies to every transport.
    pub async fn send_message(
        &self,
        user_id: UserId,
        request: SendRequest,
    ) -> Result<SendOutcome, SendError> {
        if !self.message_limiter.check(user_id) {
            warn!(%user_id, "message rate limit exceeded");
            return Err(SendError::RateLimited);
        }

        let pipeline = self.pipeline.clone();
        let handle = tokio::spawn(async move { pipeline.send(user_id, request).await });
        match handle.await {
            Ok(result) => result,
            Err(e) => {
                error!(%user_id, error = %e, "send task failed");
                Err(SendError::Interrupted)
            }
        }
    }

    /// Queue an `error` event for a single connection.
    pub fn report_error(&self, connection_id: ConnectionId, message: impl Into<String>) {
        if let Some(connection) = self.registry.get(connection_id) {
            connection.send(ServerEvent::Error {
                message: message.into(),
            });
        }
    }

    /// Forget rate-limit state for users idle longer than `older_than`.
    pub fn cleanup_rate_limits(&self, older_than: Duration) {
        self.message_limiter.cleanup(older_than);
    }

    // ── Accessors ───────────────────────────────────────────────────

    pub fn pipeline(&self) -> &MessagePipeline {
        &self.pipeline
    }

    pub fn registry(&self) -> &ConnectionRegistry {
        &self.registry
    }

    pub fn rooms(&self) -> &RoomManager {
        &self.rooms
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::repository::SqliteRepository;
    use crate::engine::events::PresenceStatus;
    use crate::test_support::{
        StubModerator, add_member, create_channel, create_user, drain, message_count, next_event,
        setup_db,
    };

    async fn setup_engine() -> (sqlx::SqlitePool, Arc<ChatEngine>) {
        setup_engine_with(EngineSettings::default()).await
    }

    async fn setup_engine_with(settings: EngineSettings) -> (sqlx::SqlitePool, Arc<ChatEngine>) {
        let pool = setup_db().await;
        let repo = Arc::new(SqliteRepository::new(pool.clone()));
        let (engine, events) =
            ChatEngine::new(repo, Arc::new(StubModerator::default()), settings);
        engine.spawn_presence(events);
        (pool, Arc::new(engine))
    }

    fn say(channel_id: Uuid, content: &str) -> SendRequest {
        SendRequest {
            channel_id,
            content: content.into(),
            reply_to: None,
        }
    }

    #[tokio::test]
    async fn test_connect_sends_ready_and_registers() {
        let (pool, engine) = setup_engine().await;
        let alice = create_user(&pool, "alice").await;

        let (cid, mut rx) = engine.connect(alice, "alice".into()).unwrap();
        assert_eq!(
            next_event(&mut rx).await,
            ServerEvent::Ready {
                user_id: alice,
                username: "alice".into()
            }
        );
        assert!(engine.registry().is_online(alice));

        engine.disconnect(cid);
        assert!(!engine.registry().is_online(alice));
        // Double disconnect is harmless
        engine.disconnect(cid);
    }

    #[tokio::test]
    async fn test_join_and_message() {
        let (pool, engine) = setup_engine().await;
        let alice = create_user(&pool, "alice").await;
        let bob = create_user(&pool, "bob").await;
        let general = create_channel(&pool, "general").await;
        add_member(&pool, general, alice).await;
        add_member(&pool, general, bob).await;

        let (a, mut rx_a) = engine.connect(alice, "alice".into()).unwrap();
        let (b, mut rx_b) = engine.connect(bob, "bob".into()).unwrap();
        engine.dispatch(a, ClientCommand::JoinChannels).await;
        engine.dispatch(b, ClientCommand::JoinChannels).await;
        drain(&mut rx_a).await;
        drain(&mut rx_b).await;

        engine
            .dispatch(
                a,
                ClientCommand::SendMessage {
                    channel_id: general,
                    content: "Hello from Alice!".into(),
                    reply_to: None,
                },
            )
            .await;

        for rx in [&mut rx_a, &mut rx_b] {
            match next_event(rx).await {
                ServerEvent::NewMessage { message } => {
                    assert_eq!(message.content, "Hello from Alice!");
                    assert_eq!(message.user.id, alice);
                }
                other => panic!("Expected NewMessage, got {:?}", other),
            }
        }
    }

    #[tokio::test]
    async fn test_pipeline_failure_reported_to_sender_only() {
        let (pool, engine) = setup_engine().await;
        let mallory = create_user(&pool, "mallory").await;
        let general = create_channel(&pool, "general").await;

        let (m, mut rx) = engine.connect(mallory, "mallory".into()).unwrap();
        drain(&mut rx).await;

        engine
            .dispatch(
                m,
                ClientCommand::SendMessage {
                    channel_id: general,
                    content: "let me in".into(),
                    reply_to: None,
                },
            )
            .await;

        assert_eq!(
            next_event(&mut rx).await,
            ServerEvent::Error {
                message: "You are not a member of this channel".into()
            }
        );
    }

    #[tokio::test]
    async fn test_presence_broadcast_on_connect_and_disconnect() {
        let (pool, engine) = setup_engine().await;
        let alice = create_user(&pool, "alice").await;
        let bob = create_user(&pool, "bob").await;

        let (_b, mut rx_b) = engine.connect(bob, "bob".into()).unwrap();
        drain(&mut rx_b).await;

        let (a, _rx_a) = engine.connect(alice, "alice".into()).unwrap();
        assert_eq!(
            next_event(&mut rx_b).await,
            ServerEvent::UserOnline {
                user_id: alice,
                username: "alice".into(),
                status: PresenceStatus::Online,
            }
        );

        engine.disconnect(a);
        match next_event(&mut rx_b).await {
            ServerEvent::UserOffline { user_id, status, .. } => {
                assert_eq!(user_id, alice);
                assert_eq!(status, PresenceStatus::Offline);
            }
            other => panic!("Expected UserOffline, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_typing_relay_via_dispatch() {
        let (pool, engine) = setup_engine().await;
        let alice = create_user(&pool, "alice").await;
        let bob = create_user(&pool, "bob").await;
        let general = create_channel(&pool, "general").await;
        add_member(&pool, general, alice).await;
        add_member(&pool, general, bob).await;

        let (a, mut rx_a) = engine.connect(alice, "alice".into()).unwrap();
        let (b, mut rx_b) = engine.connect(bob, "bob".into()).unwrap();
        engine.dispatch(a, ClientCommand::JoinChannels).await;
        engine.dispatch(b, ClientCommand::JoinChannels).await;
        drain(&mut rx_a).await;
        drain(&mut rx_b).await;

        engine
            .dispatch(a, ClientCommand::TypingStart { channel_id: general })
            .await;
        assert!(matches!(
            next_event(&mut rx_b).await,
            ServerEvent::UserTyping { is_typing: true, .. }
        ));
        assert!(rx_a.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_disconnect_leaves_rooms() {
        let (pool, engine) = setup_engine().await;
        let alice = create_user(&pool, "alice").await;
        let general = create_channel(&pool, "general").await;
        add_member(&pool, general, alice).await;

        let (a, _rx) = engine.connect(alice, "alice".into()).unwrap();
        engine.dispatch(a, ClientCommand::JoinChannels).await;
        assert!(engine.rooms().members_of(general).contains(&a));

        engine.disconnect(a);
        assert!(engine.rooms().members_of(general).is_empty());
        assert_eq!(engine.rooms().room_count(), 0);
    }

    #[tokio::test]
    async fn test_send_rate_limited_per_user() {
        let (pool, engine) = setup_engine_with(EngineSettings {
            message_rate_limit: 2,
            ..EngineSettings::default()
        })
        .await;
        let alice = create_user(&pool, "alice").await;
        let bob = create_user(&pool, "bob").await;
        let general = create_channel(&pool, "general").await;
        add_member(&pool, general, alice).await;
        add_member(&pool, general, bob).await;

        engine.send_message(alice, say(general, "one")).await.unwrap();
        engine.send_message(alice, say(general, "two")).await.unwrap();
        let err = engine
            .send_message(alice, say(general, "three"))
            .await
            .unwrap_err();
        assert!(matches!(err, SendError::RateLimited));
        assert_eq!(message_count(&pool, general).await, 2);

        // Other users keep their own budget
        engine.send_message(bob, say(general, "hi")).await.unwrap();
    }

    #[tokio::test]
    async fn test_rate_limited_dispatch_reports_error_and_typing_still_relays() {
        let (pool, engine) = setup_engine_with(EngineSettings {
            message_rate_limit: 1,
            ..EngineSettings::default()
        })
        .await;
        let alice = create_user(&pool, "alice").await;
        let bob = create_user(&pool, "bob").await;
        let general = create_channel(&pool, "general").await;
        add_member(&pool, general, alice).await;
        add_member(&pool, general, bob).await;

        let (a, mut rx_a) = engine.connect(alice, "alice".into()).unwrap();
        let (b, mut rx_b) = engine.connect(bob, "bob".into()).unwrap();
        engine.dispatch(a, ClientCommand::JoinChannels).await;
        engine.dispatch(b, ClientCommand::JoinChannels).await;
        engine.send_message(alice, say(general, "first")).await.unwrap();
        drain(&mut rx_a).await;
        drain(&mut rx_b).await;

        engine
            .dispatch(
                a,
                ClientCommand::SendMessage {
                    channel_id: general,
                    content: "second".into(),
                    reply_to: None,
                },
            )
            .await;
        assert_eq!(
            next_event(&mut rx_a).await,
            ServerEvent::Error {
                message: "Message rate limit exceeded. Please slow down.".into()
            }
        );
        assert!(rx_b.try_recv().is_err());

        for _ in 0..5 {
            engine
                .dispatch(a, ClientCommand::TypingStart { channel_id: general })
                .await;
            assert!(matches!(
                next_event(&mut rx_b).await,
                ServerEvent::UserTyping { is_typing: true, .. }
            ));
        }
    }

    #[tokio::test]
    async fn test_disconnect_all_closes_every_connection() {
        let (pool, engine) = setup_engine().await;
        let alice = create_user(&pool, "alice").await;
        let bob = create_user(&pool, "bob").await;
        let general = create_channel(&pool, "general").await;
        add_member(&pool, general, alice).await;

        let (a, _rx_a) = engine.connect(alice, "alice".into()).unwrap();
        let (_a2, _rx_a2) = engine.connect(alice, "alice".into()).unwrap();
        let (_b, _rx_b) = engine.connect(bob, "bob".into()).unwrap();
        engine.dispatch(a, ClientCommand::JoinChannels).await;

        assert_eq!(engine.disconnect_all(), 3);
        assert!(!engine.registry().is_online(alice));
        assert!(!engine.registry().is_online(bob));
        assert_eq!(engine.rooms().room_count(), 0);
        assert_eq!(engine.disconnect_all(), 0);
    }
}
