use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use super::events::{ChannelId, PresenceStatus, ServerEvent, UserId};
use super::registry::{ConnectionRegistry, RegistryEvent, RegistryEvents};
use super::rooms::RoomManager;
use super::session::{Connection, Delivery};
use crate::db::repository::{Repository, bounded};

/// Turns registry transitions into durable presence and global broadcasts,
/// and relays typing indicators.
pub struct PresenceTracker {
    registry: Arc<ConnectionRegistry>,
    rooms: Arc<RoomManager>,
    repo: Arc<dyn Repository>,
    repo_timeout: Duration,
}

impl PresenceTracker {
    pub fn new(
        registry: Arc<ConnectionRegistry>,
        rooms: Arc<RoomManager>,
        repo: Arc<dyn Repository>,
        repo_timeout: Duration,
    ) -> Self {
        Self {
            registry,
            rooms,
            repo,
            repo_timeout,
        }
    }

    /// Consume registry events until the registry is dropped. Events are
    /// handled one at a time, so a user's transitions apply in order.
    pub async fn run(self: Arc<Self>, mut events: RegistryEvents) {
        while let Some(event) = events.recv().await {
            self.handle(event).await;
        }
        debug!("registry event stream closed, presence tracker stopping");
    }

    pub async fn handle(&self, event: RegistryEvent) {
        match event {
            RegistryEvent::UserCameOnline { user_id, username } => {
                self.persist(user_id, PresenceStatus::Online, None).await;
                let event = ServerEvent::UserOnline {
                    user_id,
                    username: username.clone(),
                    status: PresenceStatus::Online,
                };
                let sent = self.broadcast_global(&event, Some(user_id));
                info!(%user_id, %username, recipients = sent, "user online");
            }
            RegistryEvent::UserWentOffline {
                user_id,
                username,
                last_seen,
            } => {
                self.persist(user_id, PresenceStatus::Offline, Some(last_seen))
                    .await;
                let event = ServerEvent::UserOffline {
                    user_id,
                    username: username.clone(),
                    status: PresenceStatus::Offline,
                    last_seen,
                };
                let sent = self.broadcast_global(&event, None);
                info!(%user_id, %username, recipients = sent, "user offline");
            }
        }
    }

    /// Re-emit a typing indicator to the channel room, minus the sender.
    /// Pure pass-through: nothing is stored or throttled.
    pub fn relay_typing(
        &self,
        sender: &Connection,
        channel_id: ChannelId,
        is_typing: bool,
    ) -> usize {
        let event = ServerEvent::UserTyping {
            user_id: sender.user_id,
            username: sender.username.clone(),
            channel_id,
            is_typing,
        };
        self.rooms.broadcast(channel_id, &event, Some(sender.id))
    }

    async fn persist(
        &self,
        user_id: UserId,
        status: PresenceStatus,
        last_seen: Option<chrono::DateTime<chrono::Utc>>,
    ) {
        let result = bounded(
            self.repo_timeout,
            self.repo.set_presence(user_id, status, last_seen),
        )
        .await;
        if let Err(e) = result {
            warn!(%user_id, status = status.as_str(), error = %e, "failed to persist presence");
        }
    }

    /// Send to every live connection, skipping those of `exclude_user`.
    fn broadcast_global(&self, event: &ServerEvent, exclude_user: Option<UserId>) -> usize {
        let mut sent = 0;
        for connection in self.registry.all() {
            if Some(connection.user_id) == exclude_user {
                continue;
            }
            match connection.send(event.clone()) {
                Delivery::Delivered => sent += 1,
                Delivery::Dropped => {
                    warn!(connection_id = %connection.id, "outbound queue full, presence event dropped");
                }
                Delivery::Closed => {}
            }
        }
        sent
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{add_member, create_channel, create_user, setup_repo};
    use chrono::Utc;
    use tokio::sync::mpsc;
    use uuid::Uuid;

    const TIMEOUT: Duration = Duration::from_secs(5);

    struct Harness {
        pool: sqlx::SqlitePool,
        registry: Arc<ConnectionRegistry>,
        rooms: Arc<RoomManager>,
        tracker: PresenceTracker,
        events: RegistryEvents,
    }

    async fn harness() -> Harness {
        let (pool, repo) = setup_repo().await;
        let (registry, events) = ConnectionRegistry::new();
        let registry = Arc::new(registry);
        let rooms = Arc::new(RoomManager::new(registry.clone(), repo.clone(), TIMEOUT));
        let tracker = PresenceTracker::new(registry.clone(), rooms.clone(), repo, TIMEOUT);
        Harness {
            pool,
            registry,
            rooms,
            tracker,
            events,
        }
    }

    fn connect(
        registry: &ConnectionRegistry,
        user_id: UserId,
        username: &str,
    ) -> (Arc<Connection>, mpsc::Receiver<ServerEvent>) {
        let (tx, rx) = mpsc::channel(16);
        let conn = Arc::new(Connection::new(Uuid::new_v4(), user_id, username.into(), tx));
        registry.register(conn.clone()).unwrap();
        (conn, rx)
    }

    #[tokio::test]
    async fn test_online_transition_persists_and_broadcasts_to_others() {
        let mut h = harness().await;
        let alice = create_user(&h.pool, "alice").await;
        let bob = create_user(&h.pool, "bob").await;

        let (_b, mut rx_b) = connect(&h.registry, bob, "bob");
        let bob_online = h.events.try_recv().unwrap();
        h.tracker.handle(bob_online).await;

        let (_a, mut rx_a) = connect(&h.registry, alice, "alice");
        let alice_online = h.events.try_recv().unwrap();
        h.tracker.handle(alice_online).await;

        match rx_b.try_recv().unwrap() {
            ServerEvent::UserOnline {
                user_id,
                username,
                status,
            } => {
                assert_eq!(user_id, alice);
                assert_eq!(username, "alice");
                assert_eq!(status, PresenceStatus::Online);
            }
            other => panic!("Expected UserOnline, got {:?}", other),
        }
        // Alice is not told about herself
        assert!(rx_a.try_recv().is_err());

        let row = crate::db::queries::users::get_user(&h.pool, &alice.to_string())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(row.status, "online");
    }

    #[tokio::test]
    async fn test_offline_transition_records_last_seen() {
        let mut h = harness().await;
        let alice = create_user(&h.pool, "alice").await;
        let bob = create_user(&h.pool, "bob").await;

        let (_b, mut rx_b) = connect(&h.registry, bob, "bob");
        let (a, _rx_a) = connect(&h.registry, alice, "alice");
        h.registry.unregister(a.id);

        while let Ok(event) = h.events.try_recv() {
            h.tracker.handle(event).await;
        }

        let mut offline = Vec::new();
        while let Ok(event) = rx_b.try_recv() {
            if let ServerEvent::UserOffline { user_id, last_seen, .. } = event {
                offline.push((user_id, last_seen));
            }
        }
        assert_eq!(offline.len(), 1);
        assert_eq!(offline[0].0, alice);

        let row = crate::db::queries::users::get_user(&h.pool, &alice.to_string())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(row.status, "offline");
        assert!(row.last_seen_at.is_some());
    }

    #[tokio::test]
    async fn test_offline_for_unknown_user_still_broadcasts() {
        let h = harness().await;
        let bob = create_user(&h.pool, "bob").await;
        let (_b, mut rx_b) = connect(&h.registry, bob, "bob");

        h.tracker
            .handle(RegistryEvent::UserWentOffline {
                user_id: Uuid::new_v4(),
                username: "ghost".into(),
                last_seen: Utc::now(),
            })
            .await;
        assert!(matches!(
            rx_b.try_recv().unwrap(),
            ServerEvent::UserOffline { .. }
        ));
    }

    #[tokio::test]
    async fn test_typing_relayed_to_room_except_sender() {
        let h = harness().await;
        let alice = create_user(&h.pool, "alice").await;
        let bob = create_user(&h.pool, "bob").await;
        let general = create_channel(&h.pool, "general").await;
        add_member(&h.pool, general, alice).await;
        add_member(&h.pool, general, bob).await;

        let (a, mut rx_a) = connect(&h.registry, alice, "alice");
        let (b, mut rx_b) = connect(&h.registry, bob, "bob");
        h.rooms.join_channels(a.id, alice).await.unwrap();
        h.rooms.join_channels(b.id, bob).await.unwrap();

        assert_eq!(h.tracker.relay_typing(&a, general, true), 1);
        assert_eq!(h.tracker.relay_typing(&a, general, false), 1);

        assert_eq!(
            rx_b.try_recv().unwrap(),
            ServerEvent::UserTyping {
                user_id: alice,
                username: "alice".into(),
                channel_id: general,
                is_typing: true,
            }
        );
        assert!(matches!(
            rx_b.try_recv().unwrap(),
            ServerEvent::UserTyping { is_typing: false, .. }
        ));
        assert!(rx_a.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_typing_flurry_is_not_throttled() {
        let h = harness().await;
        let alice = create_user(&h.pool, "alice").await;
        let bob = create_user(&h.pool, "bob").await;
        let general = create_channel(&h.pool, "general").await;
        add_member(&h.pool, general, alice).await;
        add_member(&h.pool, general, bob).await;

        let (a, _rx_a) = connect(&h.registry, alice, "alice");
        let (b, mut rx_b) = connect(&h.registry, bob, "bob");
        h.rooms.join_channels(a.id, alice).await.unwrap();
        h.rooms.join_channels(b.id, bob).await.unwrap();

        for i in 0..10 {
            h.tracker.relay_typing(&a, general, i % 2 == 0);
        }
        let mut received = 0;
        while rx_b.try_recv().is_ok() {
            received += 1;
        }
        assert_eq!(received, 10);
    }
}
