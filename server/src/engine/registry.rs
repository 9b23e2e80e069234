use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tokio::sync::mpsc;
use tracing::{debug, info};

use super::error::RegistryError;
use super::events::{ConnectionId, UserId};
use super::session::Connection;

/// Presence transitions derived from connection counts. The registry emits
/// these and never broadcasts anything itself.
#[derive(Debug, Clone, PartialEq)]
pub enum RegistryEvent {
    /// The user's connection count went from 0 to 1.
    UserCameOnline { user_id: UserId, username: String },
    /// The user's connection count dropped to 0.
    UserWentOffline {
        user_id: UserId,
        username: String,
        last_seen: DateTime<Utc>,
    },
}

pub type RegistryEvents = mpsc::UnboundedReceiver<RegistryEvent>;

/// Every live connection, indexed by id and by user.
pub struct ConnectionRegistry {
    connections: DashMap<ConnectionId, Arc<Connection>>,
    /// Per-user connection sets. An entry exists iff the set is non-empty.
    by_user: DashMap<UserId, HashSet<ConnectionId>>,
    events: mpsc::UnboundedSender<RegistryEvent>,
}

impl ConnectionRegistry {
    /// Create an empty registry and the stream of its presence transitions.
    pub fn new() -> (Self, RegistryEvents) {
        let (tx, rx) = mpsc::unbounded_channel();
        let registry = Self {
            connections: DashMap::new(),
            by_user: DashMap::new(),
            events: tx,
        };
        (registry, rx)
    }

    pub fn register(&self, connection: Arc<Connection>) -> Result<(), RegistryError> {
        let connection_id = connection.id;
        let user_id = connection.user_id;
        let username = connection.username.clone();

        match self.connections.entry(connection_id) {
            Entry::Occupied(_) => return Err(RegistryError::DuplicateConnection(connection_id)),
            Entry::Vacant(slot) => {
                slot.insert(connection);
            }
        }

        // The event is emitted while the user's entry is locked so that a
        // concurrent unregister for the same user cannot overtake it.
        let mut set = self.by_user.entry(user_id).or_default();
        let first = set.is_empty();
        set.insert(connection_id);
        if first {
            self.emit(RegistryEvent::UserCameOnline {
                user_id,
                username: username.clone(),
            });
        }
        drop(set);

        info!(%connection_id, %user_id, %username, first, "connection registered");
        Ok(())
    }

    /// Remove a connection. Unknown ids are ignored.
    pub fn unregister(&self, connection_id: ConnectionId) -> Option<Arc<Connection>> {
        let (_, connection) = self.connections.remove(&connection_id)?;
        let user_id = connection.user_id;

        if let Entry::Occupied(mut entry) = self.by_user.entry(user_id) {
            entry.get_mut().remove(&connection_id);
            if entry.get().is_empty() {
                self.emit(RegistryEvent::UserWentOffline {
                    user_id,
                    username: connection.username.clone(),
                    last_seen: Utc::now(),
                });
                entry.remove();
            }
        }

        info!(%connection_id, %user_id, "connection unregistered");
        Some(connection)
    }

    pub fn connections_of(&self, user_id: UserId) -> HashSet<ConnectionId> {
        self.by_user
            .get(&user_id)
            .map(|set| set.clone())
            .unwrap_or_default()
    }

    pub fn is_online(&self, user_id: UserId) -> bool {
        self.by_user.contains_key(&user_id)
    }

    pub fn get(&self, connection_id: ConnectionId) -> Option<Arc<Connection>> {
        self.connections.get(&connection_id).map(|c| c.clone())
    }

    pub fn contains(&self, connection_id: ConnectionId) -> bool {
        self.connections.contains_key(&connection_id)
    }

    /// Snapshot of every live connection.
    pub fn all(&self) -> Vec<Arc<Connection>> {
        self.connections.iter().map(|c| c.value().clone()).collect()
    }

    pub fn online_user_count(&self) -> usize {
        self.by_user.len()
    }

    fn emit(&self, event: RegistryEvent) {
        if self.events.send(event).is_err() {
            debug!("presence listener gone, registry event dropped");
        }
    }
}
