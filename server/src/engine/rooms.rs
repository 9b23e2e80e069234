use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tracing::{debug, info, warn};

use super::error::RepoError;
use super::events::{ChannelId, ConnectionId, ServerEvent, UserId};
use super::registry::ConnectionRegistry;
use super::session::Delivery;
use crate::db::repository::{Repository, bounded};

/// In-memory channel rooms: which live connections receive a channel's events.
pub struct RoomManager {
    /// channel -> subscribed connections. Empty rooms are removed.
    rooms: DashMap<ChannelId, HashSet<ConnectionId>>,
    /// connection -> channels it is subscribed to.
    joined: DashMap<ConnectionId, HashSet<ChannelId>>,
    registry: Arc<ConnectionRegistry>,
    repo: Arc<dyn Repository>,
    repo_timeout: Duration,
}

impl RoomManager {
    pub fn new(
        registry: Arc<ConnectionRegistry>,
        repo: Arc<dyn Repository>,
        repo_timeout: Duration,
    ) -> Self {
        Self {
            rooms: DashMap::new(),
            joined: DashMap::new(),
            registry,
            repo,
            repo_timeout,
        }
    }

    /// Subscribe a connection to the room of every channel its user belongs
    /// to. Returns the set of channels the connection is now in.
    pub async fn join_channels(
        &self,
        connection_id: ConnectionId,
        user_id: UserId,
    ) -> Result<HashSet<ChannelId>, RepoError> {
        // No lock is held across the lookup.
        let channel_ids =
            bounded(self.repo_timeout, self.repo.list_channel_ids_for_user(user_id)).await?;

        for &channel_id in &channel_ids {
            self.rooms.entry(channel_id).or_default().insert(connection_id);
            self.joined.entry(connection_id).or_default().insert(channel_id);
        }

        // The connection may have gone away while memberships were loading.
        // Disconnect unregisters before leaving rooms, so checking after the
        // inserts leaves no orphaned subscription either way.
        if !self.registry.contains(connection_id) {
            debug!(%connection_id, "connection closed during join, undoing subscriptions");
            self.leave_all(connection_id);
            return Ok(HashSet::new());
        }

        let joined = self.rooms_of(connection_id);
        info!(%connection_id, %user_id, count = joined.len(), "joined channel rooms");
        Ok(joined)
    }

    /// Remove a connection from every room it occupies.
    pub fn leave_all(&self, connection_id: ConnectionId) -> HashSet<ChannelId> {
        let Some((_, channel_ids)) = self.joined.remove(&connection_id) else {
            return HashSet::new();
        };
        for channel_id in &channel_ids {
            self.remove_from_room(*channel_id, connection_id);
        }
        channel_ids
    }

    /// Point-in-time membership check, always read from the repository.
    pub async fn is_member(&self, channel_id: ChannelId, user_id: UserId) -> Result<bool, RepoError> {
        let membership =
            bounded(self.repo_timeout, self.repo.find_membership(channel_id, user_id)).await?;
        Ok(membership.is_some())
    }

    /// Deliver an event to every connection in the room except `exclude`.
    /// Returns how many connections accepted it.
    ///
    /// Enqueueing never waits on a connection. Broadcasts to the same room are
    /// serialized, so every member observes them in the same order. A full
    /// queue loses only this event; closed or vanished connections are pruned
    /// from the room afterwards.
    pub fn broadcast(
        &self,
        channel_id: ChannelId,
        event: &ServerEvent,
        exclude: Option<ConnectionId>,
    ) -> usize {
        let mut delivered = 0;
        let mut dead = Vec::new();

        {
            let Some(room) = self.rooms.get_mut(&channel_id) else {
                return 0;
            };
            for &member_id in room.iter() {
                if Some(member_id) == exclude {
                    continue;
                }
                let Some(connection) = self.registry.get(member_id) else {
                    dead.push(member_id);
                    continue;
                };
                match connection.send(event.clone()) {
                    Delivery::Delivered => delivered += 1,
                    Delivery::Dropped => {
                        warn!(%member_id, %channel_id, "outbound queue full, event dropped");
                    }
                    Delivery::Closed => dead.push(member_id),
                }
            }
        }

        for member_id in dead {
            debug!(%member_id, %channel_id, "pruning dead connection from room");
            self.remove_from_room(channel_id, member_id);
            if let Some(mut channels) = self.joined.get_mut(&member_id) {
                channels.remove(&channel_id);
            }
            self.joined.remove_if(&member_id, |_, channels| channels.is_empty());
        }

        delivered
    }

    pub fn rooms_of(&self, connection_id: ConnectionId) -> HashSet<ChannelId> {
        self.joined
            .get(&connection_id)
            .map(|c| c.clone())
            .unwrap_or_default()
    }

    pub fn members_of(&self, channel_id: ChannelId) -> HashSet<ConnectionId> {
        self.rooms
            .get(&channel_id)
            .map(|r| r.clone())
            .unwrap_or_default()
    }

    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }

    fn remove_from_room(&self, channel_id: ChannelId, connection_id: ConnectionId) {
        if let Some(mut room) = self.rooms.get_mut(&channel_id) {
            room.remove(&connection_id);
        }
        self.rooms.remove_if(&channel_id, |_, room| room.is_empty());
    }
}
