use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

use super::events::{ConnectionId, ServerEvent, UserId};

/// Default bound on queued outbound events per connection (slow clients lose
/// events instead of growing memory).
pub const MAX_OUTBOUND_QUEUE: usize = 1024;

/// What happened to an event handed to a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Delivered,
    /// The outbound queue is full; this event was dropped.
    Dropped,
    /// The connection's write loop is gone.
    Closed,
}

/// One live, authenticated transport session. A user may hold several.
#[derive(Debug)]
pub struct Connection {
    pub id: ConnectionId,
    pub user_id: UserId,
    pub username: String,
    /// Feeds this connection's write loop.
    outbound: mpsc::Sender<ServerEvent>,
}

impl Connection {
    pub fn new(
        id: ConnectionId,
        user_id: UserId,
        username: String,
        outbound: mpsc::Sender<ServerEvent>,
    ) -> Self {
        Self {
            id,
            user_id,
            username,
            outbound,
        }
    }

    /// Queue an event without waiting. Never blocks the caller.
    pub fn send(&self, event: ServerEvent) -> Delivery {
        match self.outbound.try_send(event) {
            Ok(()) => Delivery::Delivered,
            Err(TrySendError::Full(_)) => Delivery::Dropped,
            Err(TrySendError::Closed(_)) => Delivery::Closed,
        }
    }
}
