use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::auth::Authenticator;
use crate::engine::chat_engine::ChatEngine;

/// Shared state handed to every axum handler.
pub struct AppState {
    pub engine: Arc<ChatEngine>,
    pub authenticator: Authenticator,
    /// Interval between WebSocket pings.
    pub heartbeat_interval: Duration,
    /// Deployment name reported by /health.
    pub environment: String,
    pub started_at: Instant,
}
