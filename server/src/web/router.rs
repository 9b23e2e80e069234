use std::sync::Arc;

use axum::Router;
use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use tower_http::trace::TraceLayer;

use super::app_state::AppState;
use super::{rest_api, ws_handler};

/// Largest accepted request body. Comfortably above a maximal message.
const MAX_BODY_BYTES: usize = 64 * 1024;

/// Build the axum router with all HTTP and WebSocket routes.
pub fn build_router(state: Arc<AppState>) -> Router {
    let api_routes = Router::new()
        .route(
            "/api/v1/channels/{channel_id}/messages",
            get(rest_api::get_channel_messages).post(rest_api::send_message),
        )
        .route(
            "/api/v1/channels/{channel_id}/read",
            post(rest_api::mark_as_read),
        )
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES));

    Router::new()
        .route("/ws", get(ws_handler::ws_upgrade))
        .route("/health", get(rest_api::health))
        .merge(api_routes)
        .fallback(rest_api::not_found)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
