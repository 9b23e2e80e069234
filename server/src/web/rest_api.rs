use std::sync::Arc;

use axum::Json;
use axum::extract::rejection::{JsonRejection, PathRejection, QueryRejection};
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::Response;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::engine::events::{ChannelId, MessageId, MessageWithAuthor, ReadReceipt};
use crate::engine::pipeline::SendRequest;

use super::app_state::AppState;
use super::auth_middleware::AuthUser;
use super::response::{ApiError, success};

#[derive(Deserialize)]
pub struct HistoryParams {
    pub before: Option<DateTime<Utc>>,
    pub limit: Option<u32>,
}

#[derive(Serialize)]
struct MessagesData {
    messages: Vec<MessageWithAuthor>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendMessageBody {
    pub content: String,
    #[serde(default)]
    pub reply_to: Option<MessageId>,
}

#[derive(Serialize)]
struct ModerationSummary {
    filtered: bool,
    violations: Vec<String>,
}

#[derive(Serialize)]
struct SentData {
    message: MessageWithAuthor,
    #[serde(skip_serializing_if = "Option::is_none")]
    moderation: Option<ModerationSummary>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarkReadBody {
    pub message_ids: Vec<MessageId>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ReceiptsData {
    read_receipts: Vec<ReadReceipt>,
}

/// Unwrap a JSON body. An oversized body keeps its 413 status; anything else
/// is a bad request.
fn json_body<T>(body: Result<Json<T>, JsonRejection>) -> Result<T, ApiError> {
    match body {
        Ok(Json(value)) => Ok(value),
        Err(e) if e.status() == StatusCode::PAYLOAD_TOO_LARGE => Err(ApiError::new(
            StatusCode::PAYLOAD_TOO_LARGE,
            "PAYLOAD_TOO_LARGE",
            "Request body too large",
        )),
        Err(e) => Err(ApiError::bad_request(e.body_text())),
    }
}

fn channel_path(path: Result<Path<ChannelId>, PathRejection>) -> Result<ChannelId, ApiError> {
    path.map(|Path(id)| id)
        .map_err(|_| ApiError::bad_request("Invalid channel id"))
}

/// GET /api/v1/channels/{channel_id}/messages?before&limit
pub async fn get_channel_messages(
    State(state): State<Arc<AppState>>,
    AuthUser(identity): AuthUser,
    path: Result<Path<ChannelId>, PathRejection>,
    query: Result<Query<HistoryParams>, QueryRejection>,
) -> Result<Response, ApiError> {
    let channel_id = channel_path(path)?;
    let Query(params) = query.map_err(|e| ApiError::bad_request(e.body_text()))?;

    let messages = state
        .engine
        .pipeline()
        .get_messages(identity.user_id, channel_id, params.before, params.limit)
        .await
        .map_err(|e| {
            ApiError::from_query(e, "MESSAGES_RETRIEVAL_ERROR", "Failed to retrieve messages")
        })?;

    Ok(success(StatusCode::OK, MessagesData { messages }))
}

/// POST /api/v1/channels/{channel_id}/messages
///
/// Goes through the same pipeline as the live transport, so the new message
/// is also fanned out to the channel room.
pub async fn send_message(
    State(state): State<Arc<AppState>>,
    AuthUser(identity): AuthUser,
    path: Result<Path<ChannelId>, PathRejection>,
    body: Result<Json<SendMessageBody>, JsonRejection>,
) -> Result<Response, ApiError> {
    let channel_id = channel_path(path)?;
    let body = json_body(body)?;

    let outcome = state
        .engine
        .send_message(
            identity.user_id,
            SendRequest {
                channel_id,
                content: body.content,
                reply_to: body.reply_to,
            },
        )
        .await?;

    info!(
        message_id = %outcome.message.id,
        %channel_id,
        user_id = %identity.user_id,
        "message sent via REST"
    );

    let moderation = (!outcome.violations.is_empty()).then(|| ModerationSummary {
        filtered: outcome.message.is_moderated,
        violations: outcome.violations,
    });
    Ok(success(
        StatusCode::CREATED,
        SentData {
            message: outcome.message,
            moderation,
        },
    ))
}

/// POST /api/v1/channels/{channel_id}/read
pub async fn mark_as_read(
    State(state): State<Arc<AppState>>,
    AuthUser(identity): AuthUser,
    path: Result<Path<ChannelId>, PathRejection>,
    body: Result<Json<MarkReadBody>, JsonRejection>,
) -> Result<Response, ApiError> {
    let channel_id = channel_path(path)?;
    let body = json_body(body)?;

    let read_receipts = state
        .engine
        .pipeline()
        .mark_read(identity.user_id, channel_id, &body.message_ids)
        .await
        .map_err(|e| {
            ApiError::from_query(e, "MARK_READ_ERROR", "Failed to mark messages as read")
        })?;

    Ok(success(StatusCode::OK, ReceiptsData { read_receipts }))
}

/// GET /health
pub async fn health(State(state): State<Arc<AppState>>) -> Response {
    success(
        StatusCode::OK,
        serde_json::json!({
            "status": "ok",
            "environment": state.environment,
            "uptime": state.started_at.elapsed().as_secs_f64(),
            "onlineUsers": state.engine.registry().online_user_count(),
        }),
    )
}

/// Any unmatched route.
pub async fn not_found() -> ApiError {
    ApiError::new(StatusCode::NOT_FOUND, "NOT_FOUND", "Route not found")
}
