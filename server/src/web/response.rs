use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::error;

use crate::engine::error::{AuthError, QueryError, SendError};

/// Uniform body for every REST response: `{success, data | error, meta}`.
#[derive(Debug, Serialize)]
pub struct Envelope<T: Serialize> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorBody>,
    pub meta: Meta,
}

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub code: &'static str,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

#[derive(Debug, Serialize)]
pub struct Meta {
    pub timestamp: DateTime<Utc>,
}

impl Meta {
    fn now() -> Self {
        Self {
            timestamp: Utc::now(),
        }
    }
}

/// Wrap `data` in a success envelope with the given status.
pub fn success<T: Serialize>(status: StatusCode, data: T) -> Response {
    let body = Envelope {
        success: true,
        data: Some(data),
        error: None,
        meta: Meta::now(),
    };
    (status, Json(body)).into_response()
}

/// A client-facing failure. Renders as an error envelope.
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub code: &'static str,
    pub message: String,
    pub details: Option<serde_json::Value>,
}

impl ApiError {
    pub fn new(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            code,
            message: message.into(),
            details: None,
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "INVALID_REQUEST", message)
    }

    /// Map a read-path failure. `code` and `message` name the operation for
    /// the internal-error case.
    pub fn from_query(err: QueryError, code: &'static str, message: &str) -> Self {
        match err {
            QueryError::NotMember => {
                Self::new(StatusCode::FORBIDDEN, "FORBIDDEN", err.to_string())
            }
            QueryError::PersistenceError(source) => {
                error!(error = %source, code, "read path failed");
                Self::new(StatusCode::INTERNAL_SERVER_ERROR, code, message)
            }
        }
    }
}

impl From<SendError> for ApiError {
    fn from(err: SendError) -> Self {
        let message = err.to_string();
        match err {
            SendError::RateLimited => Self::new(
                StatusCode::TOO_MANY_REQUESTS,
                "MESSAGE_RATE_LIMIT",
                message,
            ),
            SendError::NotMember => Self::new(StatusCode::FORBIDDEN, "FORBIDDEN", message),
            SendError::UserMuted => Self::new(StatusCode::LOCKED, "USER_MUTED", message),
            SendError::InvalidContent(_) => {
                Self::new(StatusCode::BAD_REQUEST, "INVALID_CONTENT", message)
            }
            SendError::ContentBlocked { violations } => Self {
                details: Some(serde_json::json!({ "violations": violations })),
                ..Self::new(StatusCode::UNPROCESSABLE_ENTITY, "CONTENT_BLOCKED", message)
            },
            SendError::ModerationUnavailable => Self::new(
                StatusCode::SERVICE_UNAVAILABLE,
                "MODERATION_UNAVAILABLE",
                message,
            ),
            SendError::PersistenceError(_) | SendError::Interrupted => Self::new(
                StatusCode::INTERNAL_SERVER_ERROR,
                "MESSAGE_SEND_ERROR",
                message,
            ),
        }
    }
}

impl From<AuthError> for ApiError {
    fn from(err: AuthError) -> Self {
        match err {
            AuthError::Unavailable => Self::new(
                StatusCode::SERVICE_UNAVAILABLE,
                "AUTH_UNAVAILABLE",
                err.to_string(),
            ),
            AuthError::MissingToken => {
                Self::new(StatusCode::UNAUTHORIZED, "UNAUTHORIZED", "Access token required")
            }
            AuthError::InvalidToken | AuthError::UnknownUser => {
                Self::new(StatusCode::UNAUTHORIZED, "UNAUTHORIZED", "Invalid token")
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body: Envelope<()> = Envelope {
            success: false,
            data: None,
            error: Some(ErrorBody {
                code: self.code,
                message: self.message,
                details: self.details,
            }),
            meta: Meta::now(),
        };
        (self.status, Json(body)).into_response()
    }
}
