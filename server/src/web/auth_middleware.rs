use std::sync::Arc;

use axum::extract::{FromRequestParts, Query};
use axum::http::request::Parts;
use axum::response::{IntoResponse, Response};
use axum_extra::headers::authorization::Bearer;
use axum_extra::headers::{Authorization, HeaderMapExt};
use serde::Deserialize;

use crate::auth::Identity;

use super::app_state::AppState;
use super::response::ApiError;

#[derive(Deserialize)]
struct TokenParams {
    token: Option<String>,
}

/// Pull the bearer token from the `token` query parameter, a `token` header,
/// or `Authorization: Bearer`, in that order. Blank values are skipped so
/// they never shadow a later source.
pub fn extract_token(parts: &Parts) -> Option<String> {
    let from_query = Query::<TokenParams>::try_from_uri(&parts.uri)
        .ok()
        .and_then(|Query(params)| params.token);
    let from_header = || {
        parts
            .headers
            .get("token")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
    };
    let from_bearer = || {
        parts
            .headers
            .typed_get::<Authorization<Bearer>>()
            .map(|auth| auth.token().to_string())
    };

    non_blank(from_query)
        .or_else(|| non_blank(from_header()))
        .or_else(|| non_blank(from_bearer()))
}

fn non_blank(token: Option<String>) -> Option<String> {
    token
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
}

/// Extractor that authenticates the caller. Use this in any handler that
/// requires an identity; it runs before the handler body and before a
/// WebSocket upgrade.
pub struct AuthUser(pub Identity);

impl FromRequestParts<Arc<AppState>> for AuthUser {
    type Rejection = Response;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let token = extract_token(parts);
        state
            .authenticator
            .authenticate(token.as_deref())
            .await
            .map(AuthUser)
            .map_err(|e| ApiError::from(e).into_response())
    }
}
