use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use super::token::TokenVerifier;
use crate::db::repository::{Repository, bounded};
use crate::engine::error::AuthError;
use crate::engine::events::UserId;

/// Who a connection or request acts as.
#[derive(Debug, Clone, PartialEq)]
pub struct Identity {
    pub user_id: UserId,
    pub username: String,
    pub profile_picture: Option<String>,
}

/// Turns a bearer token into an [`Identity`]. Runs before anything is
/// registered for the caller.
pub struct Authenticator {
    verifier: Arc<dyn TokenVerifier>,
    repo: Arc<dyn Repository>,
    repo_timeout: Duration,
}

impl Authenticator {
    pub fn new(
        verifier: Arc<dyn TokenVerifier>,
        repo: Arc<dyn Repository>,
        repo_timeout: Duration,
    ) -> Self {
        Self {
            verifier,
            repo,
            repo_timeout,
        }
    }

    pub async fn authenticate(&self, raw_token: Option<&str>) -> Result<Identity, AuthError> {
        let token = raw_token
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .ok_or(AuthError::MissingToken)?;

        let subject = self.verifier.verify(token).map_err(|e| {
            debug!(error = %e, "token rejected");
            AuthError::InvalidToken
        })?;
        let user_id: UserId = subject.parse().map_err(|_| {
            debug!(%subject, "token subject is not a user id");
            AuthError::InvalidToken
        })?;

        match bounded(self.repo_timeout, self.repo.find_user(user_id)).await {
            Ok(Some(user)) => Ok(Identity {
                user_id: user.id,
                username: user.username,
                profile_picture: user.profile_picture,
            }),
            Ok(None) => Err(AuthError::UnknownUser),
            Err(e) => {
                warn!(%user_id, error = %e, "user lookup failed during authentication");
                Err(AuthError::Unavailable)
            }
        }
    }
}
