use thiserror::Error;

/// Failures of the repository layer. The display text never leaves the
/// process; callers map these onto their own client-safe errors.
#[derive(Debug, Error)]
pub enum RepoError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("corrupt row: {0}")]
    Corrupt(String),
    #[error("repository call timed out")]
    Timeout,
}

/// Failures of the moderation collaborator.
#[derive(Debug, Error)]
pub enum ModerationError {
    #[error("moderation backend failed: {0}")]
    Backend(String),
    #[error("moderation call timed out")]
    Timeout,
}

/// Rejections raised while authenticating a connection or request.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("no token provided")]
    MissingToken,
    #[error("invalid token")]
    InvalidToken,
    #[error("user not found")]
    UnknownUser,
    /// The user lookup itself failed or timed out.
    #[error("authentication temporarily unavailable")]
    Unavailable,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("connection {0} is already registered")]
    DuplicateConnection(uuid::Uuid),
}

/// Failures of the message-send pipeline, in the order the steps run.
#[derive(Debug, Error)]
pub enum SendError {
    #[error("Message rate limit exceeded. Please slow down.")]
    RateLimited,
    #[error("You are currently muted")]
    UserMuted,
    #[error("You are not a member of this channel")]
    NotMember,
    #[error("Invalid message: {0}")]
    InvalidContent(String),
    #[error("Message blocked by moderation")]
    ContentBlocked { violations: Vec<String> },
    #[error("Moderation is temporarily unavailable")]
    ModerationUnavailable,
    #[error("Failed to send message")]
    PersistenceError(#[source] RepoError),
    /// The detached send task ended without reporting a result.
    #[error("Failed to send message")]
    Interrupted,
}

/// Failures of the read paths (history and read receipts).
#[derive(Debug, Error)]
pub enum QueryError {
    #[error("You are not a member of this channel")]
    NotMember,
    #[error("Failed to access message store")]
    PersistenceError(#[source] RepoError),
}

impl From<RepoError> for SendError {
    fn from(e: RepoError) -> Self {
        Self::PersistenceError(e)
    }
}

impl From<RepoError> for QueryError {
    fn from(e: RepoError) -> Self {
        Self::PersistenceError(e)
    }
}
