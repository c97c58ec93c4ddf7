use thiserror::Error;

/// Top-level error taxonomy for the coordination pipeline.
///
/// `UnresolvedUser` and `InvalidSession` are fatal for the current stage;
/// everything else degrades to a user-visible but non-crashing response.
/// Nothing in this enum may escape the coordinator boundary uncaught.
#[derive(Error, Debug)]
pub enum MotusError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Config error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("User identity could not be resolved")]
    UnresolvedUser,

    #[error("Session {session_id} does not reference an active session")]
    InvalidSession { session_id: uuid::Uuid },

    #[error("Context load degraded: {0}")]
    ContextLoadDegraded(String),

    #[error("Handler for domain '{domain}' failed: {message}")]
    HandlerFailure { domain: String, message: String },

    #[error("Outbound delivery failed: {0}")]
    DeliveryFailure(String),

    #[error("Outbound message failed validation: {0}")]
    ValidationFailure(String),

    #[error("Conversation store unavailable: {0}")]
    StoreUnavailable(String),
}

impl From<crate::store::StoreError> for MotusError {
    fn from(err: crate::store::StoreError) -> Self {
        use crate::store::StoreError;
        match err {
            StoreError::InvalidSession { session_id } => Self::InvalidSession { session_id },
            StoreError::Database(e) => Self::Database(e),
            StoreError::Unavailable(msg) => Self::StoreUnavailable(msg),
        }
    }
}
