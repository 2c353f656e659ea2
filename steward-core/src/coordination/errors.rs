use thiserror::Error;

pub type Result<T> = std::result::Result<T, CoordinationError>;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CoordinationError {
    #[error("Connection to the coordination service lost: {0}")]
    ConnectionLoss(String),

    #[error("Coordination service unreachable at {0}")]
    Unreachable(String),

    #[error("Coordination session expired")]
    SessionExpired,

    #[error("Coordination session closed")]
    SessionClosed,

    #[error("Node does not exist: {0}")]
    NoNode(String),

    #[error("Invalid path: {0}")]
    InvalidPath(String),

    #[error("Unsupported coordination backend: {0}")]
    UnsupportedBackend(String),

    #[error("Watch error: {0}")]
    WatchError(String),
}

impl CoordinationError {
    /// Transient failures that a [`RetryPolicy`](super::RetryPolicy) may retry.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            CoordinationError::ConnectionLoss(_) | CoordinationError::Unreachable(_)
        )
    }
}
