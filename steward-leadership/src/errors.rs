use std::time::Duration;
use steward_core::coordination::CoordinationError;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, LeadershipError>;

/// Error raised by an embedding application's duty callbacks.
pub type DutyError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Error, Debug)]
pub enum LeadershipError {
    #[error("cannot join the election through {address}: {source}")]
    Startup {
        address: String,
        #[source]
        source: CoordinationError,
    },

    #[error("coordination error: {0}")]
    Coordination(#[from] CoordinationError),

    #[error("contender node {0} is not registered")]
    NodeMissing(String),

    #[error("duties failed to start: {0}")]
    DutyStart(#[source] DutyError),

    #[error("leave did not complete within {0:?}")]
    LeaveTimedOut(Duration),

    #[error("leadership controller is no longer running")]
    ControllerGone,

    #[error("invalid configuration: {0}")]
    Config(String),
}

impl LeadershipError {
    /// Whether a standing evaluation hitting this error may be attempted again.
    pub(crate) fn is_transient(&self) -> bool {
        match self {
            LeadershipError::Coordination(err) => err.is_retryable(),
            // the listing may lag behind the creation of our own node
            LeadershipError::NodeMissing(_) => true,
            _ => false,
        }
    }
}
