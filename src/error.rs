//! Error taxonomy shared by the local store, the sync reconciler and the
//! completion workflow.
//!
//! Every operation returns [`Result`]; failures are surfaced to the caller
//! for user-visible alerting and are never retried by the core itself.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, PosError>;

#[derive(Debug, Error)]
pub enum PosError {
    /// Gateway payload is missing the expected shape.
    #[error("Malformed response from server: {0}")]
    MalformedResponse(String),

    #[error("Order not found: {0}")]
    NotFound(String),

    #[error("Order {0} has already been completed")]
    AlreadyCompleted(i64),

    #[error("Order {0} has been cancelled")]
    Cancelled(i64),

    /// Any local read/write failure.
    #[error("Storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    /// Gateway unreachable, timed out, or answered with a non-2xx status.
    #[error("Network error: {0}")]
    Network(String),

    /// Token rejected by the server; the session must be ended.
    #[error("Session expired: {0}")]
    Unauthorized(String),

    /// OS credential store could not be read or written.
    #[error("Credential store error: {0}")]
    Credential(String),

    #[error("Not logged in")]
    NoSession,

    #[error("A sync cycle is already running")]
    SyncInProgress,

    /// The server did not confirm every row that was pushed.
    #[error("Server acknowledged {acknowledged} of {sent} pushed records")]
    Unacknowledged { sent: usize, acknowledged: u64 },

    #[error("Printing failed: {0}")]
    PrintFailed(String),

    #[error("{0}")]
    Validation(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    /// Connection mutex was poisoned by a panicking holder.
    #[error("Database lock poisoned: {0}")]
    LockPoisoned(String),
}

impl PosError {
    /// Whether re-triggering the same operation later can succeed without
    /// any change on the user's side.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            PosError::Network(_)
                | PosError::Unacknowledged { .. }
                | PosError::SyncInProgress
                | PosError::PrintFailed(_)
        )
    }

    /// Whether the error means the stored session is no longer valid.
    pub fn is_auth_failure(&self) -> bool {
        matches!(self, PosError::Unauthorized(_) | PosError::NoSession)
    }
}

impl<T> From<std::sync::PoisonError<T>> for PosError {
    fn from(err: std::sync::PoisonError<T>) -> Self {
        PosError::LockPoisoned(err.to_string())
    }
}

impl From<serde_json::Error> for PosError {
    fn from(err: serde_json::Error) -> Self {
        PosError::MalformedResponse(err.to_string())
    }
}
