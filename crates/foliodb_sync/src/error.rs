//! Error types for the replication engine.

use thiserror::Error;

/// Result type for replication operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors that can occur during replication.
#[derive(Error, Debug)]
pub enum SyncError {
    /// Network or transport failure.
    #[error("network error: {message}")]
    Network {
        /// Error message.
        message: String,
        /// Whether the operation can be retried.
        retryable: bool,
    },

    /// The remote rejected our credentials or authorization.
    #[error("access denied: {0}")]
    Denied(String),

    /// Malformed message or unexpected remote behavior.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Local store failure during replication.
    #[error("store error: {0}")]
    Store(#[from] foliodb_store::StoreError),

    /// Replication was cancelled.
    #[error("replication cancelled")]
    Cancelled,
}

impl SyncError {
    /// Creates a retryable network error.
    pub fn network_retryable(message: impl Into<String>) -> Self {
        Self::Network {
            message: message.into(),
            retryable: true,
        }
    }

    /// Creates a non-retryable network error.
    pub fn network_fatal(message: impl Into<String>) -> Self {
        Self::Network {
            message: message.into(),
            retryable: false,
        }
    }

    /// Creates a protocol error.
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol(message.into())
    }

    /// Returns true if retrying could succeed.
    ///
    /// `Denied` is never retryable: bad credentials do not heal with time.
    pub fn is_retryable(&self) -> bool {
        matches!(self, SyncError::Network { retryable: true, .. })
    }
}

impl From<foliodb_protocol::ProtocolError> for SyncError {
    fn from(error: foliodb_protocol::ProtocolError) -> Self {
        Self::Protocol(error.to_string())
    }
}
