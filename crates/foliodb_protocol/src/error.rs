//! Protocol error types.

use thiserror::Error;

/// Errors from protocol parsing and validation.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// A remote endpoint address could not be parsed.
    #[error("invalid endpoint '{value}': {reason}")]
    InvalidEndpoint {
        /// The offending address, with any password redacted.
        value: String,
        /// What made it invalid.
        reason: String,
    },

    /// A wire message could not be encoded or decoded.
    #[error("malformed message: {0}")]
    MalformedMessage(#[from] serde_json::Error),
}

impl ProtocolError {
    /// Creates an `InvalidEndpoint` error.
    pub fn invalid_endpoint(value: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidEndpoint {
            value: value.into(),
            reason: reason.into(),
        }
    }
}

/// Result type for protocol operations.
pub type ProtocolResult<T> = Result<T, ProtocolError>;
