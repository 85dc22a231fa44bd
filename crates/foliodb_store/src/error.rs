//! Error types for the document store.

use thiserror::Error;

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors that can occur in document store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// No live document exists at the given id.
    #[error("document not found: {id}")]
    NotFound {
        /// The document id that was looked up.
        id: String,
    },

    /// The document has no attachment with the given name.
    #[error("attachment not found: {name} on document {id}")]
    AttachmentNotFound {
        /// The parent document id.
        id: String,
        /// The attachment name.
        name: String,
    },

    /// The supplied revision does not match the store's current revision.
    ///
    /// The caller must re-read the document and retry with the current
    /// revision; the store never retries writes on its own.
    #[error("document update conflict: {id}")]
    Conflict {
        /// The document id the write targeted.
        id: String,
    },

    /// A revision token could not be parsed.
    #[error("invalid revision token: {value}")]
    InvalidRevision {
        /// The malformed token.
        value: String,
    },

    /// The document id is not acceptable for a write.
    #[error("invalid document id {id:?}: {reason}")]
    InvalidDocumentId {
        /// The offending id.
        id: String,
        /// Why it was rejected.
        reason: String,
    },

    /// A stored record is malformed. Fatal to that record only.
    #[error("corrupt document record: {message}")]
    Corrupt {
        /// Description of the corruption.
        message: String,
    },

    /// Journal storage error.
    #[error("storage error: {0}")]
    Storage(#[from] foliodb_storage::StorageError),

    /// JSON encoding or decoding failed.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The store has been closed.
    #[error("store is closed")]
    Closed,
}

impl StoreError {
    /// Creates a not-found error.
    pub fn not_found(id: impl Into<String>) -> Self {
        Self::NotFound { id: id.into() }
    }

    /// Creates a conflict error.
    pub fn conflict(id: impl Into<String>) -> Self {
        Self::Conflict { id: id.into() }
    }

    /// Creates a corrupt-record error.
    pub fn corrupt(message: impl Into<String>) -> Self {
        Self::Corrupt {
            message: message.into(),
        }
    }

    /// Creates an invalid-document-id error.
    pub fn invalid_id(id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidDocumentId {
            id: id.into(),
            reason: reason.into(),
        }
    }

    /// Returns true if this is a revision mismatch.
    #[must_use]
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }

    /// Returns true if this is a missing-document error.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}
