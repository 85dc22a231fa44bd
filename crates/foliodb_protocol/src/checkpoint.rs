//! Replication checkpoints.
//!
//! A checkpoint records how far a replication pair has progressed, so a
//! restarted sync resumes from the marker instead of rescanning history.
//! Checkpoints are stored as local documents on both sides and advanced
//! only after a batch is durably applied, which makes delivery
//! at-least-once: a crash between apply and advance causes redelivery,
//! never loss.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Progress marker for one replication pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplicationCheckpoint {
    /// Identity of the replication pair, see [`checkpoint_id`].
    pub checkpoint_id: String,
    /// Highest remote sequence already pulled and applied locally.
    pub source_seq: u64,
    /// Highest local sequence already pushed and applied remotely.
    pub target_seq: u64,
    /// Session id, rotated each time a sync starts.
    pub session_id: String,
    /// Unix timestamp (seconds) of the last advance.
    pub updated_at: u64,
}

impl ReplicationCheckpoint {
    /// Creates a fresh checkpoint at sequence zero on both sides.
    pub fn new(checkpoint_id: impl Into<String>, session_id: impl Into<String>) -> Self {
        Self {
            checkpoint_id: checkpoint_id.into(),
            source_seq: 0,
            target_seq: 0,
            session_id: session_id.into(),
            updated_at: 0,
        }
    }

    /// Stamps the checkpoint with the current time.
    pub fn touch(&mut self) {
        self.updated_at = std::time::SystemTime::now()
            .duration_since(std::time::SystemTime::UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
    }

    /// The local-document id this checkpoint is stored under.
    #[must_use]
    pub fn local_doc_id(&self) -> String {
        format!("_local/{}", self.checkpoint_id)
    }
}

/// Derives the stable identity of a replication pair.
///
/// Hashes the local replica id together with the remote address sans
/// credentials, so the same pair always resumes from its own marker and
/// a different remote database never inherits a foreign one.
#[must_use]
pub fn checkpoint_id(replica_id: &str, remote_address: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(replica_id.as_bytes());
    hasher.update([0u8]);
    hasher.update(remote_address.as_bytes());
    let digest = hasher.finalize();
    digest.iter().take(16).map(|b| format!("{b:02x}")).collect()
}

/// Generates a fresh session id.
#[must_use]
pub fn new_session_id() -> String {
    uuid::Uuid::new_v4().to_string()
}
