//! Replication wire messages.
//!
//! All messages are plain serde structs exchanged as JSON. This crate
//! defines shapes only; transports own the I/O.

use foliodb_store::{ReplicatedDoc, RevisionId};
use serde::{Deserialize, Serialize};

/// One entry in a peer's change listing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeRecord {
    /// The peer's commit sequence for this change.
    pub seq: u64,
    /// Affected document id.
    pub id: String,
    /// The document's winning revision at that sequence.
    pub rev: RevisionId,
    /// True when the change is a deletion tombstone.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub deleted: bool,
}

/// Asks a peer for changes committed after a sequence marker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangesRequest {
    /// Deliver changes with a sequence greater than this.
    pub since: u64,
    /// Maximum number of entries to return.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<usize>,
}

/// A peer's change listing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangesResponse {
    /// Changes in commit order, one per document.
    pub results: Vec<ChangeRecord>,
    /// The highest sequence covered by this response.
    pub last_seq: u64,
    /// True when more changes exist past `last_seq`.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub pending: bool,
}

/// One document revision to fetch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FetchItem {
    /// Document id.
    pub id: String,
    /// Revision to fetch; the peer's winner when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rev: Option<RevisionId>,
}

/// Asks a peer for full documents with revision history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FetchRequest {
    /// The revisions to fetch.
    pub items: Vec<FetchItem>,
}

/// Full documents with their revision ancestry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FetchResponse {
    /// The requested documents. Revisions the peer no longer holds are
    /// omitted.
    pub docs: Vec<ReplicatedDoc>,
}

/// Transmits local documents to a peer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PushRequest {
    /// Documents with revision ancestry, tombstones included.
    pub docs: Vec<ReplicatedDoc>,
}

/// Acknowledges a push.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PushResponse {
    /// Number of documents that changed the peer's state. Re-applied
    /// known revisions are counted as accepted but change nothing.
    pub applied: usize,
}
