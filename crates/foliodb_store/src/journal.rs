//! Append-only journal of committed writes.
//!
//! Every accepted write is framed and appended to an
//! [`AppendLog`](foliodb_storage::AppendLog) before its change event is
//! emitted. Opening a store replays the journal to rebuild the revision
//! trees. Compaction rewrites the journal from current state, dropping
//! interior revision bodies.
//!
//! Frame format: 4-byte little-endian record length, then the record as
//! JSON. A truncated trailing frame (crash mid-append) is ignored on
//! replay; a fully framed but malformed record is skipped and logged,
//! fatal to that record only.

use crate::document::Attachment;
use crate::error::StoreResult;
use crate::revision::RevisionId;
use foliodb_storage::AppendLog;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use tracing::warn;

/// One committed write, as persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub(crate) enum JournalRecord {
    /// A locally accepted write: create, update, or tombstone.
    Write {
        /// Commit sequence of the write.
        seq: u64,
        /// Document id.
        id: String,
        /// The revision the write produced.
        rev: RevisionId,
        /// The revision the writer started from.
        parent: Option<RevisionId>,
        /// Whether the write was a deletion.
        deleted: bool,
        /// Payload fields.
        data: Map<String, Value>,
        /// Attachments at this revision.
        attachments: BTreeMap<String, Attachment>,
    },
    /// A replicated revision path merged into a tree.
    Merge {
        /// Commit sequence of the merge.
        seq: u64,
        /// Document id.
        id: String,
        /// Revision ancestry, newest first.
        history: Vec<RevisionId>,
        /// Whether the tip is a tombstone.
        deleted: bool,
        /// Tip payload fields.
        data: Map<String, Value>,
        /// Tip attachments.
        attachments: BTreeMap<String, Attachment>,
    },
    /// A local (non-replicated) document write. `None` removes it.
    Local {
        /// Local document id, without the `_local/` prefix.
        id: String,
        /// New value, or `None` for removal.
        value: Option<Value>,
    },
}

/// The store's journal: framing and replay over an append-only log.
pub(crate) struct Journal {
    log: Box<dyn AppendLog>,
    sync_on_commit: bool,
}

impl Journal {
    pub(crate) fn new(log: Box<dyn AppendLog>, sync_on_commit: bool) -> Self {
        Self {
            log,
            sync_on_commit,
        }
    }

    /// Appends one record and flushes it.
    pub(crate) fn append(&mut self, record: &JournalRecord) -> StoreResult<()> {
        let body = serde_json::to_vec(record)?;
        let mut frame = Vec::with_capacity(4 + body.len());
        frame.extend_from_slice(&(body.len() as u32).to_le_bytes());
        frame.extend_from_slice(&body);

        self.log.append(&frame)?;
        if self.sync_on_commit {
            self.log.sync()?;
        } else {
            self.log.flush()?;
        }
        Ok(())
    }

    /// Reads all intact records from the start of the log.
    pub(crate) fn replay(&self) -> StoreResult<Vec<JournalRecord>> {
        let size = self.log.size()?;
        let mut records = Vec::new();
        let mut offset = 0u64;

        while offset + 4 <= size {
            let len_bytes = self.log.read_at(offset, 4)?;
            let len = u32::from_le_bytes([len_bytes[0], len_bytes[1], len_bytes[2], len_bytes[3]])
                as u64;

            if offset + 4 + len > size {
                warn!(offset, "truncated journal frame, ignoring tail");
                break;
            }

            let body = self.log.read_at(offset + 4, len as usize)?;
            match serde_json::from_slice::<JournalRecord>(&body) {
                Ok(record) => records.push(record),
                Err(error) => {
                    // Fatal to this record only; the frame boundary is intact.
                    warn!(offset, %error, "skipping corrupt journal record");
                }
            }
            offset += 4 + len;
        }

        Ok(records)
    }

    /// Replaces the journal content with the given records.
    pub(crate) fn rewrite(&mut self, records: &[JournalRecord]) -> StoreResult<()> {
        self.log.reset()?;
        for record in records {
            let body = serde_json::to_vec(record)?;
            let mut frame = Vec::with_capacity(4 + body.len());
            frame.extend_from_slice(&(body.len() as u32).to_le_bytes());
            frame.extend_from_slice(&body);
            self.log.append(&frame)?;
        }
        self.log.sync()?;
        Ok(())
    }

    /// Current journal size in bytes.
    pub(crate) fn size(&self) -> StoreResult<u64> {
        Ok(self.log.size()?)
    }

    /// Forces buffered writes to durable storage.
    pub(crate) fn sync(&mut self) -> StoreResult<()> {
        self.log.sync()?;
        Ok(())
    }
}
