//! Documents and attachments.

use crate::revision::RevisionId;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// A named binary attachment on a document.
///
/// Attachments are versioned together with their parent document: every
/// attachment mutation produces a new revision of the parent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    /// MIME content type, e.g. `"image/png"`.
    pub content_type: String,
    /// Raw attachment bytes.
    pub data: Vec<u8>,
}

impl Attachment {
    /// Creates an attachment.
    pub fn new(content_type: impl Into<String>, data: Vec<u8>) -> Self {
        Self {
            content_type: content_type.into(),
            data,
        }
    }

    /// Returns the attachment size in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Returns true if the attachment is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// A versioned JSON document plus optional binary attachments.
///
/// The id is caller-chosen (or generated with
/// [`Document::with_generated_id`]) and immutable after creation. The
/// revision is store-generated and changes on every successful write;
/// callers echo it back on the next write for optimistic concurrency.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    /// Unique document id.
    pub id: String,
    /// Current revision token. `None` for a document not yet written.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rev: Option<RevisionId>,
    /// Whether this version is a deletion tombstone.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub deleted: bool,
    /// Free-form JSON payload.
    #[serde(default)]
    pub data: Map<String, Value>,
    /// Named binary attachments.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub attachments: BTreeMap<String, Attachment>,
}

impl Document {
    /// Creates a new, unwritten document with the given id and payload.
    pub fn new(id: impl Into<String>, data: Map<String, Value>) -> Self {
        Self {
            id: id.into(),
            rev: None,
            deleted: false,
            data,
            attachments: BTreeMap::new(),
        }
    }

    /// Creates a new document with a generated UUID id.
    pub fn with_generated_id(data: Map<String, Value>) -> Self {
        Self::new(uuid::Uuid::new_v4().to_string(), data)
    }

    /// Returns a payload field by name, if present.
    #[must_use]
    pub fn field(&self, name: &str) -> Option<&Value> {
        self.data.get(name)
    }

    /// Sets a payload field, replacing any previous value.
    pub fn set_field(&mut self, name: impl Into<String>, value: Value) {
        self.data.insert(name.into(), value);
    }

    /// Returns the revision generation, or 0 if unwritten.
    #[must_use]
    pub fn generation(&self) -> u64 {
        self.rev.as_ref().map(RevisionId::generation).unwrap_or(0)
    }
}

/// A document paired with its revision ancestry, as exchanged during
/// replication.
///
/// `history` lists revision tokens newest-first; `history[0]` is always
/// `doc.rev`. The receiving store stitches the path onto whatever shared
/// ancestor it already knows, so divergent branches are detected rather
/// than overwritten.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplicatedDoc {
    /// The document at the tip of the path. May be a tombstone.
    pub doc: Document,
    /// Revision ancestry, newest first.
    pub history: Vec<RevisionId>,
}

impl ReplicatedDoc {
    /// Creates a replicated document, asserting the history tip matches.
    pub fn new(doc: Document, history: Vec<RevisionId>) -> Self {
        debug_assert_eq!(doc.rev.as_ref(), history.first());
        Self { doc, history }
    }

    /// Returns the tip revision.
    #[must_use]
    pub fn rev(&self) -> Option<&RevisionId> {
        self.history.first()
    }
}
