//! # FolioDB Store
//!
//! Local-first document store for FolioDB.
//!
//! This crate provides the storage core that applications and the sync
//! engine build on:
//! - JSON documents keyed by id, with optimistic concurrency via opaque
//!   revision tokens
//! - Revision trees that retain divergent edits as inspectable conflict
//!   branches instead of losing them
//! - Deletion tombstones that propagate through replication
//! - A subscribable change feed in commit order
//! - Journal-based persistence with crash recovery
//! - Local (non-replicated) documents for replication checkpoints
//!
//! ## Concurrency Model
//!
//! Writes are compare-and-swap on the document's winning revision: a
//! write carrying a stale revision fails with
//! [`StoreError::Conflict`] and mutates nothing. There are no locks
//! held across caller code and no last-write-wins overwrites.
//!
//! ## Example
//!
//! ```rust,ignore
//! use foliodb_store::{Document, DocumentStore};
//! use serde_json::{json, Map};
//!
//! let store = DocumentStore::open_in_memory()?;
//!
//! let mut data = Map::new();
//! data.insert("type".into(), json!("page"));
//! data.insert("title".into(), json!("Home"));
//!
//! let rev = store.put(&Document::new("home", data))?;
//! let page = store.get("home")?;
//! assert_eq!(page.rev, Some(rev));
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod change_feed;
mod config;
mod document;
mod error;
mod journal;
mod query;
mod revision;
mod revtree;
mod store;

pub use change_feed::{ChangeEvent, ChangesFeed, ChangesOptions};
pub use config::StoreConfig;
pub use document::{Attachment, Document, ReplicatedDoc};
pub use error::{StoreError, StoreResult};
pub use query::{ListOptions, Selector};
pub use revision::RevisionId;
pub use store::DocumentStore;
