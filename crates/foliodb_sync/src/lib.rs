//! # FolioDB Sync
//!
//! Replication engine for FolioDB.
//!
//! This crate provides:
//! - `sync` for bidirectional replication between a local store and a
//!   remote peer, one-shot or live
//! - `SyncHandle` for observing and cancelling a running session
//! - Transport abstraction with HTTP, in-process loopback, and mock
//!   implementations
//! - Checkpointed, at-least-once batch delivery with exponential retry
//!
//! ## Example
//!
//! ```rust,ignore
//! use foliodb_store::DocumentStore;
//! use foliodb_sync::{sync, LocalTransport, SyncOptions};
//! use std::sync::Arc;
//!
//! let local = Arc::new(DocumentStore::open_in_memory()?);
//! let remote = Arc::new(DocumentStore::open_in_memory()?);
//!
//! let handle = sync(
//!     Arc::clone(&local),
//!     Arc::new(LocalTransport::new(remote)),
//!     SyncOptions::new().live().retry(),
//! );
//! // ... later
//! handle.cancel();
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod config;
mod engine;
mod error;
mod http;
mod replicator;
mod transport;

pub use config::{RetryConfig, SyncOptions};
pub use engine::{sync, SyncEvent, SyncHandle, SyncState, SyncStats};
pub use error::{SyncError, SyncResult};
pub use http::{HttpClient, HttpError, HttpTransport};
pub use transport::{LocalTransport, MockTransport, ReplicationTransport};
