//! # FolioDB Storage
//!
//! Append-only log backends for FolioDB.
//!
//! This crate provides the lowest-level storage abstraction for FolioDB.
//! Backends are **opaque byte logs** - they do not interpret the records
//! they store. The document store owns all framing and encoding.
//!
//! ## Design Principles
//!
//! - Backends are simple byte logs (append, read, flush, reset)
//! - No knowledge of journal record formats or documents
//! - Must be `Send + Sync` for concurrent access
//!
//! ## Available Backends
//!
//! - [`MemoryLog`] - For testing and ephemeral stores
//! - [`FileLog`] - For persistent storage using OS file APIs
//!
//! ## Example
//!
//! ```rust
//! use foliodb_storage::{AppendLog, MemoryLog};
//!
//! let mut log = MemoryLog::new();
//! let offset = log.append(b"hello world").unwrap();
//! let data = log.read_at(offset, 11).unwrap();
//! assert_eq!(&data, b"hello world");
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod backend;
mod error;
mod file;
mod memory;

pub use backend::AppendLog;
pub use error::{StorageError, StorageResult};
pub use file::FileLog;
pub use memory::MemoryLog;
