//! # FolioDB Protocol
//!
//! Replication protocol types for FolioDB.
//!
//! This crate provides:
//! - `RemoteEndpoint` for parsing remote database addresses
//! - Wire messages for the pull/push replication exchange
//! - `ReplicationCheckpoint` and checkpoint identity derivation
//!
//! This is a pure protocol crate with no I/O operations.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod checkpoint;
mod endpoint;
mod error;
mod messages;

pub use checkpoint::{checkpoint_id, new_session_id, ReplicationCheckpoint};
pub use endpoint::RemoteEndpoint;
pub use error::{ProtocolError, ProtocolResult};
pub use messages::{
    ChangeRecord, ChangesRequest, ChangesResponse, FetchItem, FetchRequest, FetchResponse,
    PushRequest, PushResponse,
};
