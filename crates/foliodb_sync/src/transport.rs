//! Transport abstraction for talking to a replication peer.

use crate::error::{SyncError, SyncResult};
use foliodb_protocol::{
    ChangeRecord, ChangesRequest, ChangesResponse, FetchRequest, FetchResponse, PushRequest,
    PushResponse, ReplicationCheckpoint,
};
use foliodb_store::DocumentStore;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Network-facing view of a replication peer.
///
/// The engine only ever talks to a peer through this trait, so remote
/// CouchDB-style databases, in-process stores, and test doubles are
/// interchangeable.
pub trait ReplicationTransport: Send + Sync {
    /// Lists the peer's changes after a sequence marker.
    fn changes(&self, request: &ChangesRequest) -> SyncResult<ChangesResponse>;

    /// Fetches full documents with revision ancestry.
    fn fetch_docs(&self, request: &FetchRequest) -> SyncResult<FetchResponse>;

    /// Transmits local documents to the peer.
    fn push_docs(&self, request: &PushRequest) -> SyncResult<PushResponse>;

    /// Reads the peer's copy of a checkpoint.
    fn get_checkpoint(&self, checkpoint_id: &str) -> SyncResult<Option<ReplicationCheckpoint>>;

    /// Writes the peer's copy of a checkpoint.
    fn put_checkpoint(&self, checkpoint: &ReplicationCheckpoint) -> SyncResult<()>;

    /// A credential-free description of the peer, stable across sessions.
    /// Used for checkpoint identity and logging.
    fn endpoint_address(&self) -> String;

    /// Returns true while the transport considers itself usable.
    fn is_connected(&self) -> bool;

    /// Closes the transport.
    fn close(&self) -> SyncResult<()>;
}

/// Loopback transport onto another in-process store.
///
/// This is local-to-local replication: both sides are `DocumentStore`
/// instances in the same process.
pub struct LocalTransport {
    store: Arc<DocumentStore>,
    connected: AtomicBool,
}

impl LocalTransport {
    /// Creates a loopback transport onto `store`.
    pub fn new(store: Arc<DocumentStore>) -> Self {
        Self {
            store,
            connected: AtomicBool::new(true),
        }
    }

    /// The wrapped store.
    pub fn store(&self) -> &Arc<DocumentStore> {
        &self.store
    }

    fn ensure_connected(&self) -> SyncResult<()> {
        if self.is_connected() {
            Ok(())
        } else {
            Err(SyncError::network_retryable("loopback transport closed"))
        }
    }
}

impl ReplicationTransport for LocalTransport {
    fn changes(&self, request: &ChangesRequest) -> SyncResult<ChangesResponse> {
        self.ensure_connected()?;
        let events = self
            .store
            .changes_since(request.since, request.limit, false)?;

        let results: Vec<ChangeRecord> = events
            .into_iter()
            .map(|event| ChangeRecord {
                seq: event.seq,
                id: event.id,
                rev: event.rev,
                deleted: event.deleted,
            })
            .collect();

        let last_seq = results.last().map(|r| r.seq).unwrap_or(request.since);
        let pending = last_seq < self.store.update_seq();
        Ok(ChangesResponse {
            results,
            last_seq,
            pending,
        })
    }

    fn fetch_docs(&self, request: &FetchRequest) -> SyncResult<FetchResponse> {
        self.ensure_connected()?;
        let mut docs = Vec::new();
        for item in &request.items {
            let doc = match self.store.get_with_history(&item.id, item.rev.as_ref()) {
                Ok(doc) => doc,
                // The revision may have been compacted away since listing.
                Err(error) if error.is_not_found() => continue,
                Err(error) => return Err(error.into()),
            };
            let requested = doc.rev().cloned();
            docs.push(doc);

            // Every other leaf travels too: losing branches make the
            // divergence visible on both sides, and branch tombstones
            // carry conflict resolutions across.
            for rev in self.store.leaf_revisions(&item.id)? {
                if Some(&rev) == requested.as_ref() {
                    continue;
                }
                docs.push(self.store.get_with_history(&item.id, Some(&rev))?);
            }
        }
        Ok(FetchResponse { docs })
    }

    fn push_docs(&self, request: &PushRequest) -> SyncResult<PushResponse> {
        self.ensure_connected()?;
        let mut applied = 0;
        for doc in &request.docs {
            if self.store.apply_replicated(doc)?.is_some() {
                applied += 1;
            }
        }
        Ok(PushResponse { applied })
    }

    fn get_checkpoint(&self, checkpoint_id: &str) -> SyncResult<Option<ReplicationCheckpoint>> {
        self.ensure_connected()?;
        let key = format!("_local/{checkpoint_id}");
        match self.store.get_local(&key)? {
            Some(value) => Ok(serde_json::from_value(value).ok()),
            None => Ok(None),
        }
    }

    fn put_checkpoint(&self, checkpoint: &ReplicationCheckpoint) -> SyncResult<()> {
        self.ensure_connected()?;
        let value = serde_json::to_value(checkpoint)
            .map_err(|e| SyncError::protocol(format!("unencodable checkpoint: {e}")))?;
        self.store.put_local(&checkpoint.local_doc_id(), value)?;
        Ok(())
    }

    fn endpoint_address(&self) -> String {
        format!("local://{}", self.store.replica_id())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn close(&self) -> SyncResult<()> {
        self.connected.store(false, Ordering::SeqCst);
        Ok(())
    }
}

/// A scriptable transport for tests.
#[derive(Default)]
pub struct MockTransport {
    connected: AtomicBool,
    changes_response: parking_lot::Mutex<Option<ChangesResponse>>,
    fetch_response: parking_lot::Mutex<Option<FetchResponse>>,
    push_response: parking_lot::Mutex<Option<PushResponse>>,
    checkpoint: parking_lot::Mutex<Option<ReplicationCheckpoint>>,
}

impl MockTransport {
    /// Creates a connected mock with no scripted responses.
    pub fn new() -> Self {
        Self {
            connected: AtomicBool::new(true),
            ..Self::default()
        }
    }

    /// Scripts the changes response.
    pub fn set_changes_response(&self, response: ChangesResponse) {
        *self.changes_response.lock() = Some(response);
    }

    /// Scripts the fetch response.
    pub fn set_fetch_response(&self, response: FetchResponse) {
        *self.fetch_response.lock() = Some(response);
    }

    /// Scripts the push response.
    pub fn set_push_response(&self, response: PushResponse) {
        *self.push_response.lock() = Some(response);
    }

    /// Sets the connected flag.
    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }

    fn scripted<T: Clone>(&self, slot: &parking_lot::Mutex<Option<T>>, what: &str) -> SyncResult<T> {
        if !self.is_connected() {
            return Err(SyncError::network_retryable("mock transport disconnected"));
        }
        slot.lock()
            .clone()
            .ok_or_else(|| SyncError::protocol(format!("no scripted {what} response")))
    }
}

impl ReplicationTransport for MockTransport {
    fn changes(&self, _request: &ChangesRequest) -> SyncResult<ChangesResponse> {
        self.scripted(&self.changes_response, "changes")
    }

    fn fetch_docs(&self, _request: &FetchRequest) -> SyncResult<FetchResponse> {
        self.scripted(&self.fetch_response, "fetch")
    }

    fn push_docs(&self, _request: &PushRequest) -> SyncResult<PushResponse> {
        self.scripted(&self.push_response, "push")
    }

    fn get_checkpoint(&self, _checkpoint_id: &str) -> SyncResult<Option<ReplicationCheckpoint>> {
        if !self.is_connected() {
            return Err(SyncError::network_retryable("mock transport disconnected"));
        }
        Ok(self.checkpoint.lock().clone())
    }

    fn put_checkpoint(&self, checkpoint: &ReplicationCheckpoint) -> SyncResult<()> {
        if !self.is_connected() {
            return Err(SyncError::network_retryable("mock transport disconnected"));
        }
        *self.checkpoint.lock() = Some(checkpoint.clone());
        Ok(())
    }

    fn endpoint_address(&self) -> String {
        "mock://peer".to_string()
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn close(&self) -> SyncResult<()> {
        self.connected.store(false, Ordering::SeqCst);
        Ok(())
    }
}
