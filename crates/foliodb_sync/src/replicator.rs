//! Single-direction replication cycles.
//!
//! A cycle drains one direction in batches: list the source's changes
//! since the checkpoint, move the full documents across, apply them, then
//! advance the checkpoint. The checkpoint moves only after the batch is
//! durably applied, so a crash in between causes redelivery rather than
//! loss. Re-applied revisions are no-ops.

use crate::error::{SyncError, SyncResult};
use crate::transport::ReplicationTransport;
use foliodb_protocol::{
    checkpoint_id, new_session_id, ChangesRequest, FetchItem, FetchRequest, PushRequest,
    ReplicationCheckpoint,
};
use foliodb_store::DocumentStore;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::debug;

/// Loads the checkpoint for this store/peer pair, or starts a fresh one.
///
/// Both copies are consulted: progress only counts when both sides can
/// prove it, so a crash between saves or a wiped peer causes redelivery
/// rather than loss.
pub(crate) fn load_checkpoint(
    local: &DocumentStore,
    transport: &dyn ReplicationTransport,
) -> SyncResult<ReplicationCheckpoint> {
    let id = checkpoint_id(&local.replica_id(), &transport.endpoint_address());
    let key = format!("_local/{id}");

    let ours: Option<ReplicationCheckpoint> = match local.get_local(&key)? {
        Some(value) => serde_json::from_value(value).ok(),
        None => None,
    };
    let theirs = transport.get_checkpoint(&id)?;

    Ok(match (ours, theirs) {
        (Some(mut checkpoint), Some(theirs)) => {
            checkpoint.source_seq = checkpoint.source_seq.min(theirs.source_seq);
            checkpoint.target_seq = checkpoint.target_seq.min(theirs.target_seq);
            // New session, resumed progress.
            checkpoint.session_id = new_session_id();
            checkpoint
        }
        // A missing copy on either side means no provable shared progress.
        _ => ReplicationCheckpoint::new(id, new_session_id()),
    })
}

/// Persists the checkpoint on both sides.
///
/// The local copy is the authoritative resume point; the remote copy
/// lets the peer garbage-collect its own bookkeeping.
pub(crate) fn save_checkpoint(
    local: &DocumentStore,
    transport: &dyn ReplicationTransport,
    checkpoint: &mut ReplicationCheckpoint,
) -> SyncResult<()> {
    checkpoint.touch();
    let value = serde_json::to_value(&*checkpoint)
        .map_err(|e| SyncError::protocol(format!("unencodable checkpoint: {e}")))?;
    local.put_local(&checkpoint.local_doc_id(), value)?;
    transport.put_checkpoint(checkpoint)?;
    Ok(())
}

/// Pulls remote changes into the local store. Returns the number of
/// documents that changed local state.
pub(crate) fn pull(
    local: &DocumentStore,
    transport: &dyn ReplicationTransport,
    checkpoint: &mut ReplicationCheckpoint,
    batch_size: usize,
    cancelled: &AtomicBool,
) -> SyncResult<u64> {
    let mut total = 0u64;

    loop {
        check_cancelled(cancelled)?;

        let listing = transport.changes(&ChangesRequest {
            since: checkpoint.source_seq,
            limit: Some(batch_size),
        })?;
        if listing.results.is_empty() {
            break;
        }

        let items: Vec<FetchItem> = listing
            .results
            .iter()
            .map(|record| FetchItem {
                id: record.id.clone(),
                rev: Some(record.rev.clone()),
            })
            .collect();
        let fetched = transport.fetch_docs(&FetchRequest { items })?;

        for doc in &fetched.docs {
            // Divergent remote edits land as conflict branches; they are
            // data here, not errors.
            if local.apply_replicated(doc)?.is_some() {
                total += 1;
            }
        }

        checkpoint.source_seq = listing.last_seq;
        save_checkpoint(local, transport, checkpoint)?;
        debug!(source_seq = checkpoint.source_seq, applied = total, "pull batch applied");

        if !listing.pending {
            break;
        }
    }

    Ok(total)
}

/// Pushes local changes to the remote. Returns the number of documents
/// transmitted.
pub(crate) fn push(
    local: &DocumentStore,
    transport: &dyn ReplicationTransport,
    checkpoint: &mut ReplicationCheckpoint,
    batch_size: usize,
    cancelled: &AtomicBool,
) -> SyncResult<u64> {
    let mut total = 0u64;

    loop {
        check_cancelled(cancelled)?;

        let events = local.changes_since(checkpoint.target_seq, Some(batch_size), false)?;
        let Some(last) = events.last() else {
            break;
        };
        let batch_last_seq = last.seq;

        let mut docs = Vec::new();
        for event in &events {
            // Every leaf travels: the winner, losing conflict branches,
            // and the branch tombstones that resolve them.
            for rev in local.leaf_revisions(&event.id)? {
                docs.push(local.get_with_history(&event.id, Some(&rev))?);
            }
        }

        let batch_len = events.len();
        total += docs.len() as u64;
        transport.push_docs(&PushRequest { docs })?;

        checkpoint.target_seq = batch_last_seq;
        save_checkpoint(local, transport, checkpoint)?;
        debug!(target_seq = checkpoint.target_seq, pushed = total, "push batch transmitted");

        if batch_len < batch_size {
            break;
        }
    }

    Ok(total)
}

fn check_cancelled(cancelled: &AtomicBool) -> SyncResult<()> {
    if cancelled.load(Ordering::SeqCst) {
        Err(SyncError::Cancelled)
    } else {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::LocalTransport;
    use foliodb_store::Document;
    use serde_json::{json, Map};
    use std::sync::Arc;

    fn page(title: &str) -> Map<String, serde_json::Value> {
        let mut data = Map::new();
        data.insert("type".into(), json!("page"));
        data.insert("title".into(), json!(title));
        data
    }

    fn pair() -> (Arc<DocumentStore>, Arc<DocumentStore>, LocalTransport) {
        let local = Arc::new(DocumentStore::open_in_memory().unwrap());
        let remote = Arc::new(DocumentStore::open_in_memory().unwrap());
        let transport = LocalTransport::new(Arc::clone(&remote));
        (local, remote, transport)
    }

    #[test]
    fn pull_applies_and_advances_checkpoint() {
        let (local, remote, transport) = pair();
        remote.put(&Document::new("p1", page("Home"))).unwrap();
        remote.put(&Document::new("p2", page("About"))).unwrap();

        let mut ckpt = load_checkpoint(&local, &transport).unwrap();
        let cancelled = AtomicBool::new(false);
        let pulled = pull(&local, &transport, &mut ckpt, 10, &cancelled).unwrap();

        assert_eq!(pulled, 2);
        assert_eq!(ckpt.source_seq, remote.update_seq());
        assert!(local.get("p1").is_ok());
        assert!(local.get("p2").is_ok());

        // Second pull from the advanced checkpoint moves nothing.
        let again = pull(&local, &transport, &mut ckpt, 10, &cancelled).unwrap();
        assert_eq!(again, 0);
    }

    #[test]
    fn pull_batches_until_drained() {
        let (local, remote, transport) = pair();
        for i in 0..7 {
            remote
                .put(&Document::new(format!("p{i}"), page("x")))
                .unwrap();
        }

        let mut ckpt = load_checkpoint(&local, &transport).unwrap();
        let cancelled = AtomicBool::new(false);
        let pulled = pull(&local, &transport, &mut ckpt, 3, &cancelled).unwrap();

        assert_eq!(pulled, 7);
        assert_eq!(local.doc_count(), 7);
    }

    #[test]
    fn push_transmits_tombstones() {
        let (local, remote, transport) = pair();
        let rev = local.put(&Document::new("p1", page("Home"))).unwrap();
        local.remove("p1", &rev).unwrap();

        let mut ckpt = load_checkpoint(&local, &transport).unwrap();
        let cancelled = AtomicBool::new(false);
        push(&local, &transport, &mut ckpt, 10, &cancelled).unwrap();

        // The deletion propagated rather than the document resurrecting.
        assert!(remote.get("p1").unwrap_err().is_not_found());
        let remote_changes = remote.changes_since(0, None, false).unwrap();
        assert!(remote_changes.iter().any(|c| c.id == "p1" && c.deleted));
    }

    #[test]
    fn push_propagates_conflict_resolution() {
        let (local, remote, transport) = pair();

        // Shared ancestor, one divergent edit per side, exchanged so the
        // local store holds the conflict.
        local.put(&Document::new("p1", page("base"))).unwrap();
        remote
            .apply_replicated(&local.get_with_history("p1", None).unwrap())
            .unwrap();
        let mut mine = local.get("p1").unwrap();
        mine.set_field("title", json!("mine"));
        local.put(&mine).unwrap();
        let mut theirs = remote.get("p1").unwrap();
        theirs.set_field("title", json!("theirs"));
        remote.put(&theirs).unwrap();
        local
            .apply_replicated(&remote.get_with_history("p1", None).unwrap())
            .unwrap();

        let mut ckpt = load_checkpoint(&local, &transport).unwrap();
        let cancelled = AtomicBool::new(false);
        push(&local, &transport, &mut ckpt, 10, &cancelled).unwrap();
        assert_eq!(remote.conflicts("p1").unwrap().len(), 1);

        // Resolve by deleting the losing branch, then push the resolution.
        let losing = local.conflicts("p1").unwrap()[0].clone();
        local.remove("p1", &losing).unwrap();
        push(&local, &transport, &mut ckpt, 10, &cancelled).unwrap();

        assert!(remote.conflicts("p1").unwrap().is_empty());
        assert_eq!(remote.get("p1").unwrap().rev, local.get("p1").unwrap().rev);
    }

    #[test]
    fn resume_rewinds_to_the_lagging_checkpoint_copy() {
        let (local, _remote, transport) = pair();
        let id = checkpoint_id(&local.replica_id(), &transport.endpoint_address());
        let mut ckpt = ReplicationCheckpoint::new(id, new_session_id());
        ckpt.source_seq = 5;
        ckpt.target_seq = 5;
        save_checkpoint(&local, &transport, &mut ckpt).unwrap();

        // The peer's copy lags a batch behind ours.
        let mut lagging = ckpt.clone();
        lagging.source_seq = 3;
        transport.put_checkpoint(&lagging).unwrap();

        let resumed = load_checkpoint(&local, &transport).unwrap();
        assert_eq!(resumed.source_seq, 3);
        assert_eq!(resumed.target_seq, 5);
    }

    #[test]
    fn missing_peer_checkpoint_restarts_from_scratch() {
        let (local, remote, transport) = pair();
        remote.put(&Document::new("p1", page("Home"))).unwrap();

        let mut ckpt = load_checkpoint(&local, &transport).unwrap();
        let cancelled = AtomicBool::new(false);
        pull(&local, &transport, &mut ckpt, 10, &cancelled).unwrap();
        assert!(ckpt.source_seq > 0);

        // The peer lost its copy; progress can no longer be proven.
        remote.remove_local(&ckpt.local_doc_id()).unwrap();
        let restarted = load_checkpoint(&local, &transport).unwrap();
        assert_eq!(restarted.source_seq, 0);
        assert_eq!(restarted.target_seq, 0);
    }

    #[test]
    fn checkpoint_resumes_across_sessions() {
        let (local, remote, transport) = pair();
        remote.put(&Document::new("p1", page("Home"))).unwrap();

        let mut ckpt = load_checkpoint(&local, &transport).unwrap();
        let cancelled = AtomicBool::new(false);
        pull(&local, &transport, &mut ckpt, 10, &cancelled).unwrap();
        let first_session = ckpt.session_id.clone();

        // A reloaded checkpoint keeps progress but rotates the session.
        let resumed = load_checkpoint(&local, &transport).unwrap();
        assert_eq!(resumed.source_seq, ckpt.source_seq);
        assert_ne!(resumed.session_id, first_session);
    }

    #[test]
    fn cancellation_interrupts_between_batches() {
        let (local, remote, transport) = pair();
        remote.put(&Document::new("p1", page("Home"))).unwrap();

        let mut ckpt = load_checkpoint(&local, &transport).unwrap();
        let cancelled = AtomicBool::new(true);
        let err = pull(&local, &transport, &mut ckpt, 10, &cancelled).unwrap_err();
        assert!(matches!(err, SyncError::Cancelled));
        assert_eq!(local.doc_count(), 0);
    }
}
