//! Document store facade and recovery.

use crate::change_feed::{ChangeEvent, ChangeFeed, ChangesFeed, ChangesOptions};
use crate::config::StoreConfig;
use crate::document::{Attachment, Document, ReplicatedDoc};
use crate::error::{StoreError, StoreResult};
use crate::journal::{Journal, JournalRecord};
use crate::query::{ListOptions, Selector};
use crate::revision::RevisionId;
use crate::revtree::{RevBody, RevNode, RevTree};
use foliodb_storage::{AppendLog, FileLog, MemoryLog};
use parking_lot::RwLock;
use serde_json::Value;
use std::collections::HashMap;
use std::path::Path;
use tracing::{debug, warn};

/// Reserved local-document key holding the store's stable replica id.
const REPLICA_ID_KEY: &str = "_replica_id";

/// Namespace prefix reserved for local (non-replicated) documents.
const LOCAL_PREFIX: &str = "_local/";

/// The main document store handle.
///
/// `DocumentStore` is the single store instance UI and replication
/// collaborators talk to. It provides:
/// - Document CRUD with optimistic concurrency (compare-and-swap on the
///   winning revision, never a lock held across caller code)
/// - Attachment CRUD, versioned with the parent document
/// - A subscribable change feed in commit order
/// - The replication surface (`changes_since`, `get_with_history`,
///   `apply_replicated`) used by the sync engine
/// - Journal-based persistence and recovery
///
/// # Opening a Store
///
/// ```rust,ignore
/// use foliodb_store::DocumentStore;
/// use std::path::Path;
///
/// let store = DocumentStore::open(Path::new("wiki.folio"))?;
/// let rev = store.put(&doc)?;
/// store.close()?;
/// ```
///
/// For tests, use [`DocumentStore::open_in_memory`].
pub struct DocumentStore {
    config: StoreConfig,
    inner: RwLock<StoreInner>,
    feed: ChangeFeed,
    is_open: RwLock<bool>,
}

struct StoreInner {
    /// Revision trees, ordered by id for stable scans.
    docs: std::collections::BTreeMap<String, DocState>,
    /// Local (non-replicated) documents: checkpoints and the replica id.
    locals: HashMap<String, Value>,
    /// Last committed sequence number.
    update_seq: u64,
    /// The committed-writes journal.
    journal: Journal,
}

struct DocState {
    tree: RevTree,
    /// Sequence of the most recent committed change to this id.
    last_seq: u64,
}

impl DocumentStore {
    /// Opens or creates a persistent store at the given journal path.
    ///
    /// Replays the journal to rebuild revision trees; a truncated tail
    /// (crash mid-commit) is ignored.
    pub fn open(path: &Path) -> StoreResult<Self> {
        Self::open_with_config(path, StoreConfig::default())
    }

    /// Opens a persistent store with custom configuration.
    pub fn open_with_config(path: &Path, config: StoreConfig) -> StoreResult<Self> {
        let log = FileLog::open_with_create_dirs(path)?;
        Self::open_with_log(Box::new(log), config)
    }

    /// Opens a fresh in-memory store for testing.
    pub fn open_in_memory() -> StoreResult<Self> {
        Self::open_with_log(Box::new(MemoryLog::new()), StoreConfig::default())
    }

    /// Opens a store over a pre-configured log backend.
    ///
    /// Lower-level constructor; prefer [`DocumentStore::open`].
    pub fn open_with_log(log: Box<dyn AppendLog>, config: StoreConfig) -> StoreResult<Self> {
        let journal = Journal::new(log, config.sync_on_commit);
        let mut inner = Self::recover(journal)?;

        // Assign a stable replica id on first open.
        if !inner.locals.contains_key(REPLICA_ID_KEY) {
            let id = Value::String(uuid::Uuid::new_v4().to_string());
            inner.journal.append(&JournalRecord::Local {
                id: REPLICA_ID_KEY.to_string(),
                value: Some(id.clone()),
            })?;
            inner.locals.insert(REPLICA_ID_KEY.to_string(), id);
        }

        debug!(
            docs = inner.docs.len(),
            update_seq = inner.update_seq,
            "store opened"
        );

        Ok(Self {
            config,
            inner: RwLock::new(inner),
            feed: ChangeFeed::new(),
            is_open: RwLock::new(true),
        })
    }

    /// Rebuilds store state from the journal.
    fn recover(journal: Journal) -> StoreResult<StoreInner> {
        let records = journal.replay()?;
        let mut inner = StoreInner {
            docs: std::collections::BTreeMap::new(),
            locals: HashMap::new(),
            update_seq: 0,
            journal,
        };

        for record in records {
            match record {
                JournalRecord::Write {
                    seq,
                    id,
                    rev,
                    parent,
                    deleted,
                    data,
                    attachments,
                } => {
                    let body = RevBody::new(data, attachments);
                    match inner.docs.get_mut(&id) {
                        Some(state) => {
                            state.tree.insert_child(parent.as_ref(), rev, body, deleted);
                            state.last_seq = seq;
                        }
                        None => {
                            if parent.is_some() {
                                warn!(%id, "journal write references unknown parent");
                            }
                            inner.docs.insert(
                                id,
                                DocState {
                                    tree: RevTree::new(rev, body, deleted),
                                    last_seq: seq,
                                },
                            );
                        }
                    }
                    inner.update_seq = inner.update_seq.max(seq);
                }
                JournalRecord::Merge {
                    seq,
                    id,
                    history,
                    deleted,
                    data,
                    attachments,
                } => {
                    let body = RevBody::new(data, attachments);
                    match inner.docs.get_mut(&id) {
                        Some(state) => {
                            state.tree.merge_path(&history, body, deleted);
                            state.last_seq = seq;
                        }
                        None => {
                            inner.docs.insert(
                                id,
                                DocState {
                                    tree: RevTree::from_path(&history, body, deleted),
                                    last_seq: seq,
                                },
                            );
                        }
                    }
                    inner.update_seq = inner.update_seq.max(seq);
                }
                JournalRecord::Local { id, value } => match value {
                    Some(value) => {
                        inner.locals.insert(id, value);
                    }
                    None => {
                        inner.locals.remove(&id);
                    }
                },
            }
        }

        Ok(inner)
    }

    // ========================================================================
    // Document CRUD
    // ========================================================================

    /// Fetches the live document at `id`.
    ///
    /// # Errors
    ///
    /// `NotFound` when no document exists at `id` or it is tombstoned.
    pub fn get(&self, id: &str) -> StoreResult<Document> {
        self.ensure_open()?;
        let inner = self.inner.read();
        let state = inner.docs.get(id).ok_or_else(|| StoreError::not_found(id))?;
        if state.tree.is_tombstoned() {
            return Err(StoreError::not_found(id));
        }
        Ok(assemble(
            id,
            state.tree.winner().clone(),
            state.tree.winning_node(),
        ))
    }

    /// Writes a document.
    ///
    /// A document without a revision creates; one with a revision updates,
    /// and is rejected with `Conflict` unless the revision matches a live
    /// leaf of that id's revision tree - the winner, or a losing conflict
    /// branch being resolved in place. Rejected writes never mutate stored
    /// state - callers must re-read and retry.
    ///
    /// Emits exactly one change event.
    pub fn put(&self, doc: &Document) -> StoreResult<RevisionId> {
        self.ensure_open()?;
        validate_id(&doc.id)?;

        let mut inner = self.inner.write();
        let parent = match inner.docs.get(&doc.id) {
            None => {
                if doc.rev.is_some() {
                    // A revision for a document we have never seen.
                    return Err(StoreError::conflict(&doc.id));
                }
                None
            }
            Some(state) => {
                if state.tree.is_tombstoned() {
                    let winner = state.tree.winner().clone();
                    match &doc.rev {
                        // Recreation over a tombstone extends its lineage.
                        None if self.config.allow_recreate_deleted => Some(winner),
                        Some(rev) if *rev == winner => Some(winner),
                        _ => return Err(StoreError::conflict(&doc.id)),
                    }
                } else {
                    match &doc.rev {
                        Some(rev) if state.tree.is_live_leaf(rev) => Some(rev.clone()),
                        _ => return Err(StoreError::conflict(&doc.id)),
                    }
                }
            }
        };

        let body_bytes = serde_json::to_vec(&doc.data)?;
        let rev = RevisionId::generate(parent.as_ref(), &body_bytes, false);
        let body = RevBody::new(doc.data.clone(), doc.attachments.clone());
        self.commit_write(&mut inner, &doc.id, parent, rev.clone(), body, false)?;
        Ok(rev)
    }

    /// Tombstones the revision `rev` of the document at `id`.
    ///
    /// Same compare-and-swap rule as [`DocumentStore::put`]: `rev` must be
    /// a live leaf. Removing the winner deletes the document (or promotes a
    /// surviving conflict branch); removing a losing leaf resolves that
    /// conflict and leaves the winner in place. The tombstone keeps the
    /// revision lineage so the resolution propagates to replication peers
    /// instead of resurrecting.
    pub fn remove(&self, id: &str, rev: &RevisionId) -> StoreResult<RevisionId> {
        self.ensure_open()?;
        let mut inner = self.inner.write();
        let state = inner.docs.get(id).ok_or_else(|| StoreError::not_found(id))?;
        if state.tree.is_tombstoned() {
            return Err(StoreError::not_found(id));
        }
        if !state.tree.is_live_leaf(rev) {
            return Err(StoreError::conflict(id));
        }

        let parent = rev.clone();
        let tombstone = RevisionId::generate(Some(&parent), b"", true);
        self.commit_write(
            &mut inner,
            id,
            Some(parent),
            tombstone.clone(),
            RevBody::default(),
            true,
        )?;
        Ok(tombstone)
    }

    /// Returns all live documents, ordered by id.
    pub fn list_all(&self, options: &ListOptions) -> StoreResult<Vec<Document>> {
        self.ensure_open()?;
        let inner = self.inner.read();
        let live = inner
            .docs
            .iter()
            .filter(|(_, state)| !state.tree.is_tombstoned())
            .map(|(id, state)| {
                assemble(id, state.tree.winner().clone(), state.tree.winning_node())
            });

        let docs: Vec<Document> = if options.descending {
            let mut all: Vec<Document> = live.collect();
            all.reverse();
            match options.limit {
                Some(limit) => all.into_iter().take(limit).collect(),
                None => all,
            }
        } else {
            match options.limit {
                Some(limit) => live.take(limit).collect(),
                None => live.collect(),
            }
        };
        Ok(docs)
    }

    /// Finds live documents matching a field-level predicate.
    ///
    /// Behaves as a full scan with a predicate filter; results are in id
    /// order.
    pub fn find(&self, selector: &Selector, limit: Option<usize>) -> StoreResult<Vec<Document>> {
        self.ensure_open()?;
        let inner = self.inner.read();
        let matches = inner
            .docs
            .iter()
            .filter(|(_, state)| !state.tree.is_tombstoned())
            .map(|(id, state)| {
                assemble(id, state.tree.winner().clone(), state.tree.winning_node())
            })
            .filter(|doc| selector.matches(doc));

        Ok(match limit {
            Some(limit) => matches.take(limit).collect(),
            None => matches.collect(),
        })
    }

    // ========================================================================
    // Conflict branches
    // ========================================================================

    /// Returns the non-winning live revisions of `id`, newest first.
    ///
    /// These are the conflict branches left behind by divergent concurrent
    /// edits. Callers resolve one by deleting it (`remove(id, &losing_rev)`)
    /// or by writing over it (`put` with the losing revision); either way
    /// the resolution replicates like any other write.
    pub fn conflicts(&self, id: &str) -> StoreResult<Vec<RevisionId>> {
        self.ensure_open()?;
        let inner = self.inner.read();
        let state = inner.docs.get(id).ok_or_else(|| StoreError::not_found(id))?;
        Ok(state.tree.conflicts())
    }

    /// All leaf revisions of `id`, tombstoned leaves included, newest
    /// first.
    ///
    /// Replication transmits every leaf, not just the winner, so conflict
    /// branches and their resolutions reach the peer.
    pub fn leaf_revisions(&self, id: &str) -> StoreResult<Vec<RevisionId>> {
        self.ensure_open()?;
        let inner = self.inner.read();
        let state = inner.docs.get(id).ok_or_else(|| StoreError::not_found(id))?;
        let mut leaves: Vec<RevisionId> = state.tree.leaves().cloned().collect();
        leaves.sort_by(|a, b| b.cmp(a));
        Ok(leaves)
    }

    /// Fetches a specific stored revision of `id`, including losing
    /// conflict branches.
    ///
    /// # Errors
    ///
    /// `NotFound` when the revision is unknown or its body was dropped by
    /// compaction.
    pub fn get_rev(&self, id: &str, rev: &RevisionId) -> StoreResult<Document> {
        self.ensure_open()?;
        let inner = self.inner.read();
        let state = inner.docs.get(id).ok_or_else(|| StoreError::not_found(id))?;
        let node = state.tree.node(rev).ok_or_else(|| StoreError::not_found(id))?;
        if node.body.is_none() {
            return Err(StoreError::not_found(id));
        }
        Ok(assemble(id, rev.clone(), node))
    }

    // ========================================================================
    // Attachments
    // ========================================================================

    /// Adds or replaces a named attachment, producing a new revision of
    /// the parent document.
    pub fn put_attachment(
        &self,
        id: &str,
        name: &str,
        rev: &RevisionId,
        content_type: &str,
        data: Vec<u8>,
    ) -> StoreResult<RevisionId> {
        self.ensure_open()?;
        self.mutate_attachments(id, rev, |attachments| {
            attachments.insert(name.to_string(), Attachment::new(content_type, data));
            Ok(())
        })
    }

    /// Removes a named attachment, producing a new revision of the parent
    /// document.
    pub fn remove_attachment(&self, id: &str, name: &str, rev: &RevisionId) -> StoreResult<RevisionId> {
        self.ensure_open()?;
        self.mutate_attachments(id, rev, |attachments| {
            if attachments.remove(name).is_none() {
                return Err(StoreError::AttachmentNotFound {
                    id: id.to_string(),
                    name: name.to_string(),
                });
            }
            Ok(())
        })
    }

    /// Downloads an attachment from the live document at `id`.
    pub fn get_attachment(&self, id: &str, name: &str) -> StoreResult<Attachment> {
        self.ensure_open()?;
        let inner = self.inner.read();
        let state = inner.docs.get(id).ok_or_else(|| StoreError::not_found(id))?;
        if state.tree.is_tombstoned() {
            return Err(StoreError::not_found(id));
        }
        state
            .tree
            .winning_node()
            .body
            .as_ref()
            .and_then(|body| body.attachments.get(name))
            .cloned()
            .ok_or_else(|| StoreError::AttachmentNotFound {
                id: id.to_string(),
                name: name.to_string(),
            })
    }

    fn mutate_attachments<F>(&self, id: &str, rev: &RevisionId, mutate: F) -> StoreResult<RevisionId>
    where
        F: FnOnce(&mut std::collections::BTreeMap<String, Attachment>) -> StoreResult<()>,
    {
        let mut inner = self.inner.write();
        let state = inner.docs.get(id).ok_or_else(|| StoreError::not_found(id))?;
        if state.tree.is_tombstoned() {
            return Err(StoreError::not_found(id));
        }
        let winner = state.tree.winner().clone();
        if *rev != winner {
            return Err(StoreError::conflict(id));
        }

        let mut body = state
            .tree
            .winning_node()
            .body
            .clone()
            .unwrap_or_default();
        mutate(&mut body.attachments)?;

        let body_bytes = serde_json::to_vec(&body.data)?;
        let new_rev = RevisionId::generate(Some(&winner), &body_bytes, false);
        self.commit_write(&mut inner, id, Some(winner), new_rev.clone(), body, false)?;
        Ok(new_rev)
    }

    // ========================================================================
    // Change feed
    // ========================================================================

    /// Subscribes to the change feed.
    ///
    /// Delivers catch-up events since `options.since` first (one per
    /// document, in commit order), then - in live mode - new events as
    /// writes commit. The returned [`ChangesFeed`] is cancellable at any
    /// time.
    pub fn subscribe(&self, options: &ChangesOptions) -> StoreResult<ChangesFeed> {
        self.ensure_open()?;
        // Holding the read lock makes the snapshot-then-register sequence
        // atomic with respect to writers, which emit under the write lock.
        let inner = self.inner.read();
        let backlog = changes_since_locked(&inner, options.since, None, options.include_docs);
        let rx = options
            .live
            .then(|| self.feed.register(options.include_docs));
        Ok(ChangesFeed::new(backlog, rx))
    }

    /// Returns committed changes after `since`, one entry per document,
    /// ordered by commit sequence. Tombstones are included so deletions
    /// propagate to replication peers.
    pub fn changes_since(
        &self,
        since: u64,
        limit: Option<usize>,
        include_docs: bool,
    ) -> StoreResult<Vec<ChangeEvent>> {
        self.ensure_open()?;
        let inner = self.inner.read();
        Ok(changes_since_locked(&inner, since, limit, include_docs))
    }

    /// The last committed sequence number.
    pub fn update_seq(&self) -> u64 {
        self.inner.read().update_seq
    }

    // ========================================================================
    // Replication surface
    // ========================================================================

    /// Fetches a revision together with its ancestry for transmission to
    /// a replication peer. Defaults to the winning revision, tombstones
    /// included.
    pub fn get_with_history(
        &self,
        id: &str,
        rev: Option<&RevisionId>,
    ) -> StoreResult<ReplicatedDoc> {
        self.ensure_open()?;
        let inner = self.inner.read();
        let state = inner.docs.get(id).ok_or_else(|| StoreError::not_found(id))?;
        let rev = rev.unwrap_or_else(|| state.tree.winner()).clone();
        let node = state.tree.node(&rev).ok_or_else(|| StoreError::not_found(id))?;
        let history = state.tree.history(&rev);
        Ok(ReplicatedDoc::new(assemble(id, rev, node), history))
    }

    /// Merges a replicated revision path into the local tree.
    ///
    /// Never a blind overwrite: lineages are compared and divergent edits
    /// become retained conflict branches. Idempotent - re-applying a
    /// known revision changes nothing and bumps nothing.
    ///
    /// Returns the new winning revision when the tree changed, `None`
    /// otherwise.
    pub fn apply_replicated(&self, rdoc: &ReplicatedDoc) -> StoreResult<Option<RevisionId>> {
        self.ensure_open()?;
        validate_id(&rdoc.doc.id)?;
        if rdoc.history.is_empty() || rdoc.doc.rev.as_ref() != rdoc.history.first() {
            return Err(StoreError::corrupt(
                "replicated document history does not start at its revision",
            ));
        }

        let mut inner = self.inner.write();
        let body = RevBody::new(rdoc.doc.data.clone(), rdoc.doc.attachments.clone());
        let id = rdoc.doc.id.as_str();

        let changed = match inner.docs.get_mut(id) {
            Some(state) => state
                .tree
                .merge_path(&rdoc.history, body, rdoc.doc.deleted),
            None => {
                inner.docs.insert(
                    id.to_string(),
                    DocState {
                        tree: RevTree::from_path(&rdoc.history, body, rdoc.doc.deleted),
                        last_seq: 0,
                    },
                );
                true
            }
        };

        if !changed {
            return Ok(None);
        }

        let seq = inner.update_seq + 1;
        inner.journal.append(&JournalRecord::Merge {
            seq,
            id: id.to_string(),
            history: rdoc.history.clone(),
            deleted: rdoc.doc.deleted,
            data: rdoc.doc.data.clone(),
            attachments: rdoc.doc.attachments.clone(),
        })?;
        inner.update_seq = seq;

        let state = inner
            .docs
            .get_mut(id)
            .ok_or_else(|| StoreError::corrupt("merged document vanished"))?;
        state.last_seq = seq;

        let winner = state.tree.winner().clone();
        let deleted = state.tree.is_tombstoned();
        let event = ChangeEvent {
            seq,
            id: id.to_string(),
            rev: winner.clone(),
            deleted,
            doc: (!deleted).then(|| assemble(id, winner.clone(), state.tree.winning_node())),
        };
        self.feed.emit(&event);
        Ok(Some(winner))
    }

    // ========================================================================
    // Local documents (checkpoint storage)
    // ========================================================================

    /// Writes a local document. Local documents are never replicated and
    /// never appear in changes, find, or list results; the replication
    /// engine uses them to persist checkpoints.
    pub fn put_local(&self, id: &str, value: Value) -> StoreResult<()> {
        self.ensure_open()?;
        let mut inner = self.inner.write();
        inner.journal.append(&JournalRecord::Local {
            id: id.to_string(),
            value: Some(value.clone()),
        })?;
        inner.locals.insert(id.to_string(), value);
        Ok(())
    }

    /// Reads a local document, if present.
    pub fn get_local(&self, id: &str) -> StoreResult<Option<Value>> {
        self.ensure_open()?;
        Ok(self.inner.read().locals.get(id).cloned())
    }

    /// Removes a local document. Removing an absent one is a no-op.
    pub fn remove_local(&self, id: &str) -> StoreResult<()> {
        self.ensure_open()?;
        let mut inner = self.inner.write();
        if inner.locals.contains_key(id) {
            inner.journal.append(&JournalRecord::Local {
                id: id.to_string(),
                value: None,
            })?;
            inner.locals.remove(id);
        }
        Ok(())
    }

    /// This store's stable replica id, assigned at first open.
    pub fn replica_id(&self) -> String {
        self.inner
            .read()
            .locals
            .get(REPLICA_ID_KEY)
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string()
    }

    // ========================================================================
    // Maintenance
    // ========================================================================

    /// Rewrites the journal from current state.
    ///
    /// Interior revision bodies are dropped; leaves (including losing
    /// conflict branches and tombstones) are kept.
    pub fn compact(&self) -> StoreResult<()> {
        self.ensure_open()?;
        let mut inner = self.inner.write();

        let mut records = Vec::new();
        for (id, state) in &inner.docs {
            for leaf in state.tree.leaves() {
                let node = state
                    .tree
                    .node(leaf)
                    .ok_or_else(|| StoreError::corrupt("leaf without node"))?;
                let body = node.body.clone().unwrap_or_default();
                records.push(JournalRecord::Merge {
                    seq: state.last_seq,
                    id: id.clone(),
                    history: state.tree.history(leaf),
                    deleted: node.deleted,
                    data: body.data,
                    attachments: body.attachments,
                });
            }
        }
        for (id, value) in &inner.locals {
            records.push(JournalRecord::Local {
                id: id.clone(),
                value: Some(value.clone()),
            });
        }

        inner.journal.rewrite(&records)?;
        debug!(records = records.len(), "journal compacted");
        Ok(())
    }

    /// Current journal size in bytes. Grows until [`DocumentStore::compact`]
    /// rewrites it.
    pub fn journal_size(&self) -> StoreResult<u64> {
        self.inner.read().journal.size()
    }

    /// Number of live (non-tombstoned) documents.
    pub fn doc_count(&self) -> usize {
        self.inner
            .read()
            .docs
            .values()
            .filter(|state| !state.tree.is_tombstoned())
            .count()
    }

    /// Number of live change-feed subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.feed.subscriber_count()
    }

    /// Closes the store, flushing the journal.
    pub fn close(&self) -> StoreResult<()> {
        let mut is_open = self.is_open.write();
        if !*is_open {
            return Ok(());
        }
        self.inner.write().journal.sync()?;
        *is_open = false;
        Ok(())
    }

    /// Returns true while the store is open.
    #[must_use]
    pub fn is_open(&self) -> bool {
        *self.is_open.read()
    }

    fn ensure_open(&self) -> StoreResult<()> {
        if *self.is_open.read() {
            Ok(())
        } else {
            Err(StoreError::Closed)
        }
    }

    /// Commits a locally written revision: journal, tree, seq, event.
    fn commit_write(
        &self,
        inner: &mut StoreInner,
        id: &str,
        parent: Option<RevisionId>,
        rev: RevisionId,
        body: RevBody,
        deleted: bool,
    ) -> StoreResult<()> {
        let seq = inner.update_seq + 1;
        inner.journal.append(&JournalRecord::Write {
            seq,
            id: id.to_string(),
            rev: rev.clone(),
            parent: parent.clone(),
            deleted,
            data: body.data.clone(),
            attachments: body.attachments.clone(),
        })?;

        match inner.docs.get_mut(id) {
            Some(state) => {
                state.tree.insert_child(parent.as_ref(), rev, body, deleted);
                state.last_seq = seq;
            }
            None => {
                inner.docs.insert(
                    id.to_string(),
                    DocState {
                        tree: RevTree::new(rev, body, deleted),
                        last_seq: seq,
                    },
                );
            }
        }
        inner.update_seq = seq;

        // The event reports the document's state after the write, matching
        // what `changes_since` would list: tombstoning a losing branch
        // leaves the winner in place, and deleting the winner may promote
        // a surviving branch.
        if let Some(state) = inner.docs.get(id) {
            let winner = state.tree.winner().clone();
            let tombstoned = state.tree.is_tombstoned();
            let doc = (!tombstoned)
                .then(|| assemble(id, winner.clone(), state.tree.winning_node()));
            self.feed.emit(&ChangeEvent {
                seq,
                id: id.to_string(),
                rev: winner,
                deleted: tombstoned,
                doc,
            });
        }
        Ok(())
    }
}

impl std::fmt::Debug for DocumentStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DocumentStore")
            .field("is_open", &self.is_open())
            .field("doc_count", &self.doc_count())
            .field("update_seq", &self.update_seq())
            .finish_non_exhaustive()
    }
}

impl Drop for DocumentStore {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

/// Builds a `Document` from a stored node.
fn assemble(id: &str, rev: RevisionId, node: &RevNode) -> Document {
    let body = node.body.clone().unwrap_or_default();
    Document {
        id: id.to_string(),
        rev: Some(rev),
        deleted: node.deleted,
        data: body.data,
        attachments: body.attachments,
    }
}

fn validate_id(id: &str) -> StoreResult<()> {
    if id.is_empty() {
        return Err(StoreError::invalid_id(id, "empty document id"));
    }
    if id.starts_with(LOCAL_PREFIX) {
        return Err(StoreError::invalid_id(id, "reserved local namespace"));
    }
    Ok(())
}

fn changes_since_locked(
    inner: &StoreInner,
    since: u64,
    limit: Option<usize>,
    include_docs: bool,
) -> Vec<ChangeEvent> {
    let mut changed: Vec<(&String, &DocState)> = inner
        .docs
        .iter()
        .filter(|(_, state)| state.last_seq > since)
        .collect();
    changed.sort_by_key(|(_, state)| state.last_seq);

    let events = changed.into_iter().map(|(id, state)| {
        let rev = state.tree.winner().clone();
        let deleted = state.tree.is_tombstoned();
        ChangeEvent {
            seq: state.last_seq,
            id: id.clone(),
            rev: rev.clone(),
            deleted,
            doc: (include_docs && !deleted)
                .then(|| assemble(id, rev, state.tree.winning_node())),
        }
    });

    match limit {
        Some(limit) => events.take(limit).collect(),
        None => events.collect(),
    }
}


/// Persistence tests that exercise the file-backed journal.
#[cfg(test)]
mod persistence_tests {
    use super::*;
    use serde_json::{json, Map};
    use tempfile::tempdir;

    fn page(title: &str) -> Map<String, Value> {
        let mut data = Map::new();
        data.insert("type".into(), json!("page"));
        data.insert("title".into(), json!(title));
        data
    }

    #[test]
    fn documents_persist_across_restarts() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("wiki.folio");

        let rev = {
            let store = DocumentStore::open(&path).unwrap();
            let rev = store.put(&Document::new("p1", page("Home"))).unwrap();
            store
                .put_attachment("p1", "logo.png", &rev, "image/png", vec![1, 2, 3])
                .unwrap();
            store.close().unwrap();
            rev
        };

        let store = DocumentStore::open(&path).unwrap();
        let doc = store.get("p1").unwrap();
        assert_eq!(doc.field("title"), Some(&json!("Home")));
        assert!(doc.rev.unwrap() > rev);
        assert_eq!(store.get_attachment("p1", "logo.png").unwrap().data, vec![1, 2, 3]);
    }

    #[test]
    fn tombstones_and_seq_persist() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("wiki.folio");

        {
            let store = DocumentStore::open(&path).unwrap();
            let rev = store.put(&Document::new("p1", page("A"))).unwrap();
            store.remove("p1", &rev).unwrap();
            store.close().unwrap();
        }

        let store = DocumentStore::open(&path).unwrap();
        assert!(store.get("p1").unwrap_err().is_not_found());
        assert_eq!(store.update_seq(), 2);
        let changes = store.changes_since(0, None, false).unwrap();
        assert!(changes[0].deleted);
    }

    #[test]
    fn recovery_without_close() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("crash.folio");

        {
            let store =
                DocumentStore::open_with_config(&path, StoreConfig::default().sync_on_commit(true))
                    .unwrap();
            store.put(&Document::new("p1", page("survives"))).unwrap();
            // Dropped without close(); the journal was synced per commit.
            std::mem::forget(store);
        }

        let store = DocumentStore::open(&path).unwrap();
        assert_eq!(store.get("p1").unwrap().field("title"), Some(&json!("survives")));
    }

    #[test]
    fn replica_id_persists() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("id.folio");

        let first = {
            let store = DocumentStore::open(&path).unwrap();
            let id = store.replica_id();
            store.close().unwrap();
            id
        };

        let store = DocumentStore::open(&path).unwrap();
        assert_eq!(store.replica_id(), first);
    }

    #[test]
    fn checkpoints_persist_across_restarts() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("ckpt.folio");

        {
            let store = DocumentStore::open(&path).unwrap();
            store.put_local("_local/peer", json!({"source_seq": 7})).unwrap();
            store.close().unwrap();
        }

        let store = DocumentStore::open(&path).unwrap();
        assert_eq!(
            store.get_local("_local/peer").unwrap(),
            Some(json!({"source_seq": 7}))
        );
    }
}
