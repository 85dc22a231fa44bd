//! Store configuration.

/// Configuration for a [`DocumentStore`](crate::DocumentStore).
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Allow a revision-less `put` to recreate a tombstoned id.
    ///
    /// The new edit extends the tombstone's lineage, so replicas that
    /// still hold the tombstone see an ordinary descendant and conflict
    /// detection stays sound.
    pub allow_recreate_deleted: bool,
    /// Fsync the journal on every commit instead of only flushing.
    pub sync_on_commit: bool,
}

impl StoreConfig {
    /// Sets whether tombstoned ids may be recreated without a revision.
    #[must_use]
    pub fn allow_recreate_deleted(mut self, allow: bool) -> Self {
        self.allow_recreate_deleted = allow;
        self
    }

    /// Sets whether every commit fsyncs the journal.
    #[must_use]
    pub fn sync_on_commit(mut self, sync: bool) -> Self {
        self.sync_on_commit = sync;
        self
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            allow_recreate_deleted: true,
            sync_on_commit: false,
        }
    }
}
