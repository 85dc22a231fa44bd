//! Change feed for observing committed writes.
//!
//! The store emits one [`ChangeEvent`] per committed write, in commit
//! order. Consumers subscribe through
//! [`DocumentStore::subscribe`](crate::DocumentStore::subscribe), which
//! returns a [`ChangesFeed`]: first the catch-up events since the caller's
//! marker, then - in live mode - new events as they are committed.
//!
//! Events are never reordered. There is no duplicate suppression across
//! restarts, so consumers must be idempotent.

use crate::document::Document;
use crate::revision::RevisionId;
use parking_lot::RwLock;
use std::collections::VecDeque;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::time::Duration;

/// A single committed change.
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeEvent {
    /// Commit sequence number, strictly increasing per store.
    pub seq: u64,
    /// Affected document id.
    pub id: String,
    /// The document's winning revision after the write.
    pub rev: RevisionId,
    /// True when the write tombstoned the document.
    pub deleted: bool,
    /// The document body, when the subscription asked for it.
    pub doc: Option<Document>,
}

/// Options for a change subscription.
#[derive(Debug, Clone, Default)]
pub struct ChangesOptions {
    /// Deliver only changes committed after this sequence marker.
    pub since: u64,
    /// Keep the subscription open for future changes.
    pub live: bool,
    /// Attach document bodies to events.
    pub include_docs: bool,
}

impl ChangesOptions {
    /// Creates default options: everything since 0, one-shot, no bodies.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts after the given sequence marker.
    #[must_use]
    pub fn since(mut self, seq: u64) -> Self {
        self.since = seq;
        self
    }

    /// Keeps the subscription open for future changes.
    #[must_use]
    pub fn live(mut self) -> Self {
        self.live = true;
        self
    }

    /// Attaches document bodies to events.
    #[must_use]
    pub fn include_docs(mut self) -> Self {
        self.include_docs = true;
        self
    }
}

/// Distributes committed change events to live subscribers.
///
/// Disconnected subscribers are pruned on the next emit.
#[derive(Debug, Default)]
pub(crate) struct ChangeFeed {
    subscribers: RwLock<Vec<Subscriber>>,
}

#[derive(Debug)]
struct Subscriber {
    tx: Sender<ChangeEvent>,
    include_docs: bool,
}

impl ChangeFeed {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Registers a live subscriber channel.
    pub(crate) fn register(&self, include_docs: bool) -> Receiver<ChangeEvent> {
        let (tx, rx) = mpsc::channel();
        self.subscribers.write().push(Subscriber { tx, include_docs });
        rx
    }

    /// Emits an event to all subscribers, pruning dead ones.
    ///
    /// Document bodies are stripped for subscribers that did not ask for
    /// them.
    pub(crate) fn emit(&self, event: &ChangeEvent) {
        let mut subscribers = self.subscribers.write();
        subscribers.retain(|sub| {
            let mut event = event.clone();
            if !sub.include_docs {
                event.doc = None;
            }
            sub.tx.send(event).is_ok()
        });
    }

    /// Number of currently attached subscribers.
    pub(crate) fn subscriber_count(&self) -> usize {
        self.subscribers.read().len()
    }
}

/// A cancellable stream of change events.
///
/// Yields the catch-up backlog first. In live mode it then blocks on new
/// events until cancelled or the store is dropped; in one-shot mode it
/// ends after the backlog.
///
/// Cancellation releases the subscription immediately: no events are
/// delivered afterwards, and the store prunes the channel on its next
/// emit. Dropping the feed has the same effect.
#[derive(Debug)]
pub struct ChangesFeed {
    backlog: VecDeque<ChangeEvent>,
    rx: Option<Receiver<ChangeEvent>>,
}

impl ChangesFeed {
    pub(crate) fn new(backlog: Vec<ChangeEvent>, rx: Option<Receiver<ChangeEvent>>) -> Self {
        Self {
            backlog: backlog.into(),
            rx,
        }
    }

    /// Returns the next change.
    ///
    /// Blocks in live mode until a write is committed or the subscription
    /// is cancelled. Returns `None` when the stream has ended.
    pub fn next_change(&mut self) -> Option<ChangeEvent> {
        if let Some(event) = self.backlog.pop_front() {
            return Some(event);
        }
        self.rx.as_ref().and_then(|rx| rx.recv().ok())
    }

    /// Returns the next change, waiting at most `timeout`.
    ///
    /// `None` means the timeout elapsed or the stream ended.
    pub fn next_change_timeout(&mut self, timeout: Duration) -> Option<ChangeEvent> {
        if let Some(event) = self.backlog.pop_front() {
            return Some(event);
        }
        match self.rx.as_ref()?.recv_timeout(timeout) {
            Ok(event) => Some(event),
            Err(RecvTimeoutError::Timeout | RecvTimeoutError::Disconnected) => None,
        }
    }

    /// Cancels the subscription.
    ///
    /// Pending backlog is discarded and no further events are delivered.
    pub fn cancel(&mut self) {
        self.backlog.clear();
        self.rx = None;
    }

    /// Returns true once cancelled (or created one-shot and drained).
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.backlog.is_empty() && self.rx.is_none()
    }

    /// Number of catch-up events not yet consumed.
    #[must_use]
    pub fn backlog_len(&self) -> usize {
        self.backlog.len()
    }
}

impl Iterator for ChangesFeed {
    type Item = ChangeEvent;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_change()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    fn event(seq: u64, id: &str) -> ChangeEvent {
        ChangeEvent {
            seq,
            id: id.to_string(),
            rev: RevisionId::new(1, "abc"),
            deleted: false,
            doc: None,
        }
    }

    #[test]
    fn emit_reaches_all_subscribers() {
        let feed = ChangeFeed::new();
        let rx1 = feed.register(false);
        let rx2 = feed.register(false);

        feed.emit(&event(1, "a"));

        assert_eq!(rx1.recv().unwrap().seq, 1);
        assert_eq!(rx2.recv().unwrap().seq, 1);
    }

    #[test]
    fn dead_subscribers_are_pruned() {
        let feed = ChangeFeed::new();
        let rx = feed.register(false);
        assert_eq!(feed.subscriber_count(), 1);

        drop(rx);
        feed.emit(&event(1, "a"));
        assert_eq!(feed.subscriber_count(), 0);
    }

    #[test]
    fn backlog_drains_before_live_events() {
        let feed = ChangeFeed::new();
        let rx = feed.register(false);
        feed.emit(&event(3, "c"));

        let mut changes = ChangesFeed::new(vec![event(1, "a"), event(2, "b")], Some(rx));
        assert_eq!(changes.next_change().unwrap().seq, 1);
        assert_eq!(changes.next_change().unwrap().seq, 2);
        assert_eq!(changes.next_change().unwrap().seq, 3);
    }

    #[test]
    fn one_shot_ends_after_backlog() {
        let mut changes = ChangesFeed::new(vec![event(1, "a")], None);
        assert!(changes.next_change().is_some());
        assert!(changes.next_change().is_none());
        assert!(changes.is_finished());
    }

    #[test]
    fn cancel_stops_delivery_immediately() {
        let feed = ChangeFeed::new();
        let rx = feed.register(false);
        let mut changes = ChangesFeed::new(vec![event(1, "a")], Some(rx));

        changes.cancel();
        feed.emit(&event(2, "b"));

        assert!(changes.next_change().is_none());
        assert!(changes.is_finished());
    }

    #[test]
    fn timeout_returns_none_when_idle() {
        let feed = ChangeFeed::new();
        let rx = feed.register(false);
        let mut changes = ChangesFeed::new(Vec::new(), Some(rx));

        assert!(changes
            .next_change_timeout(Duration::from_millis(20))
            .is_none());
    }

    #[test]
    fn live_subscription_blocks_until_emit() {
        let feed = Arc::new(ChangeFeed::new());
        let rx = feed.register(false);
        let mut changes = ChangesFeed::new(Vec::new(), Some(rx));

        let emitter = Arc::clone(&feed);
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(10));
            emitter.emit(&event(7, "x"));
        });

        let got = changes.next_change_timeout(Duration::from_millis(500)).unwrap();
        assert_eq!(got.seq, 7);
        handle.join().unwrap();
    }
}
