//! Bidirectional sync sessions.
//!
//! [`sync`] starts a background session replicating a local store against
//! a remote peer: pull phase, then push phase, per cycle. One-shot
//! sessions stop once caught up; live sessions pause and resume as new
//! writes appear. With retry enabled, retryable network failures back off
//! exponentially and the session keeps trying until cancelled.

use crate::config::SyncOptions;
use crate::error::{SyncError, SyncResult};
use crate::replicator;
use crate::transport::ReplicationTransport;
use foliodb_protocol::ReplicationCheckpoint;
use foliodb_store::{ChangesOptions, DocumentStore};
use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// The lifecycle state of a sync session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    /// Not currently replicating: one-shot finished or cancelled.
    Idle,
    /// A replication cycle is in progress.
    Active,
    /// Caught up (live mode) or waiting out a retry backoff.
    Paused,
    /// Halted on a non-recoverable error.
    Failed,
}

impl SyncState {
    /// Returns true while the session is doing work.
    #[must_use]
    pub fn is_active(&self) -> bool {
        matches!(self, SyncState::Active)
    }

    /// Returns true once the session has ended.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, SyncState::Idle | SyncState::Failed)
    }
}

/// Notifications a session emits while it runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncEvent {
    /// A replication cycle started.
    Active,
    /// The session caught up and is waiting for new changes.
    Paused,
    /// A recoverable error occurred; the session may retry.
    Error(String),
    /// The remote rejected our credentials. The session halts.
    Denied(String),
}

/// Counters for one sync session.
#[derive(Debug, Clone, Default)]
pub struct SyncStats {
    /// Completed pull+push cycles.
    pub cycles_completed: u64,
    /// Documents applied locally from the remote.
    pub docs_pulled: u64,
    /// Documents transmitted to the remote.
    pub docs_pushed: u64,
    /// Retry attempts after failures.
    pub retries: u64,
    /// Most recent error message.
    pub last_error: Option<String>,
}

/// Handle to a running sync session.
///
/// Dropping the handle cancels the session.
pub struct SyncHandle {
    state: Arc<RwLock<SyncState>>,
    stats: Arc<RwLock<SyncStats>>,
    cancelled: Arc<AtomicBool>,
    events: Receiver<SyncEvent>,
    worker: Option<JoinHandle<()>>,
}

impl SyncHandle {
    /// The session's current state.
    pub fn state(&self) -> SyncState {
        *self.state.read()
    }

    /// A snapshot of the session's counters.
    pub fn stats(&self) -> SyncStats {
        self.stats.read().clone()
    }

    /// Requests cancellation.
    ///
    /// The worker notices between batches and during waits; in-flight
    /// state is never corrupted. At worst the checkpoint lags one batch,
    /// which the next session absorbs as redelivery.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    /// Waits up to `timeout` for the next session event.
    pub fn next_event(&self, timeout: Duration) -> Option<SyncEvent> {
        match self.events.recv_timeout(timeout) {
            Ok(event) => Some(event),
            Err(RecvTimeoutError::Timeout | RecvTimeoutError::Disconnected) => None,
        }
    }

    /// Waits for the session to end and returns its final counters.
    ///
    /// Live sessions run until cancelled, so call
    /// [`SyncHandle::cancel`] first when joining one.
    pub fn join(mut self) -> SyncStats {
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
        self.stats.read().clone()
    }
}

impl Drop for SyncHandle {
    fn drop(&mut self) {
        self.cancel();
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

impl std::fmt::Debug for SyncHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncHandle")
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

/// Starts bidirectional replication between `local` and a remote peer.
pub fn sync(
    local: Arc<DocumentStore>,
    transport: Arc<dyn ReplicationTransport>,
    options: SyncOptions,
) -> SyncHandle {
    let state = Arc::new(RwLock::new(SyncState::Active));
    let stats = Arc::new(RwLock::new(SyncStats::default()));
    let cancelled = Arc::new(AtomicBool::new(false));
    let (events_tx, events_rx) = mpsc::channel();

    let worker = {
        let state = Arc::clone(&state);
        let stats = Arc::clone(&stats);
        let cancelled = Arc::clone(&cancelled);
        thread::spawn(move || {
            let session = Session {
                local,
                transport,
                options,
                state,
                stats,
                cancelled,
                events: events_tx,
            };
            session.run();
        })
    };

    SyncHandle {
        state,
        stats,
        cancelled,
        events: events_rx,
        worker: Some(worker),
    }
}

struct Session {
    local: Arc<DocumentStore>,
    transport: Arc<dyn ReplicationTransport>,
    options: SyncOptions,
    state: Arc<RwLock<SyncState>>,
    stats: Arc<RwLock<SyncStats>>,
    cancelled: Arc<AtomicBool>,
    events: Sender<SyncEvent>,
}

impl Session {
    fn run(&self) {
        info!(peer = %self.transport.endpoint_address(), live = self.options.live, "sync session started");

        // Loaded lazily inside the loop so a flaky peer during checkpoint
        // negotiation gets the same retry treatment as a flaky cycle.
        let mut checkpoint: Option<ReplicationCheckpoint> = None;

        let mut attempt = 0u32;
        let final_state = loop {
            if self.is_cancelled() {
                break SyncState::Idle;
            }

            self.set_state(SyncState::Active);
            self.emit(SyncEvent::Active);

            let outcome = if let Some(ckpt) = checkpoint.as_mut() {
                self.cycle(ckpt)
            } else {
                replicator::load_checkpoint(&self.local, self.transport.as_ref())
                    .and_then(|loaded| self.cycle(checkpoint.insert(loaded)))
            };

            match outcome {
                Ok((pulled, pushed)) => {
                    attempt = 0;
                    {
                        let mut stats = self.stats.write();
                        stats.cycles_completed += 1;
                        stats.docs_pulled += pulled;
                        stats.docs_pushed += pushed;
                        stats.last_error = None;
                    }
                    debug!(pulled, pushed, "cycle complete");

                    if !self.options.live {
                        break SyncState::Idle;
                    }

                    self.set_state(SyncState::Paused);
                    self.emit(SyncEvent::Paused);
                    let pushed_up_to = checkpoint.as_ref().map_or(0, |c| c.target_seq);
                    if !self.wait_for_work(pushed_up_to) {
                        break SyncState::Idle;
                    }
                }
                Err(SyncError::Cancelled) => break SyncState::Idle,
                Err(SyncError::Denied(message)) => {
                    warn!(%message, "remote denied access");
                    self.stats.write().last_error = Some(message.clone());
                    self.emit(SyncEvent::Denied(message));
                    break SyncState::Failed;
                }
                Err(error) if error.is_retryable() && self.options.retry => {
                    attempt += 1;
                    {
                        let mut stats = self.stats.write();
                        stats.retries += 1;
                        stats.last_error = Some(error.to_string());
                    }
                    self.emit(SyncEvent::Error(error.to_string()));
                    self.set_state(SyncState::Paused);

                    let delay = self.options.retry_config.delay_for_attempt(attempt);
                    debug!(attempt, ?delay, "backing off before retry");
                    if !self.sleep_cancellable(delay) {
                        break SyncState::Idle;
                    }
                }
                Err(error) => {
                    warn!(%error, "sync halted");
                    self.record_error(&error);
                    self.emit(SyncEvent::Error(error.to_string()));
                    break SyncState::Failed;
                }
            }
        };

        self.set_state(final_state);
        info!(state = ?final_state, "sync session ended");
    }

    /// One pull-then-push cycle.
    fn cycle(&self, checkpoint: &mut ReplicationCheckpoint) -> SyncResult<(u64, u64)> {
        let pulled = replicator::pull(
            &self.local,
            self.transport.as_ref(),
            checkpoint,
            self.options.batch_size,
            &self.cancelled,
        )?;
        let pushed = replicator::push(
            &self.local,
            self.transport.as_ref(),
            checkpoint,
            self.options.batch_size,
            &self.cancelled,
        )?;
        Ok((pulled, pushed))
    }

    /// Waits for new local writes or the poll interval.
    ///
    /// Blocks on a live change-feed subscription, waking in short slices
    /// so cancellation stays prompt. Returns false when cancelled.
    fn wait_for_work(&self, pushed_up_to: u64) -> bool {
        let options = ChangesOptions::new().since(pushed_up_to).live();
        let mut feed = match self.local.subscribe(&options) {
            Ok(feed) => feed,
            // The store is closing; treat it like cancellation.
            Err(_) => return false,
        };

        let deadline = Instant::now() + self.options.poll_interval;
        loop {
            if self.is_cancelled() {
                feed.cancel();
                return false;
            }
            let now = Instant::now();
            if now >= deadline {
                // Poll the remote even without local activity.
                return true;
            }
            let slice = Duration::from_millis(25).min(deadline - now);
            if feed.next_change_timeout(slice).is_some() {
                return true;
            }
        }
    }

    /// Sleeps in cancel-checkable slices. Returns false when cancelled.
    fn sleep_cancellable(&self, duration: Duration) -> bool {
        let deadline = Instant::now() + duration;
        while Instant::now() < deadline {
            if self.is_cancelled() {
                return false;
            }
            thread::sleep(Duration::from_millis(25).min(duration));
        }
        !self.is_cancelled()
    }

    fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    fn set_state(&self, state: SyncState) {
        *self.state.write() = state;
    }

    fn emit(&self, event: SyncEvent) {
        // The caller may have dropped the receiver; that is fine.
        let _ = self.events.send(event);
    }

    fn record_error(&self, error: &SyncError) {
        self.stats.write().last_error = Some(error.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_helpers() {
        assert!(SyncState::Active.is_active());
        assert!(!SyncState::Paused.is_active());
        assert!(SyncState::Idle.is_terminal());
        assert!(SyncState::Failed.is_terminal());
        assert!(!SyncState::Active.is_terminal());
    }
}
