//! Configuration for replication.

use std::time::Duration;

/// Options for a replication session.
#[derive(Debug, Clone)]
pub struct SyncOptions {
    /// Keep the session alive after catching up, replicating future
    /// changes as they happen.
    pub live: bool,
    /// Retry automatically on retryable network failures.
    pub retry: bool,
    /// Maximum number of documents per batch.
    pub batch_size: usize,
    /// How long a live session waits before polling the remote again.
    pub poll_interval: Duration,
    /// Backoff configuration used when `retry` is set.
    pub retry_config: RetryConfig,
}

impl SyncOptions {
    /// One-shot options: catch up both directions, then stop.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Enables live mode.
    #[must_use]
    pub fn live(mut self) -> Self {
        self.live = true;
        self
    }

    /// Enables automatic retry on retryable failures.
    #[must_use]
    pub fn retry(mut self) -> Self {
        self.retry = true;
        self
    }

    /// Sets the batch size.
    #[must_use]
    pub fn with_batch_size(mut self, size: usize) -> Self {
        self.batch_size = size.max(1);
        self
    }

    /// Sets the live-mode poll interval.
    #[must_use]
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Sets the retry backoff configuration.
    #[must_use]
    pub fn with_retry_config(mut self, config: RetryConfig) -> Self {
        self.retry_config = config;
        self
    }
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            live: false,
            retry: false,
            batch_size: 100,
            poll_interval: Duration::from_secs(5),
            retry_config: RetryConfig::default(),
        }
    }
}

/// Exponential backoff between retry attempts.
///
/// There is no attempt cap: a live session with retry keeps trying until
/// cancelled. The delay is bounded by `max_delay`.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Delay before the first retry.
    pub initial_delay: Duration,
    /// Upper bound on the delay between retries.
    pub max_delay: Duration,
    /// Multiplier applied per consecutive failure.
    pub backoff_multiplier: f64,
    /// Whether to add jitter to delays.
    pub add_jitter: bool,
}

impl RetryConfig {
    /// Sets the initial delay.
    #[must_use]
    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    /// Sets the maximum delay.
    #[must_use]
    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Sets the backoff multiplier.
    #[must_use]
    pub fn with_backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = multiplier;
        self
    }

    /// Disables jitter, for deterministic tests.
    #[must_use]
    pub fn without_jitter(mut self) -> Self {
        self.add_jitter = false;
        self
    }

    /// Calculates the delay before retry `attempt` (1-indexed).
    #[must_use]
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }

        let base = self.initial_delay.as_secs_f64()
            * self.backoff_multiplier.powi(attempt.saturating_sub(1) as i32);
        let bounded = base.min(self.max_delay.as_secs_f64());

        if self.add_jitter {
            // Up to 25% jitter to avoid synchronized retry storms.
            Duration::from_secs_f64(bounded + bounded * 0.25 * jitter_fraction())
        } else {
            Duration::from_secs_f64(bounded)
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            backoff_multiplier: 2.0,
            add_jitter: true,
        }
    }
}

/// Cheap time-derived jitter in `[0, 1)`.
fn jitter_fraction() -> f64 {
    use std::time::SystemTime;
    let nanos = SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .subsec_nanos();
    f64::from(nanos % 1000) / 1000.0
}
