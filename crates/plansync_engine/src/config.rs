//! Configuration for the sync runner.

use std::time::Duration;

/// When the pull phase stops requesting pages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PullTermination {
    /// Stop only when a page comes back empty.
    EmptyPage,
    /// Also stop after a page shorter than the page size. Saves one round
    /// trip per pass.
    ShortPage,
}

/// Configuration for sync passes.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Pull loop termination rule.
    pub pull_termination: PullTermination,
    /// Maximum number of rows per bulk insert call.
    pub push_batch_size: usize,
    /// Retry a failed bulk insert one row at a time.
    pub fallback_on_bulk_failure: bool,
}

impl SyncConfig {
    /// Creates the default configuration.
    pub fn new() -> Self {
        Self {
            pull_termination: PullTermination::EmptyPage,
            push_batch_size: 100,
            fallback_on_bulk_failure: true,
        }
    }

    /// Sets the pull termination rule.
    pub fn with_pull_termination(mut self, termination: PullTermination) -> Self {
        self.pull_termination = termination;
        self
    }

    /// Sets the bulk insert size. Zero is treated as one.
    pub fn with_push_batch_size(mut self, size: usize) -> Self {
        self.push_batch_size = size.max(1);
        self
    }

    /// Enables or disables per-row fallback after a failed bulk insert.
    pub fn with_bulk_fallback(mut self, enabled: bool) -> Self {
        self.fallback_on_bulk_failure = enabled;
        self
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Backoff policy of [`SyncRunner::run_with_retry`](crate::SyncRunner::run_with_retry).
///
/// Delays double from `base_delay` on every attempt and never exceed
/// `max_delay`, server hints included.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Passes to try in total, the first one included.
    pub max_attempts: u32,
    /// Delay before the first retry.
    pub base_delay: Duration,
    /// Ceiling for every delay.
    pub max_delay: Duration,
    /// Spread delays by up to a quarter so entity plans do not retry in step.
    pub jitter: bool,
}

impl RetryConfig {
    /// Retries up to `max_attempts` passes with a 250ms base delay.
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            base_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(30),
            jitter: true,
        }
    }

    /// Sets the delay before the first retry.
    pub fn with_base_delay(mut self, delay: Duration) -> Self {
        self.base_delay = delay;
        self
    }

    /// Sets the delay ceiling.
    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Enables or disables jitter.
    pub fn with_jitter(mut self, enabled: bool) -> Self {
        self.jitter = enabled;
        self
    }

    /// Delay before retry number `retry` (1-based), stretched to a server
    /// hint when one was given.
    pub fn delay_with_hint(&self, retry: u32, hint: Option<Duration>) -> Duration {
        let backoff = self.backoff(retry);
        match hint {
            Some(hint) => backoff.max(hint).min(self.max_delay),
            None => backoff,
        }
    }

    fn backoff(&self, retry: u32) -> Duration {
        if retry == 0 {
            return Duration::ZERO;
        }
        let doubled = self
            .base_delay
            .saturating_mul(1u32 << retry.saturating_sub(1).min(16));
        let delay = doubled.min(self.max_delay);
        if self.jitter {
            delay.mul_f64(1.0 + 0.25 * jitter_fraction()).min(self.max_delay)
        } else {
            delay
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::new(3)
    }
}

/// Time-derived fraction in `[0, 1)`.
fn jitter_fraction() -> f64 {
    use std::time::SystemTime;
    let nanos = SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .subsec_nanos();
    f64::from(nanos % 1000) / 1000.0
}
