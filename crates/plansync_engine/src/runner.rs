//! Sync runner: one pull-then-push pass over one entity type.

use crate::config::{RetryConfig, SyncConfig};
use crate::error::{SyncError, SyncResult};
use crate::pull::pull_all;
use crate::push::push_all;
use crate::report::SyncReport;
use crate::spec::SyncSpec;
use plansync_protocol::SyncRow;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};

/// Phase of a pass.
///
/// Each invocation moves `Idle → Pulling → Pushing → Idle`. The phase is
/// reported through the phase hook; the runner itself keeps no state
/// between invocations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncPhase {
    /// Not syncing.
    Idle,
    /// Downloading and applying remote pages.
    Pulling,
    /// Uploading dirty rows.
    Pushing,
}

/// Callback invoked on every phase change with the entity name.
pub type PhaseHook = dyn Fn(&str, SyncPhase) + Send + Sync;

/// Shared flag to cancel a pass between pages or rows.
///
/// Cancellation never splits a page from its cursor, nor a remote success
/// from its `mark_clean`.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    /// Creates a token that is not cancelled.
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests cancellation.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    /// Clears a previous cancellation.
    pub fn reset(&self) {
        self.cancelled.store(false, Ordering::SeqCst);
    }

    /// Returns true if cancellation was requested.
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    pub(crate) fn check(&self) -> SyncResult<()> {
        if self.is_cancelled() {
            Err(SyncError::Cancelled)
        } else {
            Ok(())
        }
    }
}

/// Executes sync passes.
///
/// The runner holds configuration only. All durable state lives behind the
/// spec's local-store functions, so one runner can serve every entity type.
/// Passes over the same entity type must not overlap; the runner does no
/// locking of its own.
#[derive(Clone, Default)]
pub struct SyncRunner {
    config: SyncConfig,
    cancel: CancelToken,
    phase_hook: Option<Arc<PhaseHook>>,
}

impl SyncRunner {
    /// Creates a runner.
    pub fn new(config: SyncConfig) -> Self {
        Self {
            config,
            cancel: CancelToken::new(),
            phase_hook: None,
        }
    }

    /// Uses an externally owned cancellation token.
    pub fn with_cancel_token(mut self, token: CancelToken) -> Self {
        self.cancel = token;
        self
    }

    /// Sets the phase-change callback.
    pub fn with_phase_hook(mut self, hook: Arc<PhaseHook>) -> Self {
        self.phase_hook = Some(hook);
        self
    }

    /// Gets the configuration.
    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Gets the cancellation token.
    pub fn cancel_token(&self) -> &CancelToken {
        &self.cancel
    }

    fn enter(&self, entity: &str, phase: SyncPhase) {
        if let Some(hook) = &self.phase_hook {
            hook(entity, phase);
        }
    }

    /// Performs a full pass: pull until drained, then push every dirty row.
    pub fn run<R, I, U>(&self, spec: &SyncSpec<R, I, U>) -> SyncResult<SyncReport>
    where
        R: SyncRow + Clone,
    {
        if spec.page_size == 0 {
            return Err(SyncError::InvalidPageSize(0));
        }

        let start = Instant::now();
        let mut report = SyncReport::new(spec.entity.clone());

        self.enter(&spec.entity, SyncPhase::Pulling);
        let result = pull_all(spec, &self.config, &self.cancel, &mut report).and_then(|()| {
            self.enter(&spec.entity, SyncPhase::Pushing);
            push_all(spec, &self.config, &self.cancel, &mut report)
        });
        self.enter(&spec.entity, SyncPhase::Idle);

        match result {
            Ok(()) => {
                info!(
                    "Synced {} in {:?}: pulled {}, inserted {}, updated {}, conflicts {}",
                    spec.entity,
                    start.elapsed(),
                    report.pulled,
                    report.inserted,
                    report.updated,
                    report.conflicts
                );
                if report.needs_attention() {
                    warn!(
                        "{} has {} missing and {} failed rows",
                        spec.entity,
                        report.missing.len(),
                        report.failures.len()
                    );
                }
                Ok(report)
            }
            Err(e) => {
                warn!("Sync of {} stopped: {}", spec.entity, e);
                Err(e)
            }
        }
    }

    /// Runs only the pull phase.
    pub fn pull<R, I, U>(&self, spec: &SyncSpec<R, I, U>) -> SyncResult<SyncReport>
    where
        R: SyncRow + Clone,
    {
        if spec.page_size == 0 {
            return Err(SyncError::InvalidPageSize(0));
        }
        let mut report = SyncReport::new(spec.entity.clone());
        self.enter(&spec.entity, SyncPhase::Pulling);
        let result = pull_all(spec, &self.config, &self.cancel, &mut report);
        self.enter(&spec.entity, SyncPhase::Idle);
        result.map(|()| report)
    }

    /// Runs only the push phase.
    pub fn push<R, I, U>(&self, spec: &SyncSpec<R, I, U>) -> SyncResult<SyncReport>
    where
        R: SyncRow + Clone,
    {
        let mut report = SyncReport::new(spec.entity.clone());
        self.enter(&spec.entity, SyncPhase::Pushing);
        let result = push_all(spec, &self.config, &self.cancel, &mut report);
        self.enter(&spec.entity, SyncPhase::Idle);
        result.map(|()| report)
    }

    /// Clears the cursor and runs a pass that pulls everything again.
    pub fn full_resync<R, I, U>(&self, spec: &SyncSpec<R, I, U>) -> SyncResult<SyncReport>
    where
        R: SyncRow + Clone,
    {
        info!("Resetting cursor for {}", spec.entity);
        (spec.reset_cursor)()?;
        self.run(spec)
    }

    /// Runs a pass, retrying it when the pull phase hits a retryable error.
    ///
    /// Rate-limit hints stretch the backoff delay.
    pub fn run_with_retry<R, I, U>(
        &self,
        spec: &SyncSpec<R, I, U>,
        retry: &RetryConfig,
    ) -> SyncResult<SyncReport>
    where
        R: SyncRow + Clone,
    {
        let attempts = retry.max_attempts.max(1);
        let mut attempt = 0;

        loop {
            self.cancel.check()?;

            match self.run(spec) {
                Ok(report) => return Ok(report),
                Err(e) if e.is_retryable() && attempt + 1 < attempts => {
                    attempt += 1;
                    let delay = retry.delay_with_hint(attempt, e.retry_after());
                    warn!(
                        "Retrying {} in {:?} (attempt {}/{}): {}",
                        spec.entity,
                        delay,
                        attempt + 1,
                        attempts,
                        e
                    );
                    std::thread::sleep(delay);
                }
                Err(e) => return Err(e),
            }
        }
    }
}

impl std::fmt::Debug for SyncRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncRunner")
            .field("config", &self.config)
            .field("cancelled", &self.cancel.is_cancelled())
            .finish_non_exhaustive()
    }
}
