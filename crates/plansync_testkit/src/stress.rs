//! Stress helpers for sync.
//!
//! These runs keep the remote changing on other threads while passes are
//! executed, then check that one final pass converges.

use crate::fixtures::{task, TaskPair};
use plansync_engine::SyncRunner;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

/// Result of a stress run.
#[derive(Debug, Clone)]
pub struct StressTestResult {
    /// Passes that completed.
    pub passes: usize,
    /// Passes that returned an error.
    pub failed_passes: usize,
    /// Remote writes made by writer threads.
    pub remote_writes: usize,
    /// Rows pulled across all passes.
    pub pulled: usize,
    /// Total duration.
    pub duration: Duration,
}

impl StressTestResult {
    /// Prints a summary of the run.
    pub fn print_summary(&self, name: &str) {
        println!("\n=== {} ===", name);
        println!("Passes: {} ({} failed)", self.passes, self.failed_passes);
        println!("Remote writes: {}", self.remote_writes);
        println!("Rows pulled: {}", self.pulled);
        println!("Duration: {:?}", self.duration);
    }
}

/// Configuration for stress runs.
#[derive(Debug, Clone)]
pub struct StressConfig {
    /// Number of passes to run while writers are active.
    pub passes: usize,
    /// Number of writer threads.
    pub writers: usize,
    /// Writes per writer thread.
    pub writes_per_writer: usize,
    /// Page size of every pass.
    pub page_size: usize,
}

impl Default for StressConfig {
    fn default() -> Self {
        Self {
            passes: 50,
            writers: 4,
            writes_per_writer: 250,
            page_size: 16,
        }
    }
}

/// Pulls repeatedly while writer threads create and update remote rows.
///
/// Writers create a row and then update it, so pages keep moving under the
/// cursor. After the writers stop, one more pass runs with the same store.
pub fn stress_pull_under_churn(
    pair: &TaskPair,
    runner: &SyncRunner,
    config: &StressConfig,
) -> StressTestResult {
    let writes = Arc::new(AtomicUsize::new(0));
    let start = Instant::now();

    let handles: Vec<_> = (0..config.writers)
        .map(|w| {
            let remote = Arc::clone(&pair.remote);
            let writes = Arc::clone(&writes);
            let count = config.writes_per_writer;

            thread::spawn(move || {
                for i in 0..count {
                    let id = format!("w{w}-{i:04}");
                    remote.create(task(&id));
                    remote.update_remote(&id, |row| row.priority = 1);
                    writes.fetch_add(2, Ordering::Relaxed);
                }
            })
        })
        .collect();

    let spec = pair.spec(config.page_size);
    let mut passes = 0usize;
    let mut failed = 0usize;
    let mut pulled = 0usize;

    for _ in 0..config.passes {
        match runner.run(&spec) {
            Ok(report) => {
                passes += 1;
                pulled += report.pulled;
            }
            Err(_) => failed += 1,
        }
    }

    for handle in handles {
        handle.join().expect("Writer thread panicked");
    }

    match runner.run(&spec) {
        Ok(report) => {
            passes += 1;
            pulled += report.pulled;
        }
        Err(_) => failed += 1,
    }

    StressTestResult {
        passes,
        failed_passes: failed,
        remote_writes: writes.load(Ordering::Relaxed),
        pulled,
        duration: start.elapsed(),
    }
}

/// Pushes many local creates in one pass against a backend that rejects
/// every `reject_every`-th row.
pub fn stress_bulk_push(
    pair: &TaskPair,
    runner: &SyncRunner,
    rows: usize,
    reject_every: usize,
) -> StressTestResult {
    let start = Instant::now();
    for i in 0..rows {
        let id = format!("local-{i:05}");
        if reject_every > 0 && i % reject_every == 0 {
            pair.remote
                .reject_id(id.clone(), plansync_engine::RemoteError::permanent("check violation"));
        }
        pair.store.edit(task(&id));
    }

    let (passes, failed) = match runner.run(&pair.spec(64)) {
        Ok(_) => (1, 0),
        Err(_) => (0, 1),
    };

    StressTestResult {
        passes,
        failed_passes: failed,
        remote_writes: pair.remote.len(),
        pulled: 0,
        duration: start.elapsed(),
    }
}
