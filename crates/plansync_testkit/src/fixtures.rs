//! Test fixtures and sync harnesses.
//!
//! Provides a local store and a remote backend wired together, plus helpers
//! for building rows with exact timestamps.

use chrono::{DateTime, Duration, TimeZone, Utc};
use plansync_engine::memory::{memory_spec, MemoryRemote, MemoryStore};
use plansync_engine::{SyncReport, SyncResult, SyncRunner, SyncSpec};
use plansync_protocol::entities::Task;
use plansync_protocol::{RawTimestamp, ServerStamp};
use std::sync::Arc;

/// The instant every fixture timestamp is offset from.
pub fn epoch() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0)
        .single()
        .expect("valid epoch")
}

/// A timestamp `micros` microseconds after [`epoch`].
pub fn ts(micros: i64) -> RawTimestamp {
    RawTimestamp::from_instant(epoch() + Duration::microseconds(micros))
}

/// A local task that was never pushed.
pub fn task(id: &str) -> Task {
    Task::new(id, format!("task {id}"))
}

/// A task as the remote would return it.
pub fn synced_task(id: &str, micros: i64, version: i64) -> Task {
    let mut row = task(id);
    row.stamp(version, ts(micros));
    row
}

/// A local store and a remote for one entity type.
pub struct SyncPair<R> {
    /// Entity type.
    pub entity: String,
    /// Local side.
    pub store: Arc<MemoryStore<R>>,
    /// Remote side.
    pub remote: Arc<MemoryRemote<R>>,
}

/// The pair used by most tests.
pub type TaskPair = SyncPair<Task>;

impl<R> SyncPair<R>
where
    R: ServerStamp + Clone + Send + Sync + 'static,
{
    /// Creates an empty pair.
    pub fn new(entity: &str) -> Self {
        Self {
            entity: entity.to_owned(),
            store: Arc::new(MemoryStore::new(entity)),
            remote: Arc::new(MemoryRemote::with_epoch(epoch())),
        }
    }

    /// Builds a spec over this pair.
    pub fn spec(&self, page_size: usize) -> SyncSpec<R, R, R> {
        memory_spec(
            self.entity.clone(),
            page_size,
            Arc::clone(&self.store),
            Arc::clone(&self.remote),
        )
    }

    /// Runs one pass with a default runner.
    pub fn run(&self, page_size: usize) -> SyncResult<SyncReport> {
        self.run_with(&SyncRunner::default(), page_size)
    }

    /// Runs one pass with `runner`.
    pub fn run_with(&self, runner: &SyncRunner, page_size: usize) -> SyncResult<SyncReport> {
        runner.run(&self.spec(page_size))
    }
}

impl<R> SyncPair<R>
where
    R: ServerStamp + Clone + PartialEq,
{
    /// Returns true if both sides hold the same rows and nothing is dirty.
    pub fn converged(&self) -> bool {
        self.store.dirty_ids().is_empty() && self.store.rows() == self.remote.rows()
    }
}

impl TaskPair {
    /// Creates an empty task pair.
    pub fn tasks() -> Self {
        Self::new("tasks")
    }
}

/// Runs a test with a fresh task pair.
pub fn with_task_pair<F, T>(f: F) -> T
where
    F: FnOnce(&TaskPair) -> T,
{
    let pair = TaskPair::tasks();
    f(&pair)
}

/// Prepared situations.
pub mod scenarios {
    use super::*;

    /// A remote holding `count` tasks that all share one timestamp.
    ///
    /// Ids are `t-00`, `t-01`, ... so id order matches creation order.
    pub fn tied_remote(count: usize) -> TaskPair {
        let pair = TaskPair::tasks();
        pair.remote.freeze_clock(true);
        for i in 0..count {
            pair.remote.create(task(&format!("t-{i:02}")));
        }
        pair.remote.freeze_clock(false);
        pair
    }

    /// A synced task that was then edited on both sides.
    ///
    /// The local edit still expects version 1; the remote is at version 2.
    pub fn diverged_task(id: &str) -> TaskPair {
        let pair = TaskPair::tasks();
        let stored = pair.remote.create(task(id));
        pair.store.insert_clean(stored.clone());

        pair.remote
            .update_remote(id, |row| row.title = "remote edit".into());

        let mut local = stored;
        local.title = "local edit".into();
        pair.store.edit(local);
        pair
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use plansync_protocol::SyncRow;

    #[test]
    fn timestamps_sort_by_offset() {
        assert!(ts(1) < ts(2));
        assert!(ts(999_999) < ts(1_000_000));
        assert_eq!(ts(0).instant(), epoch());
    }

    #[test]
    fn tied_remote_shares_one_timestamp() {
        let pair = scenarios::tied_remote(3);
        let rows = pair.remote.rows();
        assert_eq!(rows.len(), 3);
        assert!(rows.iter().all(|r| r.updated_at() == rows[0].updated_at()));
    }

    #[test]
    fn diverged_task_has_stale_local_version() {
        let pair = scenarios::diverged_task("a");
        assert_eq!(pair.store.get("a").unwrap().version, Some(1));
        assert_eq!(pair.remote.get("a").unwrap().version, Some(2));
        assert!(pair.store.is_dirty("a"));
    }

    #[test]
    fn empty_pair_converges() {
        with_task_pair(|pair| {
            pair.run(10).unwrap();
            assert!(pair.converged());
        });
    }
}
