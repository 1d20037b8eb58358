//! Outcome of a sync pass.

use crate::error::RemoteError;
use plansync_protocol::PushOperation;
use serde::Serialize;
use std::time::Duration;

/// A row whose push was rejected for good.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PushFailure {
    /// Row id.
    pub id: String,
    /// Push path that failed.
    pub operation: PushOperation,
    /// The classified error.
    pub error: RemoteError,
}

/// Counts and per-row outcomes of one pass over one entity type.
///
/// Rows listed in `missing`, `deferred` and `failures`, and rows counted in
/// `conflicts`, are all still dirty.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SyncReport {
    /// Entity type.
    pub entity: String,
    /// Rows pulled and applied.
    pub pulled: usize,
    /// Rows created remotely.
    pub inserted: usize,
    /// Rows updated remotely.
    pub updated: usize,
    /// Pushes rejected as conflicts and written to the conflict log.
    pub conflicts: usize,
    /// Rows whose remote counterpart no longer exists.
    pub missing: Vec<String>,
    /// Rows left for the next pass after a rate-limited or transient error.
    pub deferred: Vec<String>,
    /// Rows rejected permanently.
    pub failures: Vec<PushFailure>,
    /// Longest retry hint seen from a rate-limited push.
    pub retry_after: Option<Duration>,
}

impl SyncReport {
    /// Creates an empty report for an entity type.
    pub fn new(entity: impl Into<String>) -> Self {
        Self {
            entity: entity.into(),
            ..Self::default()
        }
    }

    /// Rows the remote accepted in this pass.
    pub fn pushed(&self) -> usize {
        self.inserted + self.updated
    }

    /// Returns true if every dirty row was pushed.
    pub fn is_clean(&self) -> bool {
        self.conflicts == 0
            && self.missing.is_empty()
            && self.deferred.is_empty()
            && self.failures.is_empty()
    }

    /// Returns true if the caller has to act on missing or failed rows.
    pub fn needs_attention(&self) -> bool {
        !self.missing.is_empty() || !self.failures.is_empty()
    }

    /// Records a retry hint, keeping the longest.
    pub fn note_retry_after(&mut self, hint: Option<Duration>) {
        if let Some(hint) = hint {
            self.retry_after = Some(self.retry_after.map_or(hint, |cur| cur.max(hint)));
        }
    }

    /// Adds another report's counts and rows into this one.
    pub fn absorb(&mut self, other: SyncReport) {
        self.pulled += other.pulled;
        self.inserted += other.inserted;
        self.updated += other.updated;
        self.conflicts += other.conflicts;
        self.missing.extend(other.missing);
        self.deferred.extend(other.deferred);
        self.failures.extend(other.failures);
        self.note_retry_after(other.retry_after);
    }
}
