//! Conflict records.

use crate::row::SyncRow;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The push operation that was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PushOperation {
    /// Create of a row that had no remote version.
    Insert,
    /// Version-gated update.
    Update,
}

impl PushOperation {
    /// Lowercase name for logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            PushOperation::Insert => "insert",
            PushOperation::Update => "update",
        }
    }
}

/// A push rejected because the remote side diverged.
///
/// Appended to the conflict log for out-of-band inspection. The engine
/// detects and records conflicts; it never resolves them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConflictRecord<R> {
    /// Which push path detected the conflict.
    pub operation: PushOperation,
    /// The local row as it was pushed.
    pub local: R,
    /// The remote row at detection time, if it could be fetched.
    pub remote: Option<R>,
    /// Detection time.
    pub detected_at: DateTime<Utc>,
}

impl<R: SyncRow> ConflictRecord<R> {
    /// Creates a conflict detected now.
    pub fn new(operation: PushOperation, local: R, remote: Option<R>) -> Self {
        Self {
            operation,
            local,
            remote,
            detected_at: Utc::now(),
        }
    }

    /// Id of the conflicting row.
    pub fn id(&self) -> &str {
        self.local.id()
    }

    /// Returns true if the remote side no longer has a live row.
    pub fn is_remote_gone(&self) -> bool {
        self.remote.as_ref().map_or(true, |r| r.is_tombstone())
    }

    /// Returns true if both sides hold live rows (update-update divergence).
    pub fn is_update_conflict(&self) -> bool {
        self.operation == PushOperation::Update && !self.local.is_tombstone() && !self.is_remote_gone()
    }

    /// Returns true if one side deleted while the other edited.
    pub fn is_update_delete_conflict(&self) -> bool {
        self.local.is_tombstone() != self.is_remote_gone()
    }

    /// Remote version minus the version the client expected.
    ///
    /// `None` when either side has no version or the difference overflows.
    pub fn version_gap(&self) -> Option<i64> {
        let remote = self.remote.as_ref()?.version()?;
        let local = self.local.version()?;
        remote.checked_sub(local)
    }
}
