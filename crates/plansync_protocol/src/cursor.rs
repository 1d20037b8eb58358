//! Pull cursor.

use crate::row::{compare_keys, SyncRow};
use crate::timestamp::RawTimestamp;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

/// Persisted high-water mark of the pull phase for one entity type.
///
/// The next pull fetches rows strictly after `(updated_at, id)`. A cursor
/// without an id bounds on the timestamp alone.
///
/// # Invariants
///
/// - Every row already pulled sorts at or before the cursor.
/// - The cursor only moves forward, except through an explicit reset.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SyncCursor {
    /// Raw timestamp of the last row pulled.
    pub updated_at: RawTimestamp,
    /// Id of the last row pulled.
    pub id: Option<String>,
}

impl SyncCursor {
    /// Creates a cursor at `(updated_at, id)`.
    pub fn new(updated_at: RawTimestamp, id: impl Into<String>) -> Self {
        Self {
            updated_at,
            id: Some(id.into()),
        }
    }

    /// Creates a cursor bounded by timestamp only.
    pub fn timestamp_only(updated_at: RawTimestamp) -> Self {
        Self {
            updated_at,
            id: None,
        }
    }

    /// Creates the cursor positioned at a row.
    pub fn at_row<R: SyncRow>(row: &R) -> Self {
        Self::new(row.updated_at().clone(), row.id())
    }

    /// Parsed instant of the cursor, for display.
    pub fn instant(&self) -> DateTime<Utc> {
        self.updated_at.instant()
    }

    /// Raw timestamp text.
    pub fn raw(&self) -> &str {
        self.updated_at.as_str()
    }

    /// Returns true if a row with this key sorts strictly after the cursor.
    pub fn admits_key(&self, raw: &str, id: &str) -> bool {
        match &self.id {
            Some(cursor_id) => compare_keys((raw, id), (self.raw(), cursor_id)) == Ordering::Greater,
            None => raw > self.raw(),
        }
    }

    /// Returns true if the row sorts strictly after the cursor.
    pub fn admits<R: SyncRow>(&self, row: &R) -> bool {
        self.admits_key(row.updated_at().as_str(), row.id())
    }
}

/// Returns true if the row is after the cursor; no cursor admits everything.
pub fn admits<R: SyncRow>(cursor: Option<&SyncCursor>, row: &R) -> bool {
    cursor.map_or(true, |c| c.admits(row))
}

impl PartialOrd for SyncCursor {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for SyncCursor {
    fn cmp(&self, other: &Self) -> Ordering {
        self.updated_at
            .cmp(&other.updated_at)
            .then_with(|| self.id.cmp(&other.id))
    }
}

impl fmt::Display for SyncCursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.id {
            Some(id) => write!(f, "({}, {})", self.updated_at, id),
            None => write!(f, "({})", self.updated_at),
        }
    }
}
