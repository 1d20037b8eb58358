//! Synchronized row contract and sync ordering.

use crate::timestamp::RawTimestamp;
use std::cmp::Ordering;

/// A row of one synchronized entity type.
///
/// Rows are totally ordered for pulling by `(updated_at raw text, id)`,
/// both compared as strings.
pub trait SyncRow {
    /// Process-wide unique id in canonical string form.
    fn id(&self) -> &str;

    /// Last modification time as stamped by the backend.
    fn updated_at(&self) -> &RawTimestamp;

    /// Soft-delete marker. A row with this set is a tombstone.
    fn deleted_at(&self) -> Option<&RawTimestamp>;

    /// Remote revision. `None` means the row was never created remotely.
    fn version(&self) -> Option<i64>;

    /// Returns true if the row is a tombstone.
    fn is_tombstone(&self) -> bool {
        self.deleted_at().is_some()
    }

    /// Compares two rows by pull order.
    fn sync_cmp(&self, other: &Self) -> Ordering
    where
        Self: Sized,
    {
        compare_keys(
            (self.updated_at().as_str(), self.id()),
            (other.updated_at().as_str(), other.id()),
        )
    }
}

/// Server-side mutation of the fields the backend owns.
///
/// Implemented by row types so an in-process backend can stamp versions,
/// timestamps and tombstones the way the real one does.
pub trait ServerStamp: SyncRow {
    /// Sets the revision and modification time after a remote write.
    fn stamp(&mut self, version: i64, updated_at: RawTimestamp);

    /// Sets or clears the tombstone marker.
    fn set_deleted_at(&mut self, deleted_at: Option<RawTimestamp>);
}

/// Compares two `(raw timestamp, id)` keys.
pub fn compare_keys(a: (&str, &str), b: (&str, &str)) -> Ordering {
    a.0.cmp(b.0).then_with(|| a.1.cmp(b.1))
}

/// Sorts rows into pull order.
pub fn sort_for_sync<R: SyncRow>(rows: &mut [R]) {
    rows.sort_by(|a, b| a.sync_cmp(b));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ties_break_on_id() {
        let t = "2024-05-05T10:00:00.000000Z";
        assert_eq!(compare_keys((t, "a"), (t, "b")), Ordering::Less);
        assert_eq!(compare_keys((t, "b"), (t, "b")), Ordering::Equal);
    }

    #[test]
    fn timestamp_dominates_id() {
        assert_eq!(
            compare_keys(
                ("2024-05-05T10:00:00.000001Z", "a"),
                ("2024-05-05T10:00:00.000000Z", "z"),
            ),
            Ordering::Greater
        );
    }
}
