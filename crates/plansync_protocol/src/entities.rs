//! Synchronized entity types of the planner.
//!
//! Sync order matters across types: a recurring series split on the backend
//! migrates overrides between rules, so events sync before recurrence rules,
//! and rules before overrides.

use crate::row::{ServerStamp, SyncRow};
use crate::timestamp::RawTimestamp;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Kind of synchronized entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    /// Calendar events.
    Events,
    /// Recurrence rules attached to events.
    RecurrenceRules,
    /// Per-occurrence overrides of a recurrence rule.
    Overrides,
    /// To-do items.
    Tasks,
}

impl EntityKind {
    /// Parents before children.
    pub fn sync_order() -> [EntityKind; 4] {
        [
            EntityKind::Events,
            EntityKind::RecurrenceRules,
            EntityKind::Overrides,
            EntityKind::Tasks,
        ]
    }

    /// Table-style name.
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Events => "events",
            EntityKind::RecurrenceRules => "recurrence_rules",
            EntityKind::Overrides => "event_overrides",
            EntityKind::Tasks => "tasks",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntityKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        EntityKind::sync_order()
            .into_iter()
            .find(|k| k.as_str() == s)
            .ok_or_else(|| format!("unknown entity kind: {s}"))
    }
}

macro_rules! impl_sync_row {
    ($($ty:ty),+ $(,)?) => {$(
        impl SyncRow for $ty {
            fn id(&self) -> &str {
                &self.id
            }

            fn updated_at(&self) -> &RawTimestamp {
                &self.updated_at
            }

            fn deleted_at(&self) -> Option<&RawTimestamp> {
                self.deleted_at.as_ref()
            }

            fn version(&self) -> Option<i64> {
                self.version
            }
        }

        impl ServerStamp for $ty {
            fn stamp(&mut self, version: i64, updated_at: RawTimestamp) {
                self.version = Some(version);
                self.updated_at = updated_at;
            }

            fn set_deleted_at(&mut self, deleted_at: Option<RawTimestamp>) {
                self.deleted_at = deleted_at;
            }
        }
    )+};
}

/// A calendar event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Row id.
    pub id: String,
    /// Display title.
    pub title: String,
    /// Start of the first occurrence.
    pub starts_at: DateTime<Utc>,
    /// End of the first occurrence.
    pub ends_at: DateTime<Utc>,
    /// All-day flag.
    #[serde(default)]
    pub all_day: bool,
    /// Free-form notes.
    #[serde(default)]
    pub notes: Option<String>,
    /// Last modification.
    pub updated_at: RawTimestamp,
    /// Tombstone marker.
    #[serde(default)]
    pub deleted_at: Option<RawTimestamp>,
    /// Remote revision.
    #[serde(default)]
    pub version: Option<i64>,
}

impl Event {
    /// Creates a local, never-pushed event.
    pub fn new(
        id: impl Into<String>,
        title: impl Into<String>,
        starts_at: DateTime<Utc>,
        ends_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            starts_at,
            ends_at,
            all_day: false,
            notes: None,
            updated_at: RawTimestamp::now(),
            deleted_at: None,
            version: None,
        }
    }
}

/// An RRULE attached to an event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecurrenceRule {
    /// Row id.
    pub id: String,
    /// Owning event.
    pub event_id: String,
    /// RFC 5545 rule text, e.g. `FREQ=WEEKLY;BYDAY=MO`.
    pub rrule: String,
    /// Last occurrence bound, if the series was split or ended.
    #[serde(default)]
    pub until: Option<DateTime<Utc>>,
    /// Last modification.
    pub updated_at: RawTimestamp,
    /// Tombstone marker.
    #[serde(default)]
    pub deleted_at: Option<RawTimestamp>,
    /// Remote revision.
    #[serde(default)]
    pub version: Option<i64>,
}

impl RecurrenceRule {
    /// Creates a local, never-pushed rule.
    pub fn new(id: impl Into<String>, event_id: impl Into<String>, rrule: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            event_id: event_id.into(),
            rrule: rrule.into(),
            until: None,
            updated_at: RawTimestamp::now(),
            deleted_at: None,
            version: None,
        }
    }
}

/// A change to one occurrence of a recurring series.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventOverride {
    /// Row id.
    pub id: String,
    /// Rule whose occurrence is overridden.
    pub rule_id: String,
    /// Start of the occurrence being replaced.
    pub original_start: DateTime<Utc>,
    /// New start, if moved.
    #[serde(default)]
    pub new_start: Option<DateTime<Utc>>,
    /// Occurrence removed from the series.
    #[serde(default)]
    pub cancelled: bool,
    /// Last modification.
    pub updated_at: RawTimestamp,
    /// Tombstone marker.
    #[serde(default)]
    pub deleted_at: Option<RawTimestamp>,
    /// Remote revision.
    #[serde(default)]
    pub version: Option<i64>,
}

impl EventOverride {
    /// Creates a local, never-pushed override.
    pub fn new(id: impl Into<String>, rule_id: impl Into<String>, original_start: DateTime<Utc>) -> Self {
        Self {
            id: id.into(),
            rule_id: rule_id.into(),
            original_start,
            new_start: None,
            cancelled: false,
            updated_at: RawTimestamp::now(),
            deleted_at: None,
            version: None,
        }
    }
}

/// A to-do item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    /// Row id.
    pub id: String,
    /// Display title.
    pub title: String,
    /// Due date.
    #[serde(default)]
    pub due_at: Option<DateTime<Utc>>,
    /// Completion time.
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
    /// 0 (none) to 3 (high).
    #[serde(default)]
    pub priority: u8,
    /// Last modification.
    pub updated_at: RawTimestamp,
    /// Tombstone marker.
    #[serde(default)]
    pub deleted_at: Option<RawTimestamp>,
    /// Remote revision.
    #[serde(default)]
    pub version: Option<i64>,
}

impl Task {
    /// Creates a local, never-pushed task.
    pub fn new(id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            due_at: None,
            completed_at: None,
            priority: 0,
            updated_at: RawTimestamp::now(),
            deleted_at: None,
            version: None,
        }
    }

    /// Returns true if the task has been completed.
    pub fn is_done(&self) -> bool {
        self.completed_at.is_some()
    }
}

impl_sync_row!(Event, RecurrenceRule, EventOverride, Task);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sync_order_puts_parents_first() {
        let order = EntityKind::sync_order();
        assert_eq!(order[0], EntityKind::Events);
        assert_eq!(order[1], EntityKind::RecurrenceRules);
        assert_eq!(order[2], EntityKind::Overrides);
    }

    #[test]
    fn kind_round_trips_through_name() {
        for kind in EntityKind::sync_order() {
            assert_eq!(kind.as_str().parse::<EntityKind>().unwrap(), kind);
        }
        assert!("calendars".parse::<EntityKind>().is_err());
    }

    #[test]
    fn new_rows_are_pending_inserts() {
        let task = Task::new("t-1", "buy milk");
        assert_eq!(task.version(), None);
        assert!(!task.is_tombstone());
        assert!(!task.is_done());
    }

    #[test]
    fn stamp_sets_server_fields() {
        let mut rule = RecurrenceRule::new("r-1", "e-1", "FREQ=DAILY");
        let at = RawTimestamp::parse("2024-02-02T00:00:00.000001Z").unwrap();
        rule.stamp(4, at.clone());
        rule.set_deleted_at(Some(at.clone()));

        assert_eq!(rule.version(), Some(4));
        assert_eq!(rule.updated_at(), &at);
        assert!(rule.is_tombstone());
    }

    #[test]
    fn task_deserializes_with_defaults() {
        let json = r#"{"id":"t-9","title":"call","updated_at":"2024-01-01T00:00:00.000000Z"}"#;
        let task: Task = serde_json::from_str(json).unwrap();
        assert_eq!(task.version, None);
        assert_eq!(task.priority, 0);
        assert!(task.deleted_at.is_none());
    }
}
