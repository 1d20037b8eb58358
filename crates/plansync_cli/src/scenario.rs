//! Simulation scenarios and saved state.
//!
//! A scenario is a JSON document with one optional section per entity type:
//!
//! ```json
//! {
//!   "tasks": {
//!     "remote": [{ "id": "t-1", "title": "call", "updated_at": "2024-01-01T00:00:00.000001Z", "version": 1 }],
//!     "local": [],
//!     "edits": [{ "id": "t-2", "title": "new", "updated_at": "2024-01-02T00:00:00Z" }],
//!     "faults": [{ "op": "insert", "status": 503 }],
//!     "rejected": [{ "id": "t-9", "status": 400, "message": "check violation" }]
//!   }
//! }
//! ```
//!
//! Remote rows without a version are created as another client would,
//! which stamps version 1 and a fresh timestamp.

use crate::error::CliError;
use plansync_engine::memory::{MemoryRemote, MemoryStore, RemoteOp, StoreSnapshot};
use plansync_engine::RemoteError;
use plansync_protocol::entities::{Event, EventOverride, RecurrenceRule, Task};
use plansync_protocol::{ServerStamp, SyncRow};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

/// Remote call a fault applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FaultOp {
    /// Page reads.
    FetchSince,
    /// Single row reads.
    FetchOne,
    /// Inserts.
    Insert,
    /// Updates.
    Update,
}

impl From<FaultOp> for RemoteOp {
    fn from(op: FaultOp) -> Self {
        match op {
            FaultOp::FetchSince => RemoteOp::FetchSince,
            FaultOp::FetchOne => RemoteOp::FetchOne,
            FaultOp::Insert => RemoteOp::Insert,
            FaultOp::Update => RemoteOp::Update,
        }
    }
}

/// A backend response, classified like a real one.
#[derive(Debug, Clone, Deserialize)]
pub struct ResponseSpec {
    /// HTTP status.
    #[serde(default)]
    pub status: u16,
    /// Backend error code, e.g. `23505`.
    #[serde(default)]
    pub code: Option<String>,
    /// Message text.
    #[serde(default)]
    pub message: Option<String>,
    /// Retry hint in seconds.
    #[serde(default)]
    pub retry_after_secs: Option<u64>,
}

impl ResponseSpec {
    /// Classifies the response.
    pub fn to_error(&self) -> RemoteError {
        RemoteError::from_status(
            self.status,
            self.code.as_deref(),
            self.message
                .clone()
                .unwrap_or_else(|| format!("status {}", self.status)),
            self.retry_after_secs.map(Duration::from_secs),
        )
    }
}

/// One injected failure.
#[derive(Debug, Clone, Deserialize)]
pub struct FaultSpec {
    /// Affected call.
    pub op: FaultOp,
    /// Apply the mutation and lose the response instead of failing.
    #[serde(default)]
    pub drop_response: bool,
    /// Failure to return.
    #[serde(flatten)]
    pub response: ResponseSpec,
}

/// A row the backend always rejects.
#[derive(Debug, Clone, Deserialize)]
pub struct Rejection {
    /// Row id.
    pub id: String,
    /// Failure to return.
    #[serde(flatten)]
    pub response: ResponseSpec,
}

/// Scenario section for one entity type.
#[derive(Debug, Clone, Deserialize)]
pub struct EntityScenario<R> {
    /// Rows already on the backend.
    #[serde(default = "Vec::new")]
    pub remote: Vec<R>,
    /// Rows already synced to the local store.
    #[serde(default = "Vec::new")]
    pub local: Vec<R>,
    /// Pending local edits.
    #[serde(default = "Vec::new")]
    pub edits: Vec<R>,
    /// Injected failures, consumed in order.
    #[serde(default)]
    pub faults: Vec<FaultSpec>,
    /// Rows the backend rejects.
    #[serde(default)]
    pub rejected: Vec<Rejection>,
}

impl<R> Default for EntityScenario<R> {
    fn default() -> Self {
        Self {
            remote: Vec::new(),
            local: Vec::new(),
            edits: Vec::new(),
            faults: Vec::new(),
            rejected: Vec::new(),
        }
    }
}

impl<R> EntityScenario<R>
where
    R: ServerStamp + Clone,
{
    /// Builds the local store and backend described by this section.
    pub fn build(&self, entity: &str) -> (Arc<MemoryStore<R>>, Arc<MemoryRemote<R>>) {
        let store = Arc::new(MemoryStore::new(entity));
        let remote = Arc::new(MemoryRemote::new());

        for row in &self.remote {
            if row.version().is_some() {
                remote.seed(row.clone());
            } else {
                remote.create(row.clone());
            }
        }
        for row in &self.local {
            store.insert_clean(row.clone());
        }
        for row in &self.edits {
            store.edit(row.clone());
        }
        for fault in &self.faults {
            if fault.drop_response {
                remote.drop_next_response(fault.op.into());
            } else {
                remote.fail_next(fault.op.into(), fault.response.to_error());
            }
        }
        for rejection in &self.rejected {
            remote.reject_id(rejection.id.clone(), rejection.response.to_error());
        }

        (store, remote)
    }
}

/// A full scenario.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Scenario {
    /// Calendar events.
    #[serde(default)]
    pub events: EntityScenario<Event>,
    /// Recurrence rules.
    #[serde(default)]
    pub recurrence_rules: EntityScenario<RecurrenceRule>,
    /// Occurrence overrides.
    #[serde(default, alias = "event_overrides")]
    pub overrides: EntityScenario<EventOverride>,
    /// Tasks.
    #[serde(default)]
    pub tasks: EntityScenario<Task>,
}

impl Scenario {
    /// Reads a scenario file.
    pub fn load(path: &Path) -> Result<Self, CliError> {
        let file = File::open(path).map_err(|e| CliError::io(path, e))?;
        serde_json::from_reader(BufReader::new(file)).map_err(|source| CliError::Scenario {
            path: path.to_path_buf(),
            source,
        })
    }
}

/// Local stores after a simulation, as written by `simulate --save-state`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SavedState {
    /// CLI version that wrote the file.
    pub written_by: String,
    /// Events store.
    pub events: StoreSnapshot<Event>,
    /// Recurrence rules store.
    pub recurrence_rules: StoreSnapshot<RecurrenceRule>,
    /// Overrides store.
    pub overrides: StoreSnapshot<EventOverride>,
    /// Tasks store.
    pub tasks: StoreSnapshot<Task>,
}

impl SavedState {
    /// Writes the state as CBOR.
    pub fn save(&self, path: &Path) -> Result<(), CliError> {
        let file = File::create(path).map_err(|e| CliError::io(path, e))?;
        ciborium::into_writer(self, BufWriter::new(file))
            .map_err(|e| CliError::Encode(e.to_string()))
    }

    /// Reads a CBOR state file.
    pub fn load(path: &Path) -> Result<Self, CliError> {
        let file = File::open(path).map_err(|e| CliError::io(path, e))?;
        ciborium::from_reader(BufReader::new(file)).map_err(|e| CliError::Decode {
            path: path.to_path_buf(),
            message: e.to_string(),
        })
    }
}

/// Per-entity summary of a saved store.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StoreSummary {
    /// Entity type.
    pub entity: String,
    /// Rows held, tombstones included.
    pub rows: usize,
    /// Tombstones held.
    pub tombstones: usize,
    /// Rows waiting to be pushed.
    pub dirty: usize,
    /// Conflict log length.
    pub conflicts: usize,
    /// Pages committed.
    pub pages_applied: u64,
    /// Pull cursor, if any.
    pub cursor: Option<String>,
}

impl StoreSummary {
    /// Summarizes one snapshot.
    pub fn of<R: SyncRow>(snapshot: &StoreSnapshot<R>) -> Self {
        Self {
            entity: snapshot.entity.clone(),
            rows: snapshot.rows.len(),
            tombstones: snapshot.rows.values().filter(|r| r.is_tombstone()).count(),
            dirty: snapshot.dirty.len(),
            conflicts: snapshot.conflicts.len(),
            pages_applied: snapshot.pages_applied,
            cursor: snapshot.cursor.as_ref().map(ToString::to_string),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use plansync_engine::ErrorClass;

    #[test]
    fn parses_sections_and_faults() {
        let json = r#"{
            "tasks": {
                "remote": [{"id": "t-1", "title": "a", "updated_at": "2024-01-01T00:00:00.000001Z", "version": 1}],
                "edits": [{"id": "t-2", "title": "b", "updated_at": "2024-01-01T00:00:00Z"}],
                "faults": [{"op": "insert", "status": 429, "retry_after_secs": 3}, {"op": "update", "drop_response": true}],
                "rejected": [{"id": "t-9", "status": 409, "code": "23505"}]
            }
        }"#;
        let scenario: Scenario = serde_json::from_str(json).unwrap();

        assert!(scenario.events.remote.is_empty());
        assert_eq!(scenario.tasks.remote.len(), 1);
        assert_eq!(scenario.tasks.faults[0].op, FaultOp::Insert);
        assert_eq!(
            scenario.tasks.faults[0].response.to_error().retry_after(),
            Some(Duration::from_secs(3))
        );
        assert!(scenario.tasks.faults[1].drop_response);
        assert_eq!(
            scenario.tasks.rejected[0].response.to_error().class(),
            ErrorClass::Conflict
        );
    }

    #[test]
    fn build_stamps_unversioned_remote_rows() {
        let mut section = EntityScenario::<Task>::default();
        section.remote.push(Task::new("t-1", "a"));
        section.edits.push(Task::new("t-2", "b"));

        let (store, remote) = section.build("tasks");

        assert_eq!(remote.get("t-1").unwrap().version, Some(1));
        assert_eq!(store.dirty_ids(), vec!["t-2".to_string()]);
    }

    #[test]
    fn summary_counts_tombstones() {
        let store = MemoryStore::new("tasks");
        let mut gone = Task::new("t-1", "a");
        gone.deleted_at = Some(plansync_protocol::RawTimestamp::now());
        store.insert_clean(gone);
        store.edit(Task::new("t-2", "b"));

        let summary = StoreSummary::of(&store.snapshot());
        assert_eq!(summary.rows, 2);
        assert_eq!(summary.tombstones, 1);
        assert_eq!(summary.dirty, 1);
        assert!(summary.cursor.is_none());
    }
}
