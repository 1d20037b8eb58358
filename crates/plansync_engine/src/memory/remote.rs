//! In-memory remote backend.

use crate::error::{RemoteError, RemoteResult};
use crate::http::{PGRST_NO_ROWS, PG_UNIQUE_VIOLATION};
use chrono::{DateTime, Duration, TimeZone, Utc};
use parking_lot::Mutex;
use plansync_protocol::{
    admits, IdempotencyKey, InsertRequest, RawTimestamp, ServerStamp, SyncCursor, SyncRow,
    UpdateRequest,
};
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use tracing::debug;

/// Remote call kinds, for call counting and fault injection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RemoteOp {
    /// Page read.
    FetchSince,
    /// Single row read.
    FetchOne,
    /// Bulk create.
    Insert,
    /// Version-gated update.
    Update,
}

/// An injected failure.
#[derive(Debug, Clone)]
pub enum Fault {
    /// Fail before doing anything.
    Fail(RemoteError),
    /// Apply the mutation, then lose the response.
    DropResponse,
}

/// Server clock producing microsecond timestamps.
///
/// A frozen clock stamps every write with the same instant, which is how
/// timestamp ties happen on a busy backend.
#[derive(Debug)]
struct Clock {
    epoch: DateTime<Utc>,
    micros: i64,
    frozen: bool,
}

impl Clock {
    fn tick(&mut self) -> RawTimestamp {
        if !self.frozen {
            self.micros += 1;
        }
        RawTimestamp::from_instant(self.epoch + Duration::microseconds(self.micros))
    }
}

#[derive(Debug)]
struct RemoteState<R> {
    rows: BTreeMap<String, R>,
    inserts: HashMap<IdempotencyKey, R>,
    updates: HashMap<IdempotencyKey, Option<R>>,
    clock: Clock,
    calls: HashMap<RemoteOp, usize>,
    faults: HashMap<RemoteOp, VecDeque<Fault>>,
    rejected: HashMap<String, RemoteError>,
}

impl<R> RemoteState<R> {
    /// Counts the call and pops its next fault.
    fn enter(&mut self, op: RemoteOp) -> Option<Fault> {
        *self.calls.entry(op).or_insert(0) += 1;
        self.faults.get_mut(&op).and_then(VecDeque::pop_front)
    }
}

fn lost_response() -> RemoteError {
    RemoteError::transient("connection reset before response")
}

/// A backend for one entity type, held in memory.
///
/// Behaves like the PostgREST-style table the engine is written against:
/// pages come back ordered by `(updated_at, id)`, every write stamps a
/// fresh version and timestamp, deletes are soft, updates are gated on the
/// expected version, and mutations are deduplicated by idempotency key.
/// A bulk insert is all-or-nothing.
pub struct MemoryRemote<R> {
    state: Mutex<RemoteState<R>>,
}

impl<R> MemoryRemote<R>
where
    R: ServerStamp + Clone,
{
    /// Creates an empty backend whose clock starts at 2024-01-01T00:00:00Z.
    pub fn new() -> Self {
        let epoch = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).single().unwrap_or_default();
        Self::with_epoch(epoch)
    }

    /// Creates an empty backend whose clock starts at `epoch`.
    pub fn with_epoch(epoch: DateTime<Utc>) -> Self {
        Self {
            state: Mutex::new(RemoteState {
                rows: BTreeMap::new(),
                inserts: HashMap::new(),
                updates: HashMap::new(),
                clock: Clock {
                    epoch,
                    micros: 0,
                    frozen: false,
                },
                calls: HashMap::new(),
                faults: HashMap::new(),
                rejected: HashMap::new(),
            }),
        }
    }

    /// Stores a row exactly as given.
    pub fn seed(&self, row: R) {
        self.state.lock().rows.insert(row.id().to_owned(), row);
    }

    /// Creates a row as another client would, stamping version 1.
    pub fn create(&self, mut row: R) -> R {
        let mut state = self.state.lock();
        let at = state.clock.tick();
        row.stamp(1, at);
        state.rows.insert(row.id().to_owned(), row.clone());
        row
    }

    /// Modifies a stored row as another client would, bumping its version.
    pub fn update_remote(&self, id: &str, change: impl FnOnce(&mut R)) -> Option<R> {
        let mut state = self.state.lock();
        let at = state.clock.tick();
        let row = state.rows.get_mut(id)?;
        change(row);
        let version = row.version().unwrap_or(0) + 1;
        row.stamp(version, at);
        Some(row.clone())
    }

    /// Soft-deletes a stored row as another client would.
    pub fn tombstone(&self, id: &str) -> Option<R> {
        let mut state = self.state.lock();
        let at = state.clock.tick();
        let row = state.rows.get_mut(id)?;
        row.set_deleted_at(Some(at.clone()));
        let version = row.version().unwrap_or(0) + 1;
        row.stamp(version, at);
        Some(row.clone())
    }

    /// Removes a row entirely, bypassing soft delete.
    pub fn purge(&self, id: &str) -> Option<R> {
        self.state.lock().rows.remove(id)
    }

    /// Gets a stored row.
    pub fn get(&self, id: &str) -> Option<R> {
        self.state.lock().rows.get(id).cloned()
    }

    /// All stored rows in id order.
    pub fn rows(&self) -> Vec<R> {
        self.state.lock().rows.values().cloned().collect()
    }

    /// Number of stored rows.
    pub fn len(&self) -> usize {
        self.state.lock().rows.len()
    }

    /// Returns true if nothing is stored.
    pub fn is_empty(&self) -> bool {
        self.state.lock().rows.is_empty()
    }

    /// Freezes or releases the clock.
    pub fn freeze_clock(&self, frozen: bool) {
        self.state.lock().clock.frozen = frozen;
    }

    /// Queues a failure for the next call of `op`.
    pub fn fail_next(&self, op: RemoteOp, error: RemoteError) {
        self.push_fault(op, Fault::Fail(error));
    }

    /// Applies the next `op` mutation but reports a transient failure.
    pub fn drop_next_response(&self, op: RemoteOp) {
        self.push_fault(op, Fault::DropResponse);
    }

    fn push_fault(&self, op: RemoteOp, fault: Fault) {
        self.state
            .lock()
            .faults
            .entry(op)
            .or_default()
            .push_back(fault);
    }

    /// Rejects every mutation of `id` with `error`.
    pub fn reject_id(&self, id: impl Into<String>, error: RemoteError) {
        self.state.lock().rejected.insert(id.into(), error);
    }

    /// Number of calls of `op` so far, failed ones included.
    pub fn calls(&self, op: RemoteOp) -> usize {
        self.state.lock().calls.get(&op).copied().unwrap_or(0)
    }

    /// Rows strictly after `cursor` in sync order, at most `limit`.
    pub fn fetch_since(&self, cursor: Option<&SyncCursor>, limit: usize) -> RemoteResult<Vec<R>> {
        let mut state = self.state.lock();
        if let Some(fault) = state.enter(RemoteOp::FetchSince) {
            return Err(match fault {
                Fault::Fail(err) => err,
                Fault::DropResponse => lost_response(),
            });
        }

        let mut page: Vec<R> = state
            .rows
            .values()
            .filter(|row| admits(cursor, *row))
            .cloned()
            .collect();
        page.sort_by(|a, b| a.sync_cmp(b));
        page.truncate(limit);
        Ok(page)
    }

    /// The stored row with `id`, tombstones included.
    pub fn fetch_one(&self, id: &str) -> RemoteResult<Option<R>> {
        let mut state = self.state.lock();
        if let Some(fault) = state.enter(RemoteOp::FetchOne) {
            return Err(match fault {
                Fault::Fail(err) => err,
                Fault::DropResponse => lost_response(),
            });
        }
        Ok(state.rows.get(id).cloned())
    }

    /// Creates rows and returns them as stored.
    ///
    /// Requests whose key was seen before return the original row. Any
    /// duplicate id or rejected row fails the whole call.
    pub fn insert_returning(&self, requests: &[InsertRequest<R>]) -> RemoteResult<Vec<R>> {
        let mut state = self.state.lock();
        let drop_response = match state.enter(RemoteOp::Insert) {
            Some(Fault::Fail(err)) => return Err(err),
            Some(Fault::DropResponse) => true,
            None => false,
        };

        let mut seen = HashSet::new();
        for request in requests {
            if state.inserts.contains_key(&request.idempotency_key) {
                continue;
            }
            if let Some(err) = state.rejected.get(&request.id) {
                return Err(err.clone());
            }
            if state.rows.contains_key(&request.id) || !seen.insert(request.id.as_str()) {
                return Err(RemoteError::from_status(
                    409,
                    Some(PG_UNIQUE_VIOLATION),
                    format!(
                        "duplicate key value violates unique constraint (id)=({})",
                        request.id
                    ),
                    None,
                ));
            }
        }

        let mut created = Vec::with_capacity(requests.len());
        for request in requests {
            if let Some(replay) = state.inserts.get(&request.idempotency_key) {
                debug!("Replaying insert of {} for key {}", request.id, request.idempotency_key);
                created.push(replay.clone());
                continue;
            }
            let mut row = request.payload.clone();
            let at = state.clock.tick();
            row.stamp(1, at);
            state.rows.insert(request.id.clone(), row.clone());
            state
                .inserts
                .insert(request.idempotency_key.clone(), row.clone());
            created.push(row);
        }

        if drop_response {
            return Err(lost_response());
        }
        Ok(created)
    }

    /// Applies `request` if the stored version matches; `Ok(None)` otherwise.
    pub fn update_if_version_matches(&self, request: &UpdateRequest<R>) -> RemoteResult<Option<R>> {
        let mut state = self.state.lock();
        let drop_response = match state.enter(RemoteOp::Update) {
            Some(Fault::Fail(err)) => return Err(err),
            Some(Fault::DropResponse) => true,
            None => false,
        };

        if let Some(replay) = state.updates.get(&request.idempotency_key) {
            debug!("Replaying update of {} for key {}", request.id, request.idempotency_key);
            return Ok(replay.clone());
        }
        if let Some(err) = state.rejected.get(&request.id) {
            return Err(err.clone());
        }

        let at = state.clock.tick();
        let Some(stored) = state.rows.get_mut(&request.id) else {
            return Err(RemoteError::from_status(
                406,
                Some(PGRST_NO_ROWS),
                format!("no row with id {}", request.id),
                None,
            ));
        };

        let outcome = if stored.version() == Some(request.expected_version) {
            let mut row = request.payload.clone();
            row.stamp(request.expected_version + 1, at);
            *stored = row.clone();
            Some(row)
        } else {
            None
        };

        state
            .updates
            .insert(request.idempotency_key.clone(), outcome.clone());

        if drop_response {
            return Err(lost_response());
        }
        Ok(outcome)
    }
}

impl<R> Default for MemoryRemote<R>
where
    R: ServerStamp + Clone,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<R> std::fmt::Debug for MemoryRemote<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("MemoryRemote")
            .field("rows", &state.rows.len())
            .field("calls", &state.calls)
            .finish_non_exhaustive()
    }
}
