//! In-memory local store.

use crate::error::{StoreError, StoreResult};
use parking_lot::RwLock;
use plansync_protocol::{ConflictRecord, IdempotencyKey, RawTimestamp, ServerStamp, SyncCursor, SyncRow};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::debug;

/// Serializable contents of a [`MemoryStore`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreSnapshot<R> {
    /// Entity type.
    pub entity: String,
    /// Rows by id.
    pub rows: BTreeMap<String, R>,
    /// Dirty row ids with the revision of their latest local edit.
    pub dirty: BTreeMap<String, u64>,
    /// Pull cursor.
    pub cursor: Option<SyncCursor>,
    /// Conflict log.
    pub conflicts: Vec<ConflictRecord<R>>,
    /// Newest pulled remote row held back for each dirty id.
    #[serde(default = "BTreeMap::new")]
    pub shadows: BTreeMap<String, R>,
    /// Next local edit revision.
    pub next_revision: u64,
    /// Number of pages committed.
    pub pages_applied: u64,
}

impl<R> StoreSnapshot<R> {
    fn empty(entity: String) -> Self {
        Self {
            entity,
            rows: BTreeMap::new(),
            dirty: BTreeMap::new(),
            cursor: None,
            conflicts: Vec::new(),
            shadows: BTreeMap::new(),
            next_revision: 1,
            pages_applied: 0,
        }
    }
}

/// A local store for one entity type, held in memory.
///
/// Every method takes a single lock, so `apply_page` commits the page and
/// the cursor together.
///
/// Pulled rows never overwrite a dirty local row. They are kept as the
/// row's shadow instead, and `mark_clean` adopts the shadow when it is newer
/// than the row the push returned. A replayed push answer can be older than
/// a remote edit the cursor already moved past.
pub struct MemoryStore<R> {
    state: RwLock<StoreSnapshot<R>>,
    fail_next_apply: RwLock<Option<StoreError>>,
}

impl<R> MemoryStore<R>
where
    R: SyncRow + Clone,
{
    /// Creates an empty store.
    pub fn new(entity: impl Into<String>) -> Self {
        Self::from_snapshot(StoreSnapshot::empty(entity.into()))
    }

    /// Restores a store from a snapshot.
    pub fn from_snapshot(snapshot: StoreSnapshot<R>) -> Self {
        Self {
            state: RwLock::new(snapshot),
            fail_next_apply: RwLock::new(None),
        }
    }

    /// Copies out the current contents.
    pub fn snapshot(&self) -> StoreSnapshot<R> {
        self.state.read().clone()
    }

    /// Gets the entity type.
    pub fn entity(&self) -> String {
        self.state.read().entity.clone()
    }

    /// Adds a row that is already in sync with the remote.
    pub fn insert_clean(&self, row: R) {
        let mut state = self.state.write();
        state.dirty.remove(row.id());
        state.shadows.remove(row.id());
        state.rows.insert(row.id().to_owned(), row);
    }

    /// Records a local edit and marks the row dirty.
    ///
    /// Returns the revision of the edit.
    pub fn edit(&self, row: R) -> u64 {
        let mut state = self.state.write();
        let revision = state.next_revision;
        state.next_revision += 1;
        state.dirty.insert(row.id().to_owned(), revision);
        state.rows.insert(row.id().to_owned(), row);
        revision
    }

    /// Gets a row.
    pub fn get(&self, id: &str) -> Option<R> {
        self.state.read().rows.get(id).cloned()
    }

    /// All rows in id order, tombstones included.
    pub fn rows(&self) -> Vec<R> {
        self.state.read().rows.values().cloned().collect()
    }

    /// Number of rows, tombstones included.
    pub fn len(&self) -> usize {
        self.state.read().rows.len()
    }

    /// Returns true if the store holds no rows.
    pub fn is_empty(&self) -> bool {
        self.state.read().rows.is_empty()
    }

    /// Returns true if the row has an unpushed edit.
    pub fn is_dirty(&self, id: &str) -> bool {
        self.state.read().dirty.contains_key(id)
    }

    /// Ids of dirty rows.
    pub fn dirty_ids(&self) -> Vec<String> {
        self.state.read().dirty.keys().cloned().collect()
    }

    /// Pulled remote row held back behind a dirty local row.
    pub fn shadow(&self, id: &str) -> Option<R> {
        self.state.read().shadows.get(id).cloned()
    }

    /// Persisted pull cursor.
    pub fn cursor(&self) -> Option<SyncCursor> {
        self.state.read().cursor.clone()
    }

    /// Conflict log.
    pub fn conflicts(&self) -> Vec<ConflictRecord<R>> {
        self.state.read().conflicts.clone()
    }

    /// Number of pages committed so far.
    pub fn pages_applied(&self) -> u64 {
        self.state.read().pages_applied
    }

    /// Makes the next `apply_page` fail without writing anything.
    pub fn fail_next_apply(&self, error: StoreError) {
        *self.fail_next_apply.write() = Some(error);
    }

    /// Dirty rows in id order.
    pub fn read_dirty(&self) -> StoreResult<Vec<R>> {
        let state = self.state.read();
        Ok(state
            .dirty
            .keys()
            .filter_map(|id| state.rows.get(id).cloned())
            .collect())
    }

    /// Upserts a pulled page and moves the cursor in one step.
    pub fn apply_page(&self, page: &[R], cursor: &SyncCursor) -> StoreResult<()> {
        if let Some(err) = self.fail_next_apply.write().take() {
            return Err(err);
        }

        let mut state = self.state.write();
        for row in page {
            if state.dirty.contains_key(row.id()) {
                debug!(
                    "Keeping dirty local {} row {} over pulled version {:?}",
                    state.entity,
                    row.id(),
                    row.version()
                );
                let newer = state
                    .shadows
                    .get(row.id())
                    .map_or(true, |shadow| is_newer(row, shadow));
                if newer {
                    state.shadows.insert(row.id().to_owned(), row.clone());
                }
                continue;
            }
            state.rows.insert(row.id().to_owned(), row.clone());
        }
        state.cursor = Some(cursor.clone());
        state.pages_applied += 1;
        Ok(())
    }

    /// Adopts rows the remote accepted and clears their dirty status.
    ///
    /// A shadow newer than the accepted row wins, since the remote has
    /// moved on since the push was first applied.
    pub fn mark_clean(&self, rows: &[R]) -> StoreResult<()> {
        let mut state = self.state.write();
        for row in rows {
            state.dirty.remove(row.id());
            let shadow = state.shadows.remove(row.id());
            let adopted = match shadow {
                Some(shadow) if is_newer(&shadow, row) => {
                    debug!(
                        "Adopting pulled {} row {} v{:?} over pushed v{:?}",
                        state.entity,
                        row.id(),
                        shadow.version(),
                        row.version()
                    );
                    shadow
                }
                _ => row.clone(),
            };
            state.rows.insert(row.id().to_owned(), adopted);
        }
        Ok(())
    }

    /// Appends to the conflict log.
    pub fn record_conflicts(&self, records: &[ConflictRecord<R>]) -> StoreResult<()> {
        self.state.write().conflicts.extend(records.iter().cloned());
        Ok(())
    }

    /// Reads the cursor.
    pub fn read_cursor(&self) -> StoreResult<Option<SyncCursor>> {
        Ok(self.cursor())
    }

    /// Forgets the cursor.
    pub fn reset_cursor(&self) -> StoreResult<()> {
        self.state.write().cursor = None;
        Ok(())
    }

    /// Stable key for the row's pending edit.
    pub fn idempotency_key(&self, row: &R) -> IdempotencyKey {
        let state = self.state.read();
        let revision = state.dirty.get(row.id()).copied().unwrap_or(0);
        IdempotencyKey::derive(&state.entity, row.id(), row.version(), revision)
    }
}

/// Orders two copies of one remote row by `(updated_at, version)`.
fn is_newer<R: SyncRow>(a: &R, b: &R) -> bool {
    (a.updated_at(), a.version()) > (b.updated_at(), b.version())
}

impl<R> MemoryStore<R>
where
    R: ServerStamp + Clone,
{
    /// Soft-deletes a row locally.
    ///
    /// Returns false if the row does not exist.
    pub fn delete_locally(&self, id: &str) -> bool {
        let Some(mut row) = self.get(id) else {
            return false;
        };
        row.set_deleted_at(Some(RawTimestamp::now()));
        self.edit(row);
        true
    }
}

impl<R> std::fmt::Debug for MemoryStore<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.read();
        f.debug_struct("MemoryStore")
            .field("entity", &state.entity)
            .field("rows", &state.rows.len())
            .field("dirty", &state.dirty.len())
            .field("cursor", &state.cursor)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use plansync_protocol::entities::Task;
    use plansync_protocol::PushOperation;

    fn synced(id: &str, ts: &str, version: i64) -> Task {
        let mut task = Task::new(id, id);
        task.updated_at = RawTimestamp::parse(ts).unwrap();
        task.version = Some(version);
        task
    }

    #[test]
    fn edits_get_increasing_revisions() {
        let store = MemoryStore::new("tasks");
        let a = store.edit(Task::new("a", "first"));
        let b = store.edit(Task::new("a", "second"));
        assert!(b > a);
        assert_eq!(store.dirty_ids(), vec!["a".to_string()]);
        assert_eq!(store.get("a").unwrap().title, "second");
    }

    #[test]
    fn key_changes_with_each_edit() {
        let store = MemoryStore::new("tasks");
        store.edit(Task::new("a", "first"));
        let row = store.get("a").unwrap();
        let first = store.idempotency_key(&row);
        assert_eq!(first, store.idempotency_key(&row));

        store.edit(Task::new("a", "second"));
        assert_ne!(first, store.idempotency_key(&row));
    }

    #[test]
    fn apply_page_skips_dirty_rows_and_moves_cursor() {
        let store = MemoryStore::new("tasks");
        store.edit(Task::new("a", "local"));

        let page = vec![
            synced("a", "2024-01-01T00:00:00.000001Z", 3),
            synced("b", "2024-01-01T00:00:00.000002Z", 1),
        ];
        let cursor = SyncCursor::at_row(&page[1]);
        store.apply_page(&page, &cursor).unwrap();

        assert_eq!(store.get("a").unwrap().title, "local");
        assert_eq!(store.get("b").unwrap().version, Some(1));
        assert_eq!(store.cursor(), Some(cursor));
        assert_eq!(store.pages_applied(), 1);
    }

    #[test]
    fn skipped_pulled_row_becomes_shadow() {
        let store = MemoryStore::new("tasks");
        store.edit(Task::new("a", "local"));

        let older = [synced("a", "2024-01-01T00:00:00.000002Z", 2)];
        store.apply_page(&older, &SyncCursor::at_row(&older[0])).unwrap();
        let newer = [synced("a", "2024-01-01T00:00:00.000003Z", 3)];
        store.apply_page(&newer, &SyncCursor::at_row(&newer[0])).unwrap();

        assert_eq!(store.get("a").unwrap().title, "local");
        assert_eq!(store.shadow("a").unwrap().version, Some(3));
    }

    #[test]
    fn mark_clean_prefers_newer_shadow() {
        let store = MemoryStore::new("tasks");
        store.edit(Task::new("a", "local"));
        let pulled = [synced("a", "2024-01-01T00:00:00.000003Z", 3)];
        store.apply_page(&pulled, &SyncCursor::at_row(&pulled[0])).unwrap();

        store
            .mark_clean(&[synced("a", "2024-01-01T00:00:00.000002Z", 2)])
            .unwrap();

        assert!(!store.is_dirty("a"));
        assert_eq!(store.get("a").unwrap().version, Some(3));
        assert!(store.shadow("a").is_none());
    }

    #[test]
    fn mark_clean_drops_older_shadow() {
        let store = MemoryStore::new("tasks");
        store.edit(Task::new("a", "local"));
        let pulled = [synced("a", "2024-01-01T00:00:00.000002Z", 2)];
        store.apply_page(&pulled, &SyncCursor::at_row(&pulled[0])).unwrap();

        let mut accepted = synced("a", "2024-01-01T00:00:00.000004Z", 3);
        accepted.title = "local".into();
        store.mark_clean(std::slice::from_ref(&accepted)).unwrap();

        assert_eq!(store.get("a").unwrap(), accepted);
        assert!(store.shadow("a").is_none());
    }

    #[test]
    fn failed_apply_writes_nothing() {
        let store = MemoryStore::new("tasks");
        store.fail_next_apply(StoreError::new("disk full"));

        let page = vec![synced("a", "2024-01-01T00:00:00.000001Z", 1)];
        let err = store.apply_page(&page, &SyncCursor::at_row(&page[0])).unwrap_err();

        assert_eq!(err.message, "disk full");
        assert!(store.is_empty());
        assert!(store.cursor().is_none());
    }

    #[test]
    fn mark_clean_adopts_remote_row() {
        let store = MemoryStore::new("tasks");
        store.edit(Task::new("a", "local"));
        store
            .mark_clean(&[synced("a", "2024-01-01T00:00:00.000001Z", 1)])
            .unwrap();

        assert!(!store.is_dirty("a"));
        assert_eq!(store.get("a").unwrap().version, Some(1));
        assert!(store.read_dirty().unwrap().is_empty());
    }

    #[test]
    fn local_delete_is_a_dirty_tombstone() {
        let store = MemoryStore::new("tasks");
        store.insert_clean(synced("a", "2024-01-01T00:00:00.000001Z", 2));
        assert!(store.delete_locally("a"));
        assert!(!store.delete_locally("zzz"));

        let dirty = store.read_dirty().unwrap();
        assert_eq!(dirty.len(), 1);
        assert!(dirty[0].is_tombstone());
        assert_eq!(dirty[0].version, Some(2));
    }

    #[test]
    fn snapshot_round_trip_keeps_conflicts() {
        let store = MemoryStore::new("tasks");
        let local = synced("a", "2024-01-01T00:00:00.000001Z", 1);
        store
            .record_conflicts(&[ConflictRecord::new(PushOperation::Update, local, None)])
            .unwrap();

        let restored = MemoryStore::from_snapshot(store.snapshot());
        assert_eq!(restored.conflicts().len(), 1);
        assert_eq!(restored.entity(), "tasks");
    }
}
