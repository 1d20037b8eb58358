//! Per-entity sync specification.

use crate::error::{RemoteResult, StoreResult};
use plansync_protocol::{
    ConflictRecord, IdempotencyKey, InsertRequest, SyncCursor, SyncRow, UpdateRequest,
};
use std::fmt;

/// Reads one page of remote rows strictly after the cursor, in sync order.
pub type FetchSinceFn<R> =
    Box<dyn Fn(Option<&SyncCursor>, usize) -> RemoteResult<Vec<R>> + Send + Sync>;
/// Reads the current remote row for conflict inspection.
pub type FetchOneFn<R> = Box<dyn Fn(&str) -> RemoteResult<Option<R>> + Send + Sync>;
/// Creates rows remotely and returns them as stored.
pub type InsertReturningFn<R, I> =
    Box<dyn Fn(&[InsertRequest<I>]) -> RemoteResult<Vec<R>> + Send + Sync>;
/// Compare-and-swap update; `Ok(None)` means the version did not match.
pub type UpdateIfVersionMatchesFn<R, U> =
    Box<dyn Fn(&UpdateRequest<U>) -> RemoteResult<Option<R>> + Send + Sync>;
/// Reads every locally pending row.
pub type ReadDirtyFn<R> = Box<dyn Fn() -> StoreResult<Vec<R>> + Send + Sync>;
/// Upserts a pulled page and persists the advanced cursor in one commit.
pub type ApplyPageFn<R> = Box<dyn Fn(&[R], &SyncCursor) -> StoreResult<()> + Send + Sync>;
/// Clears dirty status for rows the remote accepted, adopting the returned rows.
pub type MarkCleanFn<R> = Box<dyn Fn(&[R]) -> StoreResult<()> + Send + Sync>;
/// Appends to the conflict log.
pub type RecordConflictsFn<R> = Box<dyn Fn(&[ConflictRecord<R>]) -> StoreResult<()> + Send + Sync>;
/// Reads the persisted cursor.
pub type ReadCursorFn = Box<dyn Fn() -> StoreResult<Option<SyncCursor>> + Send + Sync>;
/// Clears the persisted cursor.
pub type ResetCursorFn = Box<dyn Fn() -> StoreResult<()> + Send + Sync>;
/// Classifies a dirty row as a pending insert.
pub type IsInsertFn<R> = Box<dyn Fn(&R) -> bool + Send + Sync>;
/// Serializes a row into a wire payload.
pub type PayloadFn<R, P> = Box<dyn Fn(&R) -> P + Send + Sync>;
/// Returns the idempotency key of a row's current local edit.
pub type IdempotencyKeyFn<R> = Box<dyn Fn(&R) -> IdempotencyKey + Send + Sync>;

/// Everything the runner needs to sync one entity type.
///
/// A plain bundle of collaborator functions: it carries no logic and no
/// state. The local-store functions own all durable state (cursor, dirty
/// set, conflict log); the remote functions own transport, timeouts and
/// error classification.
///
/// `R` is the row type, `I` the insert payload and `U` the update payload.
pub struct SyncSpec<R, I, U> {
    /// Entity type name, used in logs and reports.
    pub entity: String,
    /// Maximum rows per pulled page. Must be positive.
    pub page_size: usize,

    /// Remote: page of rows after a cursor.
    pub fetch_since: FetchSinceFn<R>,
    /// Remote: single row lookup.
    pub fetch_one: FetchOneFn<R>,
    /// Remote: bulk create.
    pub insert_returning: InsertReturningFn<R, I>,
    /// Remote: version-gated update.
    pub update_if_version_matches: UpdateIfVersionMatchesFn<R, U>,

    /// Local: pending rows.
    pub read_dirty: ReadDirtyFn<R>,
    /// Local: apply a pulled page with its cursor.
    pub apply_page: ApplyPageFn<R>,
    /// Local: confirm pushed rows.
    pub mark_clean: MarkCleanFn<R>,
    /// Local: append conflicts.
    pub record_conflicts: RecordConflictsFn<R>,
    /// Local: read the cursor.
    pub read_cursor: ReadCursorFn,
    /// Local: forget the cursor for a full resync.
    pub reset_cursor: ResetCursorFn,

    /// Splits dirty rows into inserts and updates.
    pub is_insert: IsInsertFn<R>,
    /// Insert wire payload.
    pub make_insert_payload: PayloadFn<R, I>,
    /// Update wire payload.
    pub make_update_payload: PayloadFn<R, U>,
    /// Idempotency key for the row's pending edit.
    pub idempotency_key: IdempotencyKeyFn<R>,
}

impl<R, I, U> fmt::Debug for SyncSpec<R, I, U> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SyncSpec")
            .field("entity", &self.entity)
            .field("page_size", &self.page_size)
            .finish_non_exhaustive()
    }
}

/// The usual insert classifier: rows without a remote version.
pub fn version_is_absent<R: SyncRow>() -> IsInsertFn<R> {
    Box::new(|row: &R| row.version().is_none())
}
