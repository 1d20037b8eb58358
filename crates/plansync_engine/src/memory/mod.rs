//! In-memory collaborators.
//!
//! [`MemoryStore`] and [`MemoryRemote`] implement the local-store and remote
//! contracts of a [`SyncSpec`] without any I/O. They back the CLI simulator
//! and the test suites, and document by example what a real store and
//! backend must guarantee.

mod remote;
mod store;

pub use remote::{Fault, MemoryRemote, RemoteOp};
pub use store::{MemoryStore, StoreSnapshot};

use crate::spec::{version_is_absent, SyncSpec};
use plansync_protocol::ServerStamp;
use std::sync::Arc;

/// Wires a store and a remote into a spec whose payloads are the rows
/// themselves.
pub fn memory_spec<R>(
    entity: impl Into<String>,
    page_size: usize,
    store: Arc<MemoryStore<R>>,
    remote: Arc<MemoryRemote<R>>,
) -> SyncSpec<R, R, R>
where
    R: ServerStamp + Clone + Send + Sync + 'static,
{
    let fetch_since = Arc::clone(&remote);
    let fetch_one = Arc::clone(&remote);
    let insert = Arc::clone(&remote);
    let update = remote;

    let read_dirty = Arc::clone(&store);
    let apply_page = Arc::clone(&store);
    let mark_clean = Arc::clone(&store);
    let record_conflicts = Arc::clone(&store);
    let read_cursor = Arc::clone(&store);
    let reset_cursor = Arc::clone(&store);
    let keys = store;

    SyncSpec {
        entity: entity.into(),
        page_size,
        fetch_since: Box::new(move |cursor, limit| fetch_since.fetch_since(cursor, limit)),
        fetch_one: Box::new(move |id| fetch_one.fetch_one(id)),
        insert_returning: Box::new(move |requests| insert.insert_returning(requests)),
        update_if_version_matches: Box::new(move |request| update.update_if_version_matches(request)),
        read_dirty: Box::new(move || read_dirty.read_dirty()),
        apply_page: Box::new(move |page, cursor| apply_page.apply_page(page, cursor)),
        mark_clean: Box::new(move |rows| mark_clean.mark_clean(rows)),
        record_conflicts: Box::new(move |records| record_conflicts.record_conflicts(records)),
        read_cursor: Box::new(move || read_cursor.read_cursor()),
        reset_cursor: Box::new(move || reset_cursor.reset_cursor()),
        is_insert: version_is_absent(),
        make_insert_payload: Box::new(|row: &R| row.clone()),
        make_update_payload: Box::new(|row: &R| row.clone()),
        idempotency_key: Box::new(move |row| keys.idempotency_key(row)),
    }
}
