//! Integration tests for the sync engine against in-memory collaborators.

use plansync_engine::memory::RemoteOp;
use plansync_engine::{
    CancelToken, ErrorClass, PullTermination, RemoteError, StoreError, SyncConfig, SyncError,
    SyncRunner,
};
use plansync_protocol::{SyncCursor, SyncRow};
use plansync_testkit::prelude::*;
use proptest::prelude::*;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

// ---------------------------------------------------------------------------
// Pull
// ---------------------------------------------------------------------------

#[test]
fn tied_timestamps_span_pages_without_loss() {
    let pair = scenarios::tied_remote(5);
    let tied_at = pair.remote.get("t-00").unwrap().updated_at;

    let report = pair.run(2).unwrap();

    assert_eq!(report.pulled, 5);
    assert_eq!(pair.store.len(), 5);
    // 2, 2, 1, then the empty page
    assert_eq!(pair.remote.calls(RemoteOp::FetchSince), 4);
    assert_eq!(pair.store.pages_applied(), 3);
    assert_eq!(pair.store.cursor(), Some(SyncCursor::new(tied_at, "t-04")));
}

#[test]
fn final_cursor_is_greatest_pulled_key() {
    let pair = TaskPair::tasks();
    pair.remote.seed(synced_task("b", 3, 1));
    pair.remote.seed(synced_task("a", 3, 1));
    pair.remote.seed(synced_task("z", 1, 1));
    pair.remote.seed(synced_task("c", 2, 1));

    pair.run(3).unwrap();

    assert_eq!(pair.store.cursor(), Some(SyncCursor::new(ts(3), "b")));
}

#[test]
fn zero_row_pass_keeps_cursor() {
    let pair = scenarios::tied_remote(3);
    pair.run(10).unwrap();
    let before = pair.store.cursor();

    let report = pair.run(10).unwrap();

    assert_eq!(report.pulled, 0);
    assert_eq!(pair.store.cursor(), before);
}

#[test]
fn cursor_never_moves_backwards() {
    let pair = TaskPair::tasks();
    let mut last: Option<SyncCursor> = None;

    for round in 0..5 {
        for i in 0..3 {
            pair.remote.create(task(&format!("r{round}-{i}")));
        }
        pair.run(2).unwrap();
        let cursor = pair.store.cursor();
        assert!(cursor >= last);
        last = cursor;
    }
    assert_eq!(pair.store.len(), 15);
}

#[test]
fn tombstones_apply_idempotently() {
    let pair = TaskPair::tasks();
    pair.remote.create(task("a"));
    pair.run(10).unwrap();

    let gone = pair.remote.tombstone("a").unwrap();
    pair.run(10).unwrap();
    let once = pair.store.get("a").unwrap();

    pair.store.reset_cursor().unwrap();
    pair.run(10).unwrap();
    let twice = pair.store.get("a").unwrap();

    assert!(once.is_tombstone());
    assert_eq!(once, gone);
    assert_eq!(once, twice);
    assert_eq!(pair.store.len(), 1);
}

#[test]
fn short_page_saves_a_round_trip() {
    let strict = scenarios::tied_remote(5);
    strict.run(2).unwrap();
    assert_eq!(strict.remote.calls(RemoteOp::FetchSince), 4);

    let eager = scenarios::tied_remote(5);
    let runner =
        SyncRunner::new(SyncConfig::new().with_pull_termination(PullTermination::ShortPage));
    eager.run_with(&runner, 2).unwrap();
    assert_eq!(eager.remote.calls(RemoteOp::FetchSince), 3);
    assert_eq!(eager.store.len(), 5);
}

#[test]
fn pull_failure_aborts_before_push() {
    let pair = TaskPair::tasks();
    pair.store.edit(task("local"));
    pair.remote
        .fail_next(RemoteOp::FetchSince, RemoteError::transient("timeout"));

    let err = pair.run(10).unwrap_err();

    assert!(err.is_retryable());
    assert_eq!(pair.remote.calls(RemoteOp::Insert), 0);
    assert!(pair.store.is_dirty("local"));
}

#[test]
fn failed_page_apply_is_retried_next_pass() {
    let pair = scenarios::tied_remote(4);
    pair.store.fail_next_apply(StoreError::new("database is locked"));

    let err = pair.run(2).unwrap_err();
    assert!(matches!(err, SyncError::Store(_)));
    assert!(pair.store.cursor().is_none());
    assert!(pair.store.is_empty());

    assert_eq!(pair.run(2).unwrap().pulled, 4);
    assert!(pair.converged());
}

#[test]
fn dirty_local_row_survives_pull() {
    let pair = scenarios::diverged_task("a");

    pair.run(10).unwrap();

    let local = pair.store.get("a").unwrap();
    assert_eq!(local.title, "local edit");
    assert!(pair.store.is_dirty("a"));
}

// ---------------------------------------------------------------------------
// Push
// ---------------------------------------------------------------------------

#[test]
fn new_rows_are_inserted_and_cleaned() {
    let pair = TaskPair::tasks();
    for id in ["a", "b", "c"] {
        pair.store.edit(task(id));
    }

    let report = pair.run(10).unwrap();

    assert_eq!(report.inserted, 3);
    assert!(report.is_clean());
    assert!(pair.store.dirty_ids().is_empty());
    assert_eq!(pair.store.get("a").unwrap().version, Some(1));
}

#[test]
fn edit_is_pushed_as_guarded_update() {
    let pair = TaskPair::tasks();
    pair.remote.create(task("a"));
    pair.run(10).unwrap();

    let mut row = pair.store.get("a").unwrap();
    row.title = "renamed".into();
    pair.store.edit(row);

    let report = pair.run(10).unwrap();

    assert_eq!(report.updated, 1);
    assert_eq!(pair.remote.get("a").unwrap().title, "renamed");
    assert_eq!(pair.remote.get("a").unwrap().version, Some(2));
    assert!(pair.converged());
}

#[test]
fn stale_update_is_a_conflict() {
    let pair = scenarios::diverged_task("a");

    let report = pair.run(10).unwrap();

    assert_eq!(report.conflicts, 1);
    assert_eq!(report.updated, 0);
    assert!(pair.store.is_dirty("a"));
    assert_eq!(pair.remote.get("a").unwrap().title, "remote edit");

    let conflicts = pair.store.conflicts();
    assert_eq!(conflicts.len(), 1);
    assert!(conflicts[0].is_update_conflict());
    assert_eq!(conflicts[0].version_gap(), Some(1));
    assert_eq!(conflicts[0].remote.as_ref().unwrap().title, "remote edit");
}

#[test]
fn one_bad_insert_does_not_block_the_batch() {
    let pair = TaskPair::tasks();
    pair.remote.create(task("dup"));

    // Local creates "dup" without having pulled it yet.
    let runner = SyncRunner::default();
    for id in ["a", "b", "dup", "c"] {
        pair.store.edit(task(id));
    }
    let report = runner.push(&pair.spec(10)).unwrap();

    assert_eq!(report.inserted, 3);
    assert_eq!(report.conflicts, 1);
    assert_eq!(pair.store.dirty_ids(), vec!["dup".to_string()]);
    // one bulk call, then one call per row
    assert_eq!(pair.remote.calls(RemoteOp::Insert), 5);
    assert!(pair.store.conflicts()[0].remote.is_some());
}

#[test]
fn without_fallback_the_batch_stays_dirty() {
    let pair = TaskPair::tasks();
    pair.remote.create(task("dup"));
    for id in ["a", "dup"] {
        pair.store.edit(task(id));
    }

    let runner = SyncRunner::new(SyncConfig::new().with_bulk_fallback(false));
    let report = runner.push(&pair.spec(10)).unwrap();

    assert_eq!(report.inserted, 0);
    assert_eq!(report.deferred.len(), 2);
    assert_eq!(pair.store.dirty_ids().len(), 2);
    assert_eq!(pair.remote.calls(RemoteOp::Insert), 1);
}

#[test]
fn inserts_are_chunked() {
    let pair = TaskPair::tasks();
    for i in 0..7 {
        pair.store.edit(task(&format!("n-{i}")));
    }

    let runner = SyncRunner::new(SyncConfig::new().with_push_batch_size(3));
    let report = runner.push(&pair.spec(10)).unwrap();

    assert_eq!(report.inserted, 7);
    assert_eq!(pair.remote.calls(RemoteOp::Insert), 3);
}

#[test]
fn transient_failures_never_clean_or_conflict() {
    let pair = TaskPair::tasks();
    pair.remote.create(task("old"));
    pair.run(10).unwrap();

    let mut row = pair.store.get("old").unwrap();
    row.priority = 3;
    pair.store.edit(row);
    pair.store.edit(task("new"));

    pair.remote
        .fail_next(RemoteOp::Insert, RemoteError::transient("503"));
    pair.remote
        .fail_next(RemoteOp::Insert, RemoteError::transient("503"));
    pair.remote.fail_next(
        RemoteOp::Update,
        RemoteError::rate_limited("slow down", Some(Duration::from_secs(2))),
    );

    let report = pair.run(10).unwrap();

    assert_eq!(report.pushed(), 0);
    assert_eq!(report.conflicts, 0);
    assert_eq!(report.deferred.len(), 2);
    assert_eq!(report.retry_after, Some(Duration::from_secs(2)));
    assert!(pair.store.conflicts().is_empty());
    assert_eq!(pair.store.dirty_ids().len(), 2);

    let report = pair.run(10).unwrap();
    assert_eq!(report.pushed(), 2);
    assert!(pair.converged());
}

#[test]
fn missing_is_not_a_conflict() {
    let pair = TaskPair::tasks();
    pair.remote.create(task("a"));
    pair.run(10).unwrap();
    pair.remote.purge("a");

    let mut row = pair.store.get("a").unwrap();
    row.title = "edited".into();
    pair.store.edit(row);

    let report = pair.run(10).unwrap();

    assert_eq!(report.missing, vec!["a".to_string()]);
    assert_eq!(report.conflicts, 0);
    assert!(report.needs_attention());
    assert!(pair.store.conflicts().is_empty());
    assert!(pair.store.is_dirty("a"));
}

#[test]
fn permanent_failure_is_reported_not_fatal() {
    let pair = TaskPair::tasks();
    pair.remote
        .reject_id("bad", RemoteError::permanent("violates check constraint"));
    pair.store.edit(task("bad"));
    pair.store.edit(task("good"));

    let report = pair.run(10).unwrap();

    assert_eq!(report.inserted, 1);
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].id, "bad");
    assert_eq!(report.failures[0].error.class(), ErrorClass::Permanent);
    assert!(pair.store.is_dirty("bad"));
}

#[test]
fn lost_insert_response_replays_idempotently() {
    let pair = TaskPair::tasks();
    pair.store.edit(task("a"));
    pair.remote.drop_next_response(RemoteOp::Insert);
    pair.remote.drop_next_response(RemoteOp::Insert);

    let first = pair.run(10).unwrap();
    assert_eq!(first.deferred, vec!["a".to_string()]);
    assert_eq!(pair.remote.len(), 1);

    // The pull adopts nothing over the dirty row; the replay returns the
    // stored row instead of a duplicate-key conflict.
    let second = pair.run(10).unwrap();
    assert_eq!(second.inserted, 1);
    assert_eq!(second.conflicts, 0);
    assert_eq!(pair.remote.len(), 1);
    assert!(pair.converged());
}

#[test]
fn lost_update_response_replays_idempotently() {
    let pair = TaskPair::tasks();
    pair.remote.create(task("a"));
    pair.run(10).unwrap();

    let mut row = pair.store.get("a").unwrap();
    row.title = "once".into();
    pair.store.edit(row);
    pair.remote.drop_next_response(RemoteOp::Update);

    assert_eq!(pair.run(10).unwrap().deferred.len(), 1);
    let report = pair.run(10).unwrap();

    assert_eq!(report.updated, 1);
    assert_eq!(report.conflicts, 0);
    assert_eq!(pair.remote.get("a").unwrap().version, Some(2));
}

#[test]
fn replayed_update_does_not_hide_later_remote_edit() {
    let pair = TaskPair::tasks();
    pair.remote.create(task("a"));
    pair.run(10).unwrap();

    let mut row = pair.store.get("a").unwrap();
    row.title = "mine".into();
    pair.store.edit(row);
    pair.remote.drop_next_response(RemoteOp::Update);
    assert_eq!(pair.run(10).unwrap().deferred.len(), 1);

    pair.remote
        .update_remote("a", |row| row.title = "theirs".into());

    // The pull steps past v3 while "a" is dirty; the replay answers with v2.
    let report = pair.run(10).unwrap();
    assert_eq!(report.pulled, 1);
    assert_eq!(report.updated, 1);
    assert_eq!(report.conflicts, 0);

    let local = pair.store.get("a").unwrap();
    assert_eq!(local.version, Some(3));
    assert_eq!(local.title, "theirs");
    assert!(pair.converged());

    assert_eq!(pair.run(10).unwrap().pulled, 0);
    assert!(pair.converged());
}

fn synced_then_edited(id: &str) -> TaskPair {
    let pair = TaskPair::tasks();
    pair.remote.create(task(id));
    pair.run(10).unwrap();

    let mut row = pair.store.get(id).unwrap();
    row.title = "edited".into();
    pair.store.edit(row);
    pair
}

#[test]
fn conflict_status_on_update_is_logged() {
    let pair = synced_then_edited("a");
    pair.remote.fail_next(
        RemoteOp::Update,
        RemoteError::from_status(412, None, "precondition failed", None),
    );

    let report = pair.run(10).unwrap();

    assert_eq!(report.conflicts, 1);
    assert_eq!(report.updated, 0);
    assert!(report.failures.is_empty());
    assert!(pair.store.is_dirty("a"));

    let conflicts = pair.store.conflicts();
    assert_eq!(conflicts.len(), 1);
    assert_eq!(conflicts[0].id(), "a");
    assert_eq!(conflicts[0].remote.as_ref().unwrap().version, Some(1));
    assert_eq!(pair.remote.calls(RemoteOp::FetchOne), 1);
}

#[test]
fn conflict_is_logged_when_remote_lookup_fails() {
    let pair = synced_then_edited("a");
    pair.remote.fail_next(
        RemoteOp::Update,
        RemoteError::from_status(409, None, "conflict", None),
    );
    pair.remote
        .fail_next(RemoteOp::FetchOne, RemoteError::transient("timeout"));

    let report = pair.run(10).unwrap();

    assert_eq!(report.conflicts, 1);
    assert!(report.deferred.is_empty());
    assert!(pair.store.is_dirty("a"));

    let conflicts = pair.store.conflicts();
    assert_eq!(conflicts.len(), 1);
    assert!(conflicts[0].remote.is_none());
    assert_eq!(conflicts[0].local.title, "edited");
}

#[test]
fn zero_batch_size_pushes_one_row_per_call() {
    let pair = TaskPair::tasks();
    for id in ["a", "b", "c"] {
        pair.store.edit(task(id));
    }

    let mut config = SyncConfig::new();
    config.push_batch_size = 0;
    let report = SyncRunner::new(config).push(&pair.spec(10)).unwrap();

    assert_eq!(report.inserted, 3);
    assert_eq!(pair.remote.calls(RemoteOp::Insert), 3);
    assert!(pair.store.dirty_ids().is_empty());
}

#[test]
fn local_delete_pushes_a_tombstone() {
    let pair = TaskPair::tasks();
    pair.remote.create(task("a"));
    pair.run(10).unwrap();

    assert!(pair.store.delete_locally("a"));
    let report = pair.run(10).unwrap();

    assert_eq!(report.updated, 1);
    assert!(pair.remote.get("a").unwrap().is_tombstone());
    assert!(pair.converged());
}

// ---------------------------------------------------------------------------
// Runner
// ---------------------------------------------------------------------------

#[test]
fn cancel_between_pages_keeps_applied_pages() {
    let pair = scenarios::tied_remote(6);
    let token = CancelToken::new();
    let runner = SyncRunner::default().with_cancel_token(token.clone());

    // Cancel once the first page has been committed.
    let spec = {
        let mut spec = pair.spec(2);
        let store = Arc::clone(&pair.store);
        let pages = Arc::new(AtomicUsize::new(0));
        spec.apply_page = Box::new(move |page, cursor| {
            store.apply_page(page, cursor)?;
            if pages.fetch_add(1, Ordering::SeqCst) == 0 {
                token.cancel();
            }
            Ok(())
        });
        spec
    };

    assert_eq!(runner.run(&spec).unwrap_err(), SyncError::Cancelled);
    assert_eq!(pair.store.len(), 2);
    let cursor = pair.store.cursor().unwrap();
    assert_eq!(cursor.id.as_deref(), Some("t-01"));

    runner.cancel_token().reset();
    assert_eq!(runner.run(&spec).unwrap().pulled, 4);
    assert_eq!(pair.store.len(), 6);
}

#[test]
fn unordered_page_is_rejected() {
    let pair = TaskPair::tasks();
    let mut spec = pair.spec(10);
    spec.fetch_since = Box::new(|_, _| Ok(vec![synced_task("b", 2, 1), synced_task("a", 1, 1)]));

    let err = SyncRunner::default().run(&spec).unwrap_err();

    assert!(matches!(err, SyncError::UnorderedPage { .. }));
    assert!(pair.store.is_empty());
}

#[test]
fn stalled_cursor_is_detected() {
    let pair = TaskPair::tasks();
    let mut spec = pair.spec(1);
    spec.fetch_since = Box::new(|_, _| Ok(vec![synced_task("a", 1, 1)]));

    let err = SyncRunner::default().run(&spec).unwrap_err();

    assert!(matches!(err, SyncError::StalledCursor { .. }));
    assert_eq!(pair.store.pages_applied(), 1);
}

// ---------------------------------------------------------------------------
// Properties
// ---------------------------------------------------------------------------

proptest! {
    #![proptest_config(PropTestConfig::quick().to_proptest_config())]

    #[test]
    fn pull_applies_every_row_once(
        rows in remote_tasks_strategy(24),
        page_size in page_size_strategy(),
    ) {
        let pair = TaskPair::tasks();
        for row in &rows {
            pair.remote.seed(row.clone());
        }

        let report = pair.run(page_size).unwrap();

        prop_assert_eq!(report.pulled, rows.len());
        prop_assert!(pair.converged());

        let mut sorted = rows.clone();
        sorted.sort_by(|a, b| a.sync_cmp(b));
        let expected = sorted.last().map(SyncCursor::at_row);
        prop_assert_eq!(pair.store.cursor(), expected);
    }

    #[test]
    fn local_edits_converge_after_two_passes(edits in local_edits_strategy(1, 20)) {
        let pair = TaskPair::tasks();
        for edit in &edits {
            if let Some(row) = edit.apply(pair.store.get(edit.id())) {
                pair.store.edit(row);
            }
            if edit.id().len() % 3 == 0 {
                pair.run(4).unwrap();
            }
        }

        pair.run(4).unwrap();
        let report = pair.run(4).unwrap();

        prop_assert!(report.is_clean());
        prop_assert!(pair.converged());
        let created = touched_ids(&edits)
            .into_iter()
            .filter(|id| pair.remote.get(id).is_some())
            .count();
        prop_assert_eq!(pair.remote.len(), created);
    }
}
