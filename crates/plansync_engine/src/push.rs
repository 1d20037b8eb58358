//! Push phase: upload dirty rows as inserts or version-gated updates.
//!
//! A row is marked clean only after the remote returned it. Every other
//! outcome leaves it dirty for the next pass:
//!
//! | Outcome | Report |
//! |---|---|
//! | remote row returned | `inserted` / `updated` |
//! | no row from an update, or conflict error | `conflicts`, conflict log |
//! | missing error | `missing` |
//! | rate-limited or transient error | `deferred` |
//! | any other error | `failures` |

use crate::config::SyncConfig;
use crate::error::{ErrorClass, RemoteError, SyncResult};
use crate::report::{PushFailure, SyncReport};
use crate::runner::CancelToken;
use crate::spec::SyncSpec;
use plansync_protocol::{ConflictRecord, InsertRequest, PushOperation, SyncRow, UpdateRequest};
use std::collections::HashMap;
use tracing::{debug, warn};

pub(crate) fn push_all<R, I, U>(
    spec: &SyncSpec<R, I, U>,
    config: &SyncConfig,
    cancel: &CancelToken,
    report: &mut SyncReport,
) -> SyncResult<()>
where
    R: SyncRow + Clone,
{
    let dirty = (spec.read_dirty)()?;
    if dirty.is_empty() {
        return Ok(());
    }

    let (inserts, updates): (Vec<R>, Vec<R>) =
        dirty.into_iter().partition(|row| (spec.is_insert)(row));

    debug!(
        "Pushing {} {} rows ({} inserts, {} updates)",
        inserts.len() + updates.len(),
        spec.entity,
        inserts.len(),
        updates.len()
    );

    let mut push = Push {
        spec,
        cancel,
        report,
    };

    for chunk in inserts.chunks(config.push_batch_size.max(1)) {
        push.insert_chunk(chunk, config.fallback_on_bulk_failure)?;
    }

    for row in &updates {
        push.update_row(row)?;
    }

    Ok(())
}

/// Borrowed state of one push phase.
struct Push<'a, R, I, U> {
    spec: &'a SyncSpec<R, I, U>,
    cancel: &'a CancelToken,
    report: &'a mut SyncReport,
}

impl<R, I, U> Push<'_, R, I, U>
where
    R: SyncRow + Clone,
{
    fn insert_request(&self, row: &R) -> InsertRequest<I> {
        InsertRequest {
            id: row.id().to_owned(),
            idempotency_key: (self.spec.idempotency_key)(row),
            payload: (self.spec.make_insert_payload)(row),
        }
    }

    fn insert_chunk(&mut self, chunk: &[R], fallback: bool) -> SyncResult<()> {
        self.cancel.check()?;

        let requests: Vec<InsertRequest<I>> =
            chunk.iter().map(|row| self.insert_request(row)).collect();

        let bulk_error = match (self.spec.insert_returning)(&requests) {
            Ok(created) => return self.accept_inserts(chunk, created),
            Err(err) => err,
        };

        if !fallback {
            warn!(
                "Bulk insert of {} {} rows failed, leaving them dirty: {}",
                chunk.len(),
                self.spec.entity,
                bulk_error
            );
            for row in chunk {
                self.settle_without_fallback(row, &bulk_error);
            }
            return Ok(());
        }

        debug!(
            "Bulk insert of {} {} rows failed ({}), retrying one by one",
            chunk.len(),
            self.spec.entity,
            bulk_error
        );

        for (row, request) in chunk.iter().zip(requests) {
            self.cancel.check()?;
            match (self.spec.insert_returning)(std::slice::from_ref(&request)) {
                Ok(created) => self.accept_inserts(std::slice::from_ref(row), created)?,
                Err(err) => self.reject(PushOperation::Insert, row, err)?,
            }
        }

        Ok(())
    }

    /// Marks clean the rows the remote returned; rows it left out stay dirty.
    fn accept_inserts(&mut self, sent: &[R], created: Vec<R>) -> SyncResult<()> {
        let mut by_id: HashMap<String, R> = created
            .into_iter()
            .map(|row| (row.id().to_owned(), row))
            .collect();

        let mut accepted = Vec::with_capacity(sent.len());
        for row in sent {
            match by_id.remove(row.id()) {
                Some(stored) => accepted.push(stored),
                None => {
                    warn!(
                        "Insert of {} row {} returned no row, leaving it dirty",
                        self.spec.entity,
                        row.id()
                    );
                    self.report.deferred.push(row.id().to_owned());
                }
            }
        }

        if !accepted.is_empty() {
            (self.spec.mark_clean)(&accepted)?;
            self.report.inserted += accepted.len();
        }
        Ok(())
    }

    fn update_row(&mut self, row: &R) -> SyncResult<()> {
        self.cancel.check()?;

        let Some(expected_version) = row.version() else {
            let err = RemoteError::permanent("update of a row without a remote version");
            return self.reject(PushOperation::Update, row, err);
        };

        let request = UpdateRequest {
            id: row.id().to_owned(),
            expected_version,
            idempotency_key: (self.spec.idempotency_key)(row),
            payload: (self.spec.make_update_payload)(row),
        };

        match (self.spec.update_if_version_matches)(&request) {
            Ok(Some(stored)) => {
                (self.spec.mark_clean)(std::slice::from_ref(&stored))?;
                self.report.updated += 1;
                Ok(())
            }
            Ok(None) => self.record_conflict(PushOperation::Update, row),
            Err(err) => self.reject(PushOperation::Update, row, err),
        }
    }

    /// Routes a failed push of one row by error class.
    fn reject(&mut self, operation: PushOperation, row: &R, err: RemoteError) -> SyncResult<()> {
        let id = row.id().to_owned();
        match err.class() {
            ErrorClass::Conflict => return self.record_conflict(operation, row),
            ErrorClass::Missing => {
                warn!(
                    "{} of {} row {} found no remote row: {}",
                    operation.as_str(),
                    self.spec.entity,
                    id,
                    err
                );
                self.report.missing.push(id);
            }
            ErrorClass::RateLimited | ErrorClass::Transient => {
                debug!(
                    "{} of {} row {} deferred: {}",
                    operation.as_str(),
                    self.spec.entity,
                    id,
                    err
                );
                self.report.note_retry_after(err.retry_after());
                self.report.deferred.push(id);
            }
            ErrorClass::Permanent => {
                warn!(
                    "{} of {} row {} rejected: {}",
                    operation.as_str(),
                    self.spec.entity,
                    id,
                    err
                );
                self.report.failures.push(PushFailure {
                    id,
                    operation,
                    error: err,
                });
            }
        }
        Ok(())
    }

    /// Without per-row fallback the bulk error cannot be attributed to a
    /// single row, so only permanent errors count as failures.
    fn settle_without_fallback(&mut self, row: &R, err: &RemoteError) {
        let id = row.id().to_owned();
        if err.class() == ErrorClass::Permanent {
            self.report.failures.push(PushFailure {
                id,
                operation: PushOperation::Insert,
                error: err.clone(),
            });
        } else {
            self.report.note_retry_after(err.retry_after());
            self.report.deferred.push(id);
        }
    }

    fn record_conflict(&mut self, operation: PushOperation, row: &R) -> SyncResult<()> {
        let remote = match (self.spec.fetch_one)(row.id()) {
            Ok(remote) => remote,
            Err(err) => {
                warn!(
                    "Could not fetch remote {} row {} for conflict log: {}",
                    self.spec.entity,
                    row.id(),
                    err
                );
                None
            }
        };

        debug!(
            "{} of {} row {} conflicts with remote",
            operation.as_str(),
            self.spec.entity,
            row.id()
        );

        let record = ConflictRecord::new(operation, row.clone(), remote);
        (self.spec.record_conflicts)(std::slice::from_ref(&record))?;
        self.report.conflicts += 1;
        Ok(())
    }
}
