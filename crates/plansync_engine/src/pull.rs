//! Pull phase: download remote pages in cursor order and apply them.

use crate::config::{PullTermination, SyncConfig};
use crate::error::{SyncError, SyncResult};
use crate::report::SyncReport;
use crate::runner::CancelToken;
use crate::spec::SyncSpec;
use plansync_protocol::{admits, SyncCursor, SyncRow};
use std::cmp::Ordering;
use tracing::debug;

/// Drains every remote row after the persisted cursor.
///
/// Each page is applied together with the cursor positioned at its last
/// row. Any failure stops the phase; pages already applied stay applied and
/// the next pass resumes after them.
pub(crate) fn pull_all<R, I, U>(
    spec: &SyncSpec<R, I, U>,
    config: &SyncConfig,
    cancel: &CancelToken,
    report: &mut SyncReport,
) -> SyncResult<()>
where
    R: SyncRow,
{
    let mut cursor = (spec.read_cursor)()?;

    loop {
        cancel.check()?;

        let page = (spec.fetch_since)(cursor.as_ref(), spec.page_size).map_err(|source| {
            SyncError::Pull {
                entity: spec.entity.clone(),
                source,
            }
        })?;

        let Some(last) = page.last() else {
            break;
        };

        check_page(spec, cursor.as_ref(), &page)?;
        let next = SyncCursor::at_row(last);

        (spec.apply_page)(&page, &next)?;
        report.pulled += page.len();

        debug!(
            "Pulled {} {} rows, cursor now {}",
            page.len(),
            spec.entity,
            next
        );

        let short = page.len() < spec.page_size;
        cursor = Some(next);

        if short && config.pull_termination == PullTermination::ShortPage {
            break;
        }
    }

    Ok(())
}

/// Rejects pages that are out of order or would not advance the cursor.
fn check_page<R, I, U>(
    spec: &SyncSpec<R, I, U>,
    cursor: Option<&SyncCursor>,
    page: &[R],
) -> SyncResult<()>
where
    R: SyncRow,
{
    if let Some(pair) = page
        .windows(2)
        .find(|pair| pair[0].sync_cmp(&pair[1]) != Ordering::Less)
    {
        return Err(SyncError::UnorderedPage {
            entity: spec.entity.clone(),
            id: pair[1].id().to_owned(),
        });
    }

    if let (Some(current), Some(first)) = (cursor, page.first()) {
        if !admits(Some(current), first) {
            return Err(SyncError::StalledCursor {
                entity: spec.entity.clone(),
                cursor: current.to_string(),
            });
        }
    }

    Ok(())
}
