//! Multi-entity sync choreography.

use crate::error::SyncResult;
use crate::report::SyncReport;
use crate::runner::SyncRunner;
use crate::spec::SyncSpec;
use plansync_protocol::SyncRow;
use tracing::{info, warn};

/// A single entity type's sync, with its row and payload types erased.
pub trait EntitySync {
    /// Entity type name.
    fn entity(&self) -> &str;

    /// Runs one pass with `runner`.
    fn sync(&self, runner: &SyncRunner) -> SyncResult<SyncReport>;
}

impl<R, I, U> EntitySync for SyncSpec<R, I, U>
where
    R: SyncRow + Clone,
{
    fn entity(&self) -> &str {
        &self.entity
    }

    fn sync(&self, runner: &SyncRunner) -> SyncResult<SyncReport> {
        runner.run(self)
    }
}

/// An ordered list of entity syncs.
///
/// Entities run in insertion order, so parents must be added before their
/// children. With `stop_on_error` (the default) a failed pass skips every
/// entity after it.
pub struct SyncPlan<'a> {
    entries: Vec<&'a dyn EntitySync>,
    stop_on_error: bool,
}

impl<'a> SyncPlan<'a> {
    /// Creates an empty plan.
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
            stop_on_error: true,
        }
    }

    /// Appends an entity.
    pub fn then(mut self, entry: &'a dyn EntitySync) -> Self {
        self.entries.push(entry);
        self
    }

    /// Keeps going after a failed entity when `false`.
    pub fn stop_on_error(mut self, stop: bool) -> Self {
        self.stop_on_error = stop;
        self
    }

    /// Number of entities in the plan.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if the plan has no entities.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Runs every entity in order.
    pub fn run(&self, runner: &SyncRunner) -> PlanReport {
        let mut report = PlanReport::default();

        for (i, entry) in self.entries.iter().enumerate() {
            let outcome = entry.sync(runner);
            let failed = outcome.is_err();
            report.outcomes.push((entry.entity().to_owned(), outcome));

            if failed && self.stop_on_error {
                report.skipped = self.entries[i + 1..]
                    .iter()
                    .map(|e| e.entity().to_owned())
                    .collect();
                if !report.skipped.is_empty() {
                    warn!(
                        "Skipping {} after failed sync of {}",
                        report.skipped.join(", "),
                        entry.entity()
                    );
                }
                break;
            }
        }

        let totals = report.totals();
        info!(
            "Plan finished: {} entities, pulled {}, pushed {}, conflicts {}",
            report.outcomes.len(),
            totals.pulled,
            totals.pushed(),
            totals.conflicts
        );
        report
    }
}

impl Default for SyncPlan<'_> {
    fn default() -> Self {
        Self::new()
    }
}

/// Outcomes of a plan run, in execution order.
#[derive(Debug, Default)]
pub struct PlanReport {
    /// Entity name and pass result, for every entity that ran.
    pub outcomes: Vec<(String, SyncResult<SyncReport>)>,
    /// Entities not run because an earlier one failed.
    pub skipped: Vec<String>,
}

impl PlanReport {
    /// Returns true if every entity ran and succeeded.
    pub fn is_success(&self) -> bool {
        self.skipped.is_empty() && self.outcomes.iter().all(|(_, r)| r.is_ok())
    }

    /// Report for one entity, if it ran.
    pub fn get(&self, entity: &str) -> Option<&SyncResult<SyncReport>> {
        self.outcomes
            .iter()
            .find(|(name, _)| name == entity)
            .map(|(_, r)| r)
    }

    /// Sum of every successful entity report.
    pub fn totals(&self) -> SyncReport {
        let mut total = SyncReport::new("all");
        for report in self.outcomes.iter().filter_map(|(_, r)| r.as_ref().ok()) {
            total.absorb(report.clone());
        }
        total
    }
}
