//! Simulate command implementation.

use crate::error::CliError;
use crate::scenario::{SavedState, Scenario};
use crate::OutputFormat;
use plansync_engine::memory::memory_spec;
use plansync_engine::{
    EntitySync, PlanReport, PullTermination, SyncConfig, SyncPlan, SyncReport, SyncRunner,
};
use plansync_protocol::EntityKind;
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;
use tracing::info;

/// Options of the simulate command.
#[derive(Debug, Clone)]
pub struct SimulateOptions {
    /// Rows per pulled page.
    pub page_size: usize,
    /// Rows per bulk insert.
    pub batch_size: usize,
    /// Stop pulling after a short page.
    pub short_page: bool,
    /// Disable per-row insert fallback.
    pub no_fallback: bool,
    /// Number of plan runs.
    pub passes: usize,
    /// Keep going after a failed entity.
    pub keep_going: bool,
}

impl Default for SimulateOptions {
    fn default() -> Self {
        Self {
            page_size: 100,
            batch_size: 100,
            short_page: false,
            no_fallback: false,
            passes: 1,
            keep_going: false,
        }
    }
}

/// Result of one entity in one pass.
#[derive(Debug, Serialize)]
pub struct EntityOutcome {
    /// Entity type.
    pub entity: String,
    /// Report, if the pass succeeded.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub report: Option<SyncReport>,
    /// Error, if the pass failed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Result of one plan run.
#[derive(Debug, Serialize)]
pub struct PassOutcome {
    /// 1-based pass number.
    pub pass: usize,
    /// Entities in the order they ran.
    pub entities: Vec<EntityOutcome>,
    /// Entities skipped after a failure.
    pub skipped: Vec<String>,
}

impl PassOutcome {
    fn from_plan(pass: usize, report: PlanReport) -> Self {
        Self {
            pass,
            entities: report
                .outcomes
                .into_iter()
                .map(|(entity, result)| match result {
                    Ok(report) => EntityOutcome {
                        entity,
                        report: Some(report),
                        error: None,
                    },
                    Err(e) => EntityOutcome {
                        entity,
                        report: None,
                        error: Some(e.to_string()),
                    },
                })
                .collect(),
            skipped: report.skipped,
        }
    }
}

/// Everything a simulation produced.
#[derive(Debug)]
pub struct Simulation {
    /// One entry per pass.
    pub passes: Vec<PassOutcome>,
    /// Local stores at the end.
    pub state: SavedState,
}

/// Runs the simulate command.
pub fn run(
    scenario_path: &Path,
    options: &SimulateOptions,
    format: OutputFormat,
    save_state: Option<&Path>,
) -> Result<(), CliError> {
    let scenario = Scenario::load(scenario_path)?;
    let simulation = simulate(&scenario, options)?;

    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&simulation.passes)?);
        }
        OutputFormat::Text => print_text_output(&simulation.passes),
    }

    if let Some(path) = save_state {
        simulation.state.save(path)?;
        info!("Saved local state to {}", path.display());
    }

    Ok(())
}

/// Runs a scenario against in-memory collaborators.
pub fn simulate(scenario: &Scenario, options: &SimulateOptions) -> Result<Simulation, CliError> {
    if options.page_size == 0 {
        return Err(CliError::Argument("page size must be positive".into()));
    }

    let mut config = SyncConfig::new()
        .with_push_batch_size(options.batch_size)
        .with_bulk_fallback(!options.no_fallback);
    if options.short_page {
        config = config.with_pull_termination(PullTermination::ShortPage);
    }
    let runner = SyncRunner::new(config);

    let (event_store, event_remote) = scenario.events.build(EntityKind::Events.as_str());
    let (rule_store, rule_remote) = scenario
        .recurrence_rules
        .build(EntityKind::RecurrenceRules.as_str());
    let (override_store, override_remote) =
        scenario.overrides.build(EntityKind::Overrides.as_str());
    let (task_store, task_remote) = scenario.tasks.build(EntityKind::Tasks.as_str());

    let events = memory_spec(
        EntityKind::Events.as_str(),
        options.page_size,
        Arc::clone(&event_store),
        event_remote,
    );
    let rules = memory_spec(
        EntityKind::RecurrenceRules.as_str(),
        options.page_size,
        Arc::clone(&rule_store),
        rule_remote,
    );
    let overrides = memory_spec(
        EntityKind::Overrides.as_str(),
        options.page_size,
        Arc::clone(&override_store),
        override_remote,
    );
    let tasks = memory_spec(
        EntityKind::Tasks.as_str(),
        options.page_size,
        Arc::clone(&task_store),
        task_remote,
    );

    let mut plan = SyncPlan::new().stop_on_error(!options.keep_going);
    for kind in EntityKind::sync_order() {
        let entry: &dyn EntitySync = match kind {
            EntityKind::Events => &events,
            EntityKind::RecurrenceRules => &rules,
            EntityKind::Overrides => &overrides,
            EntityKind::Tasks => &tasks,
        };
        plan = plan.then(entry);
    }

    let passes = (1..=options.passes.max(1))
        .map(|pass| PassOutcome::from_plan(pass, plan.run(&runner)))
        .collect();

    let state = SavedState {
        written_by: env!("CARGO_PKG_VERSION").to_owned(),
        events: event_store.snapshot(),
        recurrence_rules: rule_store.snapshot(),
        overrides: override_store.snapshot(),
        tasks: task_store.snapshot(),
    };

    Ok(Simulation { passes, state })
}

fn print_text_output(passes: &[PassOutcome]) {
    for pass in passes {
        println!("=== Pass {} ===", pass.pass);
        for outcome in &pass.entities {
            match (&outcome.report, &outcome.error) {
                (Some(report), _) => {
                    println!(
                        "{:<18} pulled {:>4}  inserted {:>4}  updated {:>4}  conflicts {:>3}",
                        outcome.entity,
                        report.pulled,
                        report.inserted,
                        report.updated,
                        report.conflicts
                    );
                    if !report.missing.is_empty() {
                        println!("  missing: {}", report.missing.join(", "));
                    }
                    if !report.deferred.is_empty() {
                        println!("  deferred: {}", report.deferred.join(", "));
                    }
                    for failure in &report.failures {
                        println!(
                            "  failed {} {}: {}",
                            failure.operation.as_str(),
                            failure.id,
                            failure.error
                        );
                    }
                    if let Some(after) = report.retry_after {
                        println!("  retry after {:?}", after);
                    }
                }
                (None, Some(error)) => println!("{:<18} FAILED: {}", outcome.entity, error),
                (None, None) => println!("{:<18} no result", outcome.entity),
            }
        }
        if !pass.skipped.is_empty() {
            println!("skipped: {}", pass.skipped.join(", "));
        }
    }
}
