//! Inspect command implementation.

use crate::error::CliError;
use crate::scenario::{SavedState, StoreSummary};
use crate::OutputFormat;
use serde::Serialize;
use std::path::Path;

/// Saved state inspection result.
#[derive(Debug, Serialize)]
pub struct InspectResult {
    /// State file path.
    pub path: String,
    /// CLI version that wrote the file.
    pub written_by: String,
    /// One summary per entity type, in sync order.
    pub stores: Vec<StoreSummary>,
    /// Conflict log entries, if requested.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub conflicts: Option<Vec<ConflictLine>>,
}

/// One conflict log entry, flattened for display.
#[derive(Debug, Serialize)]
pub struct ConflictLine {
    /// Entity type.
    pub entity: String,
    /// Row id.
    pub id: String,
    /// Push path that conflicted.
    pub operation: String,
    /// Version the client expected.
    pub local_version: Option<i64>,
    /// Version the remote held, if the row still existed.
    pub remote_version: Option<i64>,
    /// When it was detected.
    pub detected_at: String,
}

/// Runs the inspect command.
pub fn run(path: &Path, show_conflicts: bool, format: OutputFormat) -> Result<(), CliError> {
    let result = inspect(path, show_conflicts)?;

    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
        OutputFormat::Text => print_text_output(&result),
    }

    Ok(())
}

/// Loads and summarizes a saved state.
pub fn inspect(path: &Path, show_conflicts: bool) -> Result<InspectResult, CliError> {
    let state = SavedState::load(path)?;

    let stores = vec![
        StoreSummary::of(&state.events),
        StoreSummary::of(&state.recurrence_rules),
        StoreSummary::of(&state.overrides),
        StoreSummary::of(&state.tasks),
    ];

    let conflicts = show_conflicts.then(|| {
        let mut lines = Vec::new();
        collect_conflicts(&state.events, &mut lines);
        collect_conflicts(&state.recurrence_rules, &mut lines);
        collect_conflicts(&state.overrides, &mut lines);
        collect_conflicts(&state.tasks, &mut lines);
        lines
    });

    Ok(InspectResult {
        path: path.display().to_string(),
        written_by: state.written_by,
        stores,
        conflicts,
    })
}

fn collect_conflicts<R: plansync_protocol::SyncRow>(
    snapshot: &plansync_engine::memory::StoreSnapshot<R>,
    out: &mut Vec<ConflictLine>,
) {
    out.extend(snapshot.conflicts.iter().map(|c| ConflictLine {
        entity: snapshot.entity.clone(),
        id: c.id().to_owned(),
        operation: c.operation.as_str().to_owned(),
        local_version: c.local.version(),
        remote_version: c.remote.as_ref().and_then(|r| r.version()),
        detected_at: c.detected_at.to_rfc3339(),
    }));
}

fn print_text_output(result: &InspectResult) {
    println!("=== plansync state: {} ===", result.path);
    println!("Written by: v{}", result.written_by);
    println!();
    println!(
        "{:<18} {:>6} {:>6} {:>6} {:>9} {:>6}  cursor",
        "entity", "rows", "tombs", "dirty", "conflicts", "pages"
    );
    for store in &result.stores {
        println!(
            "{:<18} {:>6} {:>6} {:>6} {:>9} {:>6}  {}",
            store.entity,
            store.rows,
            store.tombstones,
            store.dirty,
            store.conflicts,
            store.pages_applied,
            store.cursor.as_deref().unwrap_or("-")
        );
    }

    if let Some(conflicts) = &result.conflicts {
        println!();
        println!("=== Conflicts ===");
        if conflicts.is_empty() {
            println!("(none)");
        }
        for c in conflicts {
            let remote = c
                .remote_version
                .map_or_else(|| "gone".to_string(), |v| format!("v{v}"));
            println!(
                "{} {} {}: local v{} vs remote {} at {}",
                c.entity,
                c.id,
                c.operation,
                c.local_version.unwrap_or(0),
                remote,
                c.detected_at
            );
        }
    }
}
