//! Property-based test generators using proptest.
//!
//! Timestamps are drawn from a small range on purpose so that generated
//! rows collide on `updated_at` often.

use crate::fixtures::{synced_task, task};
use plansync_protocol::entities::Task;
use proptest::prelude::*;
use std::collections::BTreeSet;

/// Strategy for row ids.
pub fn id_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[a-z]{1,3}-[0-9]{1,2}").expect("Invalid regex")
}

/// Strategy for timestamp offsets, in microseconds, with frequent ties.
pub fn micros_strategy() -> impl Strategy<Value = i64> {
    0i64..8
}

/// Strategy for remote tasks with distinct ids.
pub fn remote_tasks_strategy(max_rows: usize) -> impl Strategy<Value = Vec<Task>> {
    prop::collection::btree_map(id_strategy(), (micros_strategy(), 1i64..5), 0..=max_rows)
        .prop_map(|rows| {
            rows.into_iter()
                .map(|(id, (micros, version))| synced_task(&id, micros, version))
                .collect()
        })
}

/// Strategy for page sizes.
pub fn page_size_strategy() -> impl Strategy<Value = usize> {
    1usize..7
}

/// A local change made between passes.
#[derive(Debug, Clone)]
pub enum LocalEdit {
    /// Create a new task.
    Create {
        /// Task id.
        id: String,
    },
    /// Retitle a task, if it exists.
    Retitle {
        /// Task id.
        id: String,
        /// New title.
        title: String,
    },
    /// Soft-delete a task, if it exists.
    Delete {
        /// Task id.
        id: String,
    },
}

impl LocalEdit {
    /// Target row id.
    pub fn id(&self) -> &str {
        match self {
            LocalEdit::Create { id } | LocalEdit::Retitle { id, .. } | LocalEdit::Delete { id } => {
                id
            }
        }
    }

    /// Builds the edited row from the current local row.
    ///
    /// Returns `None` for an edit of a row that does not exist.
    pub fn apply(&self, current: Option<Task>) -> Option<Task> {
        match (self, current) {
            (LocalEdit::Create { id }, None) => Some(task(id)),
            (LocalEdit::Create { .. }, Some(_)) => None,
            (LocalEdit::Retitle { title, .. }, Some(mut row)) => {
                row.title = title.clone();
                Some(row)
            }
            (LocalEdit::Delete { .. }, Some(mut row)) => {
                row.deleted_at = Some(plansync_protocol::RawTimestamp::now());
                Some(row)
            }
            (_, None) => None,
        }
    }
}

/// Strategy for a single local edit.
pub fn local_edit_strategy() -> impl Strategy<Value = LocalEdit> {
    prop_oneof![
        3 => id_strategy().prop_map(|id| LocalEdit::Create { id }),
        2 => (id_strategy(), "[a-z ]{1,12}")
            .prop_map(|(id, title)| LocalEdit::Retitle { id, title }),
        1 => id_strategy().prop_map(|id| LocalEdit::Delete { id }),
    ]
}

/// Strategy for a sequence of local edits.
pub fn local_edits_strategy(
    min_edits: usize,
    max_edits: usize,
) -> impl Strategy<Value = Vec<LocalEdit>> {
    prop::collection::vec(local_edit_strategy(), min_edits..max_edits)
}

/// Distinct ids touched by `edits`.
pub fn touched_ids(edits: &[LocalEdit]) -> BTreeSet<String> {
    edits.iter().map(|e| e.id().to_owned()).collect()
}

/// Configuration for property tests.
#[derive(Debug, Clone)]
pub struct PropTestConfig {
    /// Number of test cases to run.
    pub cases: u32,
    /// Maximum shrink iterations.
    pub max_shrink_iters: u32,
}

impl Default for PropTestConfig {
    fn default() -> Self {
        Self {
            cases: 256,
            max_shrink_iters: 1000,
        }
    }
}

impl PropTestConfig {
    /// Creates a configuration for quick tests.
    #[must_use]
    pub fn quick() -> Self {
        Self {
            cases: 32,
            max_shrink_iters: 100,
        }
    }

    /// Creates a configuration for thorough tests.
    #[must_use]
    pub fn thorough() -> Self {
        Self {
            cases: 1024,
            max_shrink_iters: 10000,
        }
    }

    /// Converts to proptest config.
    #[must_use]
    pub fn to_proptest_config(&self) -> ProptestConfig {
        ProptestConfig {
            cases: self.cases,
            max_shrink_iters: self.max_shrink_iters,
            ..ProptestConfig::default()
        }
    }
}
