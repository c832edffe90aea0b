//! Run report
//!
//! Everything a run did and every warning-class condition it met, in a
//! serializable form. The report is returned on success, attached to
//! [`super::RunError::Aborted`] on failure, and saved as `report.json`.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;

use super::discovery::{ExtractionFailure, UnresolvedDependency};
use crate::domain::{ItemId, ItemKind, ItemState, MigrationLevel};
use crate::mapping::{Location, PendingPatch};
use crate::storage::FailurePolicy;

/// Final state of one item
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ItemOutcome {
    pub kind: ItemKind,
    pub title: String,
    pub state: ItemState,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub new_id: Option<ItemId>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub new_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CloneFailure {
    pub item: ItemId,
    pub reason: String,
}

/// An item skipped because something it depends on failed
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BlockedItem {
    pub item: ItemId,
    pub failed_dependency: ItemId,
}

/// A mapped identifier left alone inside a longer token
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AmbiguousReference {
    pub item: ItemId,
    pub id: String,
    pub token: String,
    pub location: Location,
}

/// A deferred update that gave up after repeated failures
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UpdateFailure {
    pub item: ItemId,
    pub owner: ItemId,
    pub attempts: u32,
    pub reason: String,
}

/// A reference still unrewritten when the run finished
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UnresolvedReference {
    pub item: ItemId,
    pub owner: ItemId,
    pub patch: PendingPatch,
}

/// A created item that could not be removed during rollback
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RollbackFailure {
    pub item: ItemId,
    pub new_id: ItemId,
    pub reason: String,
}

/// Outcome of one migration run
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub run_id: String,
    pub started_at: DateTime<Utc>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,

    pub failure_policy: FailurePolicy,
    pub levels: Vec<MigrationLevel>,
    pub cycles: Vec<Vec<ItemId>>,
    pub items: BTreeMap<ItemId, ItemOutcome>,

    pub extraction_failures: Vec<ExtractionFailure>,
    pub unresolved_dependencies: Vec<UnresolvedDependency>,
    pub ambiguous: Vec<AmbiguousReference>,
    pub clone_failures: Vec<CloneFailure>,
    pub blocked: Vec<BlockedItem>,
    pub update_failures: Vec<UpdateFailure>,
    pub unresolved_references: Vec<UnresolvedReference>,

    /// Created items deleted during rollback, in deletion order
    pub rolled_back: Vec<ItemId>,
    pub rollback_failures: Vec<RollbackFailure>,

    pub aborted: bool,
}

impl RunReport {
    pub fn new(run_id: impl Into<String>, started_at: DateTime<Utc>, policy: FailurePolicy) -> Self {
        Self {
            run_id: run_id.into(),
            started_at,
            finished_at: None,
            failure_policy: policy,
            levels: Vec::new(),
            cycles: Vec::new(),
            items: BTreeMap::new(),
            extraction_failures: Vec::new(),
            unresolved_dependencies: Vec::new(),
            ambiguous: Vec::new(),
            clone_failures: Vec::new(),
            blocked: Vec::new(),
            update_failures: Vec::new(),
            unresolved_references: Vec::new(),
            rolled_back: Vec::new(),
            rollback_failures: Vec::new(),
            aborted: false,
        }
    }

    /// Flat old id -> new id table of every created item
    pub fn id_mapping(&self) -> BTreeMap<String, String> {
        self.items
            .iter()
            .filter_map(|(id, outcome)| {
                outcome
                    .new_id
                    .as_ref()
                    .map(|new| (id.to_string(), new.to_string()))
            })
            .collect()
    }

    pub fn state_of(&self, id: &ItemId) -> Option<ItemState> {
        self.items.get(id).map(|outcome| outcome.state)
    }

    /// Number of items in `state`
    pub fn count(&self, state: ItemState) -> usize {
        self.items.values().filter(|o| o.state == state).count()
    }

    /// Number of warning-class conditions recorded
    pub fn warning_count(&self) -> usize {
        self.extraction_failures.len()
            + self.unresolved_dependencies.len()
            + self.ambiguous.len()
            + self.update_failures.len()
            + self.unresolved_references.len()
    }

    /// True if every item was finalized with nothing left unresolved
    pub fn is_clean(&self) -> bool {
        !self.aborted
            && self.warning_count() == 0
            && self.clone_failures.is_empty()
            && self.items.values().all(|o| o.state == ItemState::Finalized)
    }
}
