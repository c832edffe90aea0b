//! Deferred reference updates
//!
//! A pending update records a reference that could not be rewritten when
//! its owner was created. Updates are queued in FIFO order and drained in
//! the resolution pass; the queue serializes so it can be persisted
//! between passes.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};

use super::rewrite::{Location, UnresolvedRef};
use super::tables::{MappingKind, MappingTables};
use crate::domain::ItemId;

/// What to patch once the missing mapping exists
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "patch", rename_all = "snake_case")]
pub enum PendingPatch {
    /// Replace the whole string at `pointer` with the mapped value
    Field {
        pointer: String,
        kind: MappingKind,
        old: String,
    },

    /// Rewrite the text at `location` again once every token maps
    Text {
        location: Location,
        tokens: Vec<(MappingKind, String)>,
    },
}

impl PendingPatch {
    /// Groups unresolved references into patches
    ///
    /// Field references become one patch each; text references sharing a
    /// location collapse into one patch listing every outstanding token.
    pub fn from_unresolved(refs: impl IntoIterator<Item = UnresolvedRef>) -> Vec<PendingPatch> {
        let mut patches = Vec::new();
        let mut text: BTreeMap<Location, Vec<(MappingKind, String)>> = BTreeMap::new();

        for r in refs {
            match r.location {
                Location::Field(pointer) => patches.push(PendingPatch::Field {
                    pointer,
                    kind: r.kind,
                    old: r.value,
                }),
                location => {
                    let tokens = text.entry(location).or_default();
                    let token = (r.kind, r.value);
                    if !tokens.contains(&token) {
                        tokens.push(token);
                    }
                }
            }
        }

        patches.extend(
            text.into_iter()
                .map(|(location, tokens)| PendingPatch::Text { location, tokens }),
        );
        patches
    }

    /// Returns true if every value this patch needs is now mapped
    pub fn is_ready(&self, tables: &MappingTables) -> bool {
        match self {
            PendingPatch::Field { kind, old, .. } => tables.resolve(*kind, old).is_some(),
            PendingPatch::Text { tokens, .. } => tokens
                .iter()
                .all(|(kind, value)| tables.resolve(*kind, value).is_some()),
        }
    }

    /// Old values this patch is waiting on
    pub fn outstanding(&self) -> Vec<(MappingKind, &str)> {
        match self {
            PendingPatch::Field { kind, old, .. } => vec![(*kind, old.as_str())],
            PendingPatch::Text { tokens, .. } => {
                tokens.iter().map(|(k, v)| (*k, v.as_str())).collect()
            }
        }
    }

    /// Where in the owner the patch applies
    pub fn location(&self) -> Location {
        match self {
            PendingPatch::Field { pointer, .. } => Location::Field(pointer.clone()),
            PendingPatch::Text { location, .. } => location.clone(),
        }
    }
}

/// A patch attached to a created destination item
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingUpdate {
    /// Destination item the patch applies to
    pub owner: ItemId,

    /// Source item the owner was cloned from
    pub source: ItemId,

    pub patch: PendingPatch,

    /// Failed application attempts so far
    #[serde(default)]
    pub attempts: u32,
}

/// FIFO queue of pending updates
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PendingQueue {
    queue: VecDeque<PendingUpdate>,
}

impl PendingQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, update: PendingUpdate) {
        self.queue.push_back(update);
    }

    /// Removes and returns every queued update in arrival order
    pub fn drain(&mut self) -> Vec<PendingUpdate> {
        self.queue.drain(..).collect()
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &PendingUpdate> {
        self.queue.iter()
    }
}
