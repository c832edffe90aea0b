//! Reference mapping store
//!
//! Holds every old -> new correspondence recorded during a run together
//! with the queue of deferred updates. The orchestrator is the only
//! writer; workers and cloners read immutable snapshots.

mod pending;
mod rewrite;
mod tables;

pub use pending::{PendingPatch, PendingQueue, PendingUpdate};
pub use rewrite::{AmbiguousMatch, Location, Rewrite, TextFinding, TextRewrite, UnresolvedRef};
pub use tables::{MappingEntry, MappingError, MappingKind, MappingSnapshot, MappingTables, Recorded};

use serde_json::Value;

use crate::domain::ItemId;

/// Mapping tables plus the pending-update registry
#[derive(Debug, Default)]
pub struct MappingStore {
    tables: MappingTables,
    pending: PendingQueue,
}

impl MappingStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records `old -> new`; see [`MappingTables::record`]
    pub fn record_mapping(
        &mut self,
        kind: MappingKind,
        old: &str,
        new: &str,
    ) -> Result<Recorded, MappingError> {
        self.tables.record(kind, old, new)
    }

    pub fn record_entry(&mut self, entry: &MappingEntry) -> Result<Recorded, MappingError> {
        self.tables.record_entry(entry)
    }

    pub fn resolve(&self, kind: MappingKind, old: &str) -> Option<String> {
        self.tables.resolve(kind, old)
    }

    pub fn rewrite_structured(&self, value: &Value) -> Rewrite<Value> {
        self.tables.rewrite_structured(value)
    }

    pub fn rewrite_text(&self, text: &str) -> TextRewrite {
        self.tables.rewrite_text(text)
    }

    /// Queues a patch against a created destination item
    pub fn register_pending(&mut self, owner: ItemId, source: ItemId, patch: PendingPatch) {
        self.pending.push(PendingUpdate {
            owner,
            source,
            patch,
            attempts: 0,
        });
    }

    /// Puts a drained update back for another pass
    pub fn requeue(&mut self, update: PendingUpdate) {
        self.pending.push(update);
    }

    pub fn drain_pending(&mut self) -> Vec<PendingUpdate> {
        self.pending.drain()
    }

    pub fn pending(&self) -> &PendingQueue {
        &self.pending
    }

    pub fn tables(&self) -> &MappingTables {
        &self.tables
    }

    /// Freezes the current tables for readers
    pub fn snapshot(&self) -> MappingSnapshot {
        MappingSnapshot::new(self.tables.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn id(n: u8) -> ItemId {
        format!("{:032x}", n).parse().unwrap()
    }

    #[test]
    fn chain_rewrite_after_recording() {
        let mut store = MappingStore::new();
        store
            .record_mapping(MappingKind::Identifier, id(1).as_str(), id(11).as_str())
            .unwrap();
        store
            .record_mapping(MappingKind::Identifier, id(2).as_str(), id(12).as_str())
            .unwrap();

        let def = json!({"values": {"webmap": id(2).to_string()}});
        let out = store.rewrite_structured(&def);
        assert_eq!(out.value, json!({"values": {"webmap": id(12).to_string()}}));
    }

    #[test]
    fn conflicting_record_is_refused() {
        let mut store = MappingStore::new();
        store.record_mapping(MappingKind::Group, "g", "h").unwrap();
        assert!(matches!(
            store.record_mapping(MappingKind::Group, "g", "i"),
            Err(MappingError::Conflict { .. })
        ));
        assert_eq!(store.resolve(MappingKind::Group, "g"), Some("h".into()));
    }

    #[test]
    fn pending_register_and_drain() {
        let mut store = MappingStore::new();
        store.register_pending(
            id(11),
            id(1),
            PendingPatch::Field {
                pointer: "/itemId".into(),
                kind: MappingKind::Identifier,
                old: id(2).to_string(),
            },
        );
        assert_eq!(store.pending().len(), 1);

        let mut drained = store.drain_pending();
        assert!(store.pending().is_empty());

        let mut update = drained.remove(0);
        update.attempts += 1;
        store.requeue(update);
        assert_eq!(store.drain_pending()[0].attempts, 1);
    }

    #[test]
    fn snapshot_freezes_tables() {
        let mut store = MappingStore::new();
        let before = store.snapshot();
        store.record_mapping(MappingKind::Identifier, "a", "b").unwrap();

        assert!(before.is_empty());
        assert_eq!(store.snapshot().resolve_id("a"), Some("b".into()));
    }
}
