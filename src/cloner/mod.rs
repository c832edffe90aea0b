//! # Cloner Strategies
//!
//! A cloner knows how to read and recreate one or more kinds of item. The
//! orchestrator drives cloners through the [`Cloner`] trait and never looks
//! at how an item is actually created.
//!
//! ## Contract
//!
//! | Call | Returns | Fails with |
//! |------|---------|------------|
//! | `extract_definition` | raw definition | [`ClonerError::Extraction`] |
//! | `clone_item` | new id, new URL, extra mappings | [`ClonerError::Clone`] |
//! | `update_references` | whether the patch landed | [`ClonerError::Update`] |
//! | `delete_item` | - | [`ClonerError::Delete`] |
//!
//! An `Extraction` failure during a run is a warning: the orchestrator clones
//! the item from the definition it was discovered with.
//!
//! `update_references` must be idempotent: calling it twice with the same
//! snapshot must not apply a rewrite twice. Retries are the cloner's job;
//! [`RetryPolicy`] is the shared helper for that.

mod directory;
mod retry;

pub use directory::DirectoryCloner;
pub use retry::RetryPolicy;

use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

use crate::domain::{ContentItem, ItemId, ItemKind};
use crate::mapping::{MappingEntry, MappingSnapshot};

#[derive(Debug, Error)]
pub enum ClonerError {
    #[error("Failed to read {item}: {reason}")]
    Extraction { item: ItemId, reason: String },

    #[error("Failed to clone {item}: {reason}")]
    Clone { item: ItemId, reason: String },

    #[error("Failed to update references in {item}: {reason}")]
    Update { item: ItemId, reason: String },

    #[error("Failed to delete {item}: {reason}")]
    Delete { item: ItemId, reason: String },

    #[error("No cloner registered for kind '{0}'")]
    NoCloner(ItemKind),
}

/// Where and for whom items are created
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DestinationContext {
    pub account: String,
    pub folder: Option<String>,
    pub hostname: Option<String>,
    pub run_id: String,
}

/// What a successful clone produced
#[derive(Debug, Clone, PartialEq)]
pub struct ClonedItem {
    pub new_id: ItemId,

    pub new_url: Option<String>,

    /// Additional correspondences discovered while cloning (layers, groups, domains)
    pub mappings: Vec<MappingEntry>,
}

impl ClonedItem {
    pub fn new(new_id: ItemId) -> Self {
        Self {
            new_id,
            new_url: None,
            mappings: Vec::new(),
        }
    }
}

/// Result of a reference update
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UpdateOutcome {
    /// True once the destination item reflects the snapshot
    pub applied: bool,

    pub mappings: Vec<MappingEntry>,
}

impl UpdateOutcome {
    pub fn applied() -> Self {
        Self {
            applied: true,
            mappings: Vec::new(),
        }
    }

    pub fn not_applied() -> Self {
        Self::default()
    }
}

/// Per-kind item creation strategy
pub trait Cloner: Send + Sync {
    /// Short name used in logs
    fn name(&self) -> &str;

    /// Reads the raw definition of a source item
    fn extract_definition(&self, item: &ItemId) -> Result<Value, ClonerError>;

    /// Creates the destination counterpart of `item` from its rewritten definition
    fn clone_item(
        &self,
        item: &ContentItem,
        definition: Value,
        destination: &DestinationContext,
        mappings: &MappingSnapshot,
    ) -> Result<ClonedItem, ClonerError>;

    /// Re-applies the mapping tables to an already created item
    fn update_references(
        &self,
        new_id: &ItemId,
        mappings: &MappingSnapshot,
    ) -> Result<UpdateOutcome, ClonerError>;

    /// Removes a created item during rollback
    fn delete_item(&self, new_id: &ItemId) -> Result<(), ClonerError> {
        let _ = new_id;
        Ok(())
    }
}

/// Cloners by item kind, with an optional fallback
#[derive(Clone, Default)]
pub struct ClonerRegistry {
    by_kind: HashMap<ItemKind, Arc<dyn Cloner>>,
    fallback: Option<Arc<dyn Cloner>>,
}

impl ClonerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry that sends every kind to one cloner
    pub fn single(cloner: Arc<dyn Cloner>) -> Self {
        Self {
            by_kind: HashMap::new(),
            fallback: Some(cloner),
        }
    }

    pub fn register(&mut self, kind: ItemKind, cloner: Arc<dyn Cloner>) {
        self.by_kind.insert(kind, cloner);
    }

    pub fn set_fallback(&mut self, cloner: Arc<dyn Cloner>) {
        self.fallback = Some(cloner);
    }

    /// Returns the cloner responsible for `kind`
    pub fn for_kind(&self, kind: ItemKind) -> Result<&Arc<dyn Cloner>, ClonerError> {
        self.by_kind
            .get(&kind)
            .or(self.fallback.as_ref())
            .ok_or(ClonerError::NoCloner(kind))
    }
}

impl std::fmt::Debug for ClonerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut kinds: Vec<_> = self.by_kind.keys().collect();
        kinds.sort();
        f.debug_struct("ClonerRegistry")
            .field("kinds", &kinds)
            .field("fallback", &self.fallback.as_ref().map(|c| c.name().to_string()))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Named(&'static str);

    impl Cloner for Named {
        fn name(&self) -> &str {
            self.0
        }

        fn extract_definition(&self, _item: &ItemId) -> Result<Value, ClonerError> {
            Ok(Value::Null)
        }

        fn clone_item(
            &self,
            item: &ContentItem,
            _definition: Value,
            _destination: &DestinationContext,
            _mappings: &MappingSnapshot,
        ) -> Result<ClonedItem, ClonerError> {
            Ok(ClonedItem::new(item.id.clone()))
        }

        fn update_references(
            &self,
            _new_id: &ItemId,
            _mappings: &MappingSnapshot,
        ) -> Result<UpdateOutcome, ClonerError> {
            Ok(UpdateOutcome::applied())
        }
    }

    #[test]
    fn registry_prefers_kind_over_fallback() {
        let mut registry = ClonerRegistry::single(Arc::new(Named("generic")));
        registry.register(ItemKind::HubSite, Arc::new(Named("sites")));

        assert_eq!(registry.for_kind(ItemKind::HubSite).unwrap().name(), "sites");
        assert_eq!(registry.for_kind(ItemKind::WebMap).unwrap().name(), "generic");
    }

    #[test]
    fn registry_without_fallback_reports_kind() {
        let mut registry = ClonerRegistry::new();
        registry.register(ItemKind::WebMap, Arc::new(Named("maps")));

        let err = registry.for_kind(ItemKind::Dashboard).err().expect("expected NoCloner error");
        assert!(matches!(err, ClonerError::NoCloner(ItemKind::Dashboard)));
        assert_eq!(err.to_string(), "No cloner registered for kind 'Dashboard'");
    }

    #[test]
    fn default_delete_is_a_no_op() {
        let id: ItemId = "0123456789abcdef0123456789abcdef".parse().unwrap();
        assert!(Named("x").delete_item(&id).is_ok());
    }
}
