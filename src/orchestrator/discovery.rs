//! Discovery
//!
//! Extracts references from every item, resolves URL references to the
//! items that own them, builds the dependency graph and levels it. This
//! runs once per run, before anything is cloned.

use serde::Serialize;
use std::collections::{BTreeSet, HashMap};
use tracing::{debug, warn};

use crate::domain::patterns::{normalize_url, numeric_tail, service_base};
use crate::domain::{
    extract_references, ContentItem, DependencyGraph, ItemId, ItemNode, Leveling, Reference,
};
use crate::mapping::MappingKind;

/// An item whose definition could not be inspected
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExtractionFailure {
    pub item: ItemId,
    pub reason: String,
}

/// A reference this run cannot satisfy
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct UnresolvedDependency {
    pub item: ItemId,

    /// Identifier or URL the item points at
    pub target: String,
}

/// Item URLs keyed by normalized form
#[derive(Debug, Default)]
pub struct UrlIndex {
    urls: HashMap<String, ItemId>,
}

impl UrlIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an item URL; the first owner of a URL keeps it
    pub fn insert(&mut self, url: &str, id: &ItemId) {
        let normalized = normalize_url(url);
        if let Some(base) = service_base(&normalized) {
            self.urls.entry(base).or_insert_with(|| id.clone());
        }
        self.urls.entry(normalized).or_insert_with(|| id.clone());
    }

    /// Finds the item a service or layer URL belongs to
    ///
    /// Tries the exact URL, then its parents over numeric layer segments,
    /// then its service base.
    pub fn resolve(&self, url: &str) -> Option<&ItemId> {
        let normalized = normalize_url(url);
        if let Some(id) = self.urls.get(&normalized) {
            return Some(id);
        }

        let mut current = normalized.as_str();
        while let Some((parent, _)) = numeric_tail(current) {
            if let Some(id) = self.urls.get(parent) {
                return Some(id);
            }
            current = parent;
        }

        service_base(&normalized).and_then(|base| self.urls.get(&base))
    }

    pub fn len(&self) -> usize {
        self.urls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.urls.is_empty()
    }
}

/// Everything known about a run before cloning starts
#[derive(Debug)]
pub struct Plan {
    items: Vec<ContentItem>,
    positions: HashMap<ItemId, usize>,
    urls: UrlIndex,
    graph: DependencyGraph,
    leveling: Leveling,
    extraction_failures: Vec<ExtractionFailure>,
    unresolved: Vec<UnresolvedDependency>,
}

impl Plan {
    /// Discovers dependencies between `items` and levels them
    ///
    /// Duplicate identifiers keep their first occurrence. Extraction
    /// failures and references to anything outside `items` are logged and
    /// kept on the plan; neither stops discovery.
    pub fn discover(items: impl IntoIterator<Item = ContentItem>) -> Self {
        let mut kept = Vec::new();
        let mut positions = HashMap::new();
        for item in items {
            if positions.contains_key(&item.id) {
                warn!(item = %item.id, "Duplicate item ignored");
                continue;
            }
            positions.insert(item.id.clone(), kept.len());
            kept.push(item);
        }

        let mut urls = UrlIndex::new();
        for item in &kept {
            if let Some(url) = &item.url {
                urls.insert(url, &item.id);
            }
        }

        let mut extraction_failures = Vec::new();
        let mut unresolved = BTreeSet::new();
        let mut nodes = Vec::with_capacity(kept.len());

        for item in &kept {
            let refs = match extract_references(item) {
                Ok(refs) => refs,
                Err(err) => {
                    warn!(
                        item = %item.id,
                        kind = ?item.kind,
                        error = %err,
                        "Extraction failed, item has no discovered dependencies"
                    );
                    extraction_failures.push(ExtractionFailure {
                        item: item.id.clone(),
                        reason: err.to_string(),
                    });
                    BTreeSet::new()
                }
            };

            let mut depends_on = BTreeSet::new();
            for reference in refs {
                match reference {
                    Reference::Item(id) => {
                        depends_on.insert(id);
                    }
                    Reference::Url(url) => match urls.resolve(&url) {
                        Some(owner) if owner == &item.id => {}
                        Some(owner) => {
                            depends_on.insert(owner.clone());
                        }
                        None => {
                            unresolved.insert(UnresolvedDependency {
                                item: item.id.clone(),
                                target: url,
                            });
                        }
                    },
                }
            }

            debug!(item = %item.id, dependencies = depends_on.len(), "Extracted references");
            nodes.push(ItemNode {
                id: item.id.clone(),
                kind: item.kind,
                depends_on,
            });
        }

        let (graph, dropped) = DependencyGraph::from_nodes(&nodes);
        unresolved.extend(dropped.into_iter().map(|d| UnresolvedDependency {
            item: d.item,
            target: d.target.to_string(),
        }));

        for dep in &unresolved {
            warn!(item = %dep.item, target = %dep.target, "Dependency outside the migrated set");
        }

        let leveling = graph.levels();
        for cycle in &leveling.cycles {
            let members: Vec<_> = cycle.iter().map(ItemId::to_string).collect();
            warn!(
                items = %members.join(", "),
                "Cycle detected, mutual references will be resolved after creation"
            );
        }

        Self {
            items: kept,
            positions,
            urls,
            graph,
            leveling,
            extraction_failures,
            unresolved: unresolved.into_iter().collect(),
        }
    }

    /// Items in discovery order
    pub fn items(&self) -> &[ContentItem] {
        &self.items
    }

    pub fn item(&self, id: &ItemId) -> Option<&ContentItem> {
        self.positions.get(id).map(|&i| &self.items[i])
    }

    pub fn graph(&self) -> &DependencyGraph {
        &self.graph
    }

    pub fn leveling(&self) -> &Leveling {
        &self.leveling
    }

    pub fn extraction_failures(&self) -> &[ExtractionFailure] {
        &self.extraction_failures
    }

    /// External dependencies, sorted and deduplicated
    pub fn unresolved(&self) -> &[UnresolvedDependency] {
        &self.unresolved
    }

    /// Returns the discovered item an unresolved value points at, if any
    ///
    /// Groups and domains are never items.
    pub fn target_of(&self, kind: MappingKind, value: &str) -> Option<&ItemId> {
        match kind {
            MappingKind::Identifier => {
                let id: ItemId = value.parse().ok()?;
                self.positions.get_key_value(&id).map(|(id, _)| id)
            }
            MappingKind::Url | MappingKind::ServiceUrl | MappingKind::SublayerUrl => {
                self.urls.resolve(value)
            }
            MappingKind::Group | MappingKind::Domain => None,
        }
    }
}
