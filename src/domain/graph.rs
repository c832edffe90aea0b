//! Dependency graph and leveler
//!
//! Edges point from a dependency to its dependents, so a node's incoming
//! neighbours are what it needs and its outgoing neighbours are what needs
//! it. Cycles are allowed in the graph; the leveler gives them their own
//! terminal level instead of rejecting them.

use petgraph::algo::tarjan_scc;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::Bfs;
use petgraph::Direction;
use serde::Serialize;
use std::collections::{BTreeSet, HashMap};
use thiserror::Error;

use super::id::ItemId;
use super::item::ItemKind;

#[derive(Debug, Error, PartialEq)]
pub enum GraphError {
    #[error("Item not found: {0}")]
    ItemNotFound(ItemId),

    #[error("Self-dependency not allowed: {0}")]
    SelfDependency(ItemId),
}

/// An item together with the identifiers it depends on
#[derive(Debug, Clone)]
pub struct ItemNode {
    pub id: ItemId,
    pub kind: ItemKind,
    pub depends_on: BTreeSet<ItemId>,
}

/// A dependency whose target is not part of the graph
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub struct DroppedDependency {
    pub item: ItemId,
    pub target: ItemId,
}

/// One batch of items whose dependencies lie in earlier levels
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MigrationLevel {
    pub index: usize,
    pub items: Vec<ItemId>,

    /// True for the terminal level formed from unresolvable cycles
    pub cyclic: bool,
}

/// Result of leveling a graph
#[derive(Debug, Clone, Default, Serialize)]
pub struct Leveling {
    pub levels: Vec<MigrationLevel>,

    /// Strongly connected components with more than one member
    pub cycles: Vec<Vec<ItemId>>,
}

impl Leveling {
    /// Returns the level index an item was placed in
    pub fn level_of(&self, id: &ItemId) -> Option<usize> {
        self.levels
            .iter()
            .find(|level| level.items.contains(id))
            .map(|level| level.index)
    }

    /// Returns true if the graph had at least one cycle
    pub fn has_cycles(&self) -> bool {
        !self.cycles.is_empty()
    }

    /// Returns the number of leveled items
    pub fn item_count(&self) -> usize {
        self.levels.iter().map(|l| l.items.len()).sum()
    }
}

/// A dependency graph over content items
#[derive(Debug, Default)]
pub struct DependencyGraph {
    /// Edge direction: dependency -> dependent
    graph: DiGraph<ItemId, ()>,

    node_map: HashMap<ItemId, NodeIndex>,

    kinds: HashMap<ItemId, ItemKind>,
}

impl DependencyGraph {
    /// Creates an empty dependency graph
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a graph from discovered items
    ///
    /// Self-dependencies are ignored. Dependencies on identifiers outside
    /// the item set are dropped and returned once per (item, target).
    pub fn from_nodes<'a>(
        nodes: impl IntoIterator<Item = &'a ItemNode>,
    ) -> (Self, Vec<DroppedDependency>) {
        let mut graph = Self::new();
        let nodes: Vec<_> = nodes.into_iter().collect();

        for node in &nodes {
            graph.add_item(node.id.clone(), node.kind);
        }

        let mut dropped = Vec::new();
        for node in &nodes {
            for target in &node.depends_on {
                if target == &node.id {
                    continue;
                }
                if !graph.contains(target) {
                    dropped.push(DroppedDependency {
                        item: node.id.clone(),
                        target: target.clone(),
                    });
                    continue;
                }
                // Both endpoints exist and differ
                let _ = graph.add_dependency(&node.id, target);
            }
        }

        (graph, dropped)
    }

    /// Adds an item to the graph; re-adding keeps the first kind
    pub fn add_item(&mut self, id: ItemId, kind: ItemKind) {
        if !self.node_map.contains_key(&id) {
            let idx = self.graph.add_node(id.clone());
            self.node_map.insert(id.clone(), idx);
            self.kinds.insert(id, kind);
        }
    }

    /// Adds a dependency edge: `item` depends on `depends_on`
    ///
    /// Adding an existing edge again is a no-op.
    pub fn add_dependency(&mut self, item: &ItemId, depends_on: &ItemId) -> Result<(), GraphError> {
        if item == depends_on {
            return Err(GraphError::SelfDependency(item.clone()));
        }

        let item_idx = self.index_of(item)?;
        let dep_idx = self.index_of(depends_on)?;

        self.graph.update_edge(dep_idx, item_idx, ());
        Ok(())
    }

    fn index_of(&self, id: &ItemId) -> Result<NodeIndex, GraphError> {
        self.node_map
            .get(id)
            .copied()
            .ok_or_else(|| GraphError::ItemNotFound(id.clone()))
    }

    fn neighbors(&self, id: &ItemId, direction: Direction) -> Vec<ItemId> {
        let Some(&idx) = self.node_map.get(id) else {
            return vec![];
        };

        let mut ids: Vec<_> = self
            .graph
            .neighbors_directed(idx, direction)
            .filter_map(|n| self.graph.node_weight(n).cloned())
            .collect();
        ids.sort();
        ids
    }

    /// Returns the direct dependencies of an item
    pub fn dependencies(&self, id: &ItemId) -> Vec<ItemId> {
        self.neighbors(id, Direction::Incoming)
    }

    /// Returns the direct dependents of an item (items that depend on it)
    pub fn dependents(&self, id: &ItemId) -> Vec<ItemId> {
        self.neighbors(id, Direction::Outgoing)
    }

    /// Returns every item that depends on `id`, directly or transitively
    pub fn transitive_dependents(&self, id: &ItemId) -> BTreeSet<ItemId> {
        let Some(&start) = self.node_map.get(id) else {
            return BTreeSet::new();
        };

        let mut found = BTreeSet::new();
        let mut bfs = Bfs::new(&self.graph, start);
        while let Some(idx) = bfs.next(&self.graph) {
            if idx != start {
                if let Some(dependent) = self.graph.node_weight(idx) {
                    found.insert(dependent.clone());
                }
            }
        }
        found
    }

    /// Partitions the graph into migration levels
    ///
    /// Kahn-style: each level holds the items whose dependencies are all in
    /// earlier levels, ordered by kind priority then discovery order. When
    /// items remain but none is ready, they form one final cyclic level in
    /// the same order.
    pub fn levels(&self) -> Leveling {
        let mut in_degree: Vec<usize> = self
            .graph
            .node_indices()
            .map(|idx| self.graph.neighbors_directed(idx, Direction::Incoming).count())
            .collect();
        let mut remaining: BTreeSet<NodeIndex> = self.graph.node_indices().collect();
        let mut levels = Vec::new();

        while !remaining.is_empty() {
            let mut ready: Vec<NodeIndex> = remaining
                .iter()
                .copied()
                .filter(|idx| in_degree[idx.index()] == 0)
                .collect();

            let cyclic = ready.is_empty();
            if cyclic {
                ready = remaining.iter().copied().collect();
            }
            self.sort_by_priority(&mut ready);

            for idx in &ready {
                remaining.remove(idx);
                for dependent in self.graph.neighbors_directed(*idx, Direction::Outgoing) {
                    let degree = &mut in_degree[dependent.index()];
                    *degree = degree.saturating_sub(1);
                }
            }

            levels.push(MigrationLevel {
                index: levels.len(),
                items: ready
                    .iter()
                    .filter_map(|idx| self.graph.node_weight(*idx).cloned())
                    .collect(),
                cyclic,
            });

            if cyclic {
                break;
            }
        }

        Leveling {
            levels,
            cycles: self.cycles(),
        }
    }

    fn sort_by_priority(&self, nodes: &mut [NodeIndex]) {
        nodes.sort_by_key(|idx| {
            let priority = self
                .graph
                .node_weight(*idx)
                .and_then(|id| self.kinds.get(id))
                .map(|kind| kind.priority())
                .unwrap_or(u8::MAX);
            (priority, idx.index())
        });
    }

    /// Returns the strongly connected components that form cycles
    pub fn cycles(&self) -> Vec<Vec<ItemId>> {
        let mut cycles: Vec<Vec<ItemId>> = tarjan_scc(&self.graph)
            .into_iter()
            .filter(|scc| scc.len() > 1)
            .map(|scc| {
                let mut ids: Vec<_> = scc
                    .into_iter()
                    .filter_map(|idx| self.graph.node_weight(idx).cloned())
                    .collect();
                ids.sort();
                ids
            })
            .collect();
        cycles.sort();
        cycles
    }

    /// Returns all (item, dependency) edges
    pub fn edges(&self) -> Vec<(ItemId, ItemId)> {
        let mut edges: Vec<_> = self
            .graph
            .edge_indices()
            .filter_map(|e| self.graph.edge_endpoints(e))
            .filter_map(|(dep, item)| {
                Some((
                    self.graph.node_weight(item)?.clone(),
                    self.graph.node_weight(dep)?.clone(),
                ))
            })
            .collect();
        edges.sort();
        edges
    }

    /// Returns the kind an item was added with
    pub fn kind(&self, id: &ItemId) -> Option<ItemKind> {
        self.kinds.get(id).copied()
    }

    /// Returns true if the graph contains the item
    pub fn contains(&self, id: &ItemId) -> bool {
        self.node_map.contains_key(id)
    }

    /// Returns the number of items in the graph
    pub fn len(&self) -> usize {
        self.node_map.len()
    }

    /// Returns true if the graph is empty
    pub fn is_empty(&self) -> bool {
        self.node_map.is_empty()
    }
}
