//! Domain models for migraph
//!
//! Contains the core graph logic without any I/O concerns.

mod extract;
mod graph;
mod id;
mod item;
pub mod patterns;
pub mod value;

pub use extract::{extract_references, scan_structured, scan_text, ExtractError, Reference};
pub use graph::{
    DependencyGraph, DroppedDependency, GraphError, ItemNode, Leveling, MigrationLevel,
};
pub use id::{is_id_shaped, IdError, ItemId, ITEM_ID_LEN};
pub use item::{ContentItem, ItemKind, ItemState};
