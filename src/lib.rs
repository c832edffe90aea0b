//! migraph - Dependency-ordered migration of hosted content graphs
//!
//! Items (layers, views, maps, dashboards, applications, sites) reference
//! each other by identifier and URL. migraph discovers those references,
//! orders items so dependencies are created first, and rewrites every old
//! reference to its newly created counterpart, deferring what cycles make
//! impossible to resolve up front.

pub mod cli;
pub mod cloner;
pub mod domain;
pub mod mapping;
pub mod orchestrator;
pub mod storage;

pub use domain::{ContentItem, ItemId, ItemKind, ItemState};
pub use mapping::{MappingKind, MappingStore, MappingTables};
pub use orchestrator::{Orchestrator, Plan, RunContext, RunError, RunReport};
