//! # Storage Layer
//!
//! Inputs, configuration and run artifacts, all in plain files.
//!
//! ## Storage Formats
//!
//! | Data | Format | Location |
//! |------|--------|----------|
//! | Source items | JSONL (one item per line) | given on the command line |
//! | Config | TOML | `.migraph/config.toml` or `--config` |
//! | Run artifacts | JSON | `<artifacts.dir>/<run-id>/` |
//!
//! ## Concurrency Safety
//!
//! - Reads take a shared `fs2` lock, writes an exclusive one
//! - All writes are atomic (temp file + rename)
//!
//! ## Key Types
//!
//! - [`Inventory`] - Reads the source item list
//! - [`ArtifactStore`] - Writes id tables, mapping tables, definitions and reports
//! - [`Config`] - Run and global configuration

mod artifacts;
mod config;
mod inventory;

pub use artifacts::{read_json, write_json_atomic, ArtifactStore, DefinitionStage};
pub use config::{
    ArtifactConfig, Config, ConfigError, DestinationConfig, FailurePolicy, GlobalConfig,
    OutputFormat, RetryConfig, RunConfig, SeedConfig, PROJECT_DIR,
};
pub use inventory::{Inventory, InventoryRecord};
