//! # Command-Line Interface
//!
//! Thin front end over discovery, the orchestrator and the rewriter.
//!
//! ## Commands
//!
//! | Command | Purpose |
//! |---------|---------|
//! | `plan <inventory>` | Levels, cycles and discovery warnings |
//! | `deps <inventory> <id>` | Dependencies and dependents of one item |
//! | `migrate <inventory> --dest <dir>` | Full run into a directory destination |
//! | `rewrite <definition> --mappings <file>` | Offline rewrite with saved tables |
//!
//! ## Output Formats
//!
//! All commands support `--format`:
//! - `text` (default) - Human-readable output
//! - `json` - Machine-parseable JSON on stdout
//!
//! Logs always go to stderr. `--verbose` switches them to debug level,
//! otherwise `RUST_LOG` or the configured `log_level` applies.
//!
//! ## Entry Point
//!
//! Call [`run()`] to parse arguments and execute the appropriate command.

mod app;
mod deps;
mod migrate;
mod output;
mod plan;
mod rewrite;

pub use app::{run, Cli, Commands};
pub use output::{Output, OutputFormat};
