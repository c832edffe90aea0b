//! `rewrite` command

use std::path::Path;

use anyhow::Result;
use serde_json::Value;
use tracing::debug;

use super::output::Output;
use crate::mapping::MappingTables;
use crate::storage::read_json;

/// Rewrite a definition file with saved mapping tables
pub fn run(output: &Output, definition: &Path, mappings: &Path) -> Result<()> {
    let tables: MappingTables = read_json(mappings)?;
    let value: Value = read_json(definition)?;
    debug!(mappings = tables.len(), "Loaded mapping tables");

    let rewrite = tables.rewrite_structured(&value);

    if output.is_json() {
        output.data(&rewrite);
        return Ok(());
    }

    output.data(&rewrite.value);
    for unresolved in &rewrite.unresolved {
        output.warning(&format!(
            "no {} mapping for {} ({:?})",
            unresolved.kind, unresolved.value, unresolved.location
        ));
    }
    for found in &rewrite.ambiguous {
        output.warning(&format!(
            "{} inside '{}' left unchanged ({:?})",
            found.id, found.token, found.location
        ));
    }
    if output.is_verbose() {
        eprintln!("Replaced {} references", rewrite.replaced);
    }

    Ok(())
}
