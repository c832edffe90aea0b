//! `deps` command

use std::path::Path;

use anyhow::{bail, Result};

use super::output::Output;
use super::plan::discover;
use crate::domain::ItemId;

pub fn run(output: &Output, inventory: &Path, id: &str, transitive: bool) -> Result<()> {
    let id: ItemId = id.parse()?;
    let plan = discover(inventory)?;
    let graph = plan.graph();

    let Some(item) = plan.item(&id) else {
        bail!("Item not found in inventory: {}", id);
    };

    let dependencies = graph.dependencies(&id);
    let dependents: Vec<ItemId> = if transitive {
        graph.transitive_dependents(&id).into_iter().collect()
    } else {
        graph.dependents(&id)
    };
    let external: Vec<_> = plan
        .unresolved()
        .iter()
        .filter(|dep| dep.item == id)
        .map(|dep| dep.target.as_str())
        .collect();

    if output.is_json() {
        output.data(&serde_json::json!({
            "id": item.id,
            "kind": item.kind,
            "title": item.title,
            "level": plan.leveling().level_of(&id),
            "dependencies": dependencies,
            "dependents": dependents,
            "external": external,
        }));
        return Ok(());
    }

    println!("{} {} ({})", item.id, item.title, item.kind);
    if let Some(level) = plan.leveling().level_of(&id) {
        println!("Level: {}", level);
    }

    let sections = [
        ("Depends on", &dependencies),
        (
            if transitive { "Needed by (transitively)" } else { "Needed by" },
            &dependents,
        ),
    ];
    for (title, ids) in sections {
        output.blank();
        output.heading(&format!("{} ({})", title, ids.len()));
        for dep in ids.iter().filter_map(|dep| plan.item(dep)) {
            output.row(&[dep.id.as_str(), dep.kind.label(), &dep.title]);
        }
    }

    if !external.is_empty() {
        output.blank();
        output.heading(&format!("Outside the migrated set ({})", external.len()));
        for target in external {
            println!("{}", target);
        }
    }

    Ok(())
}
