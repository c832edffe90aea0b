//! `plan` command

use std::path::Path;

use anyhow::Result;

use super::output::Output;
use crate::orchestrator::Plan;
use crate::storage::Inventory;

/// Reads an inventory and runs discovery on it
pub(super) fn discover(inventory: &Path) -> Result<Plan> {
    let items = Inventory::new(inventory).read_items()?;
    Ok(Plan::discover(items))
}

/// Show levels, cycles and warnings
pub fn run(output: &Output, inventory: &Path) -> Result<()> {
    let plan = discover(inventory)?;
    let leveling = plan.leveling();

    if output.is_json() {
        let levels: Vec<_> = leveling
            .levels
            .iter()
            .map(|level| {
                let items: Vec<_> = level
                    .items
                    .iter()
                    .filter_map(|id| plan.item(id))
                    .map(|item| {
                        serde_json::json!({
                            "id": item.id,
                            "kind": item.kind,
                            "title": item.title,
                        })
                    })
                    .collect();
                serde_json::json!({
                    "index": level.index,
                    "cyclic": level.cyclic,
                    "items": items,
                })
            })
            .collect();

        output.data(&serde_json::json!({
            "items": plan.items().len(),
            "levels": levels,
            "cycles": leveling.cycles,
            "extraction_failures": plan.extraction_failures(),
            "unresolved_dependencies": plan.unresolved(),
        }));
        return Ok(());
    }

    println!(
        "Migration plan: {} items in {} levels",
        plan.items().len(),
        leveling.levels.len()
    );

    for level in &leveling.levels {
        output.blank();
        let title = if level.cyclic {
            format!("Level {} ({} items, cyclic)", level.index, level.items.len())
        } else {
            format!("Level {} ({} items)", level.index, level.items.len())
        };
        output.heading(&title);
        for item in level.items.iter().filter_map(|id| plan.item(id)) {
            output.row(&[item.id.as_str(), item.kind.label(), &item.title]);
        }
    }

    if leveling.has_cycles() {
        output.blank();
        output.heading("Cycles (resolved after creation)");
        for cycle in &leveling.cycles {
            let members: Vec<_> = cycle.iter().map(|id| id.as_str()).collect();
            println!("{}", members.join(" <-> "));
        }
    }

    if !plan.extraction_failures().is_empty() || !plan.unresolved().is_empty() {
        output.blank();
        output.heading("Warnings");
        for failure in plan.extraction_failures() {
            println!("{}: extraction failed: {}", failure.item, failure.reason);
        }
        for dep in plan.unresolved() {
            println!("{}: outside the migrated set: {}", dep.item, dep.target);
        }
    }

    Ok(())
}
