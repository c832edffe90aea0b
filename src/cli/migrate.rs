//! `migrate` command

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};

use super::output::Output;
use crate::cloner::{ClonerRegistry, DirectoryCloner, RetryPolicy};
use crate::domain::ItemState;
use crate::orchestrator::{Orchestrator, Plan, RunContext, RunReport};
use crate::storage::{FailurePolicy, Inventory, RunConfig};

/// Command-line overrides of the run configuration
#[derive(Debug, Default)]
pub struct MigrateOptions {
    pub dest: PathBuf,
    pub continue_on_error: bool,
    pub parallelism: Option<usize>,
    pub account: Option<String>,
    pub hostname: Option<String>,
    pub artifacts_dir: Option<PathBuf>,
    pub no_artifacts: bool,
}

impl MigrateOptions {
    fn apply(&self, config: &mut RunConfig) {
        if self.continue_on_error {
            config.failure_policy = FailurePolicy::Continue;
        }
        if let Some(parallelism) = self.parallelism {
            config.parallelism = parallelism;
        }
        if let Some(account) = &self.account {
            config.destination.account = account.clone();
        }
        if let Some(hostname) = &self.hostname {
            config.destination.hostname = Some(hostname.clone());
        }
        if let Some(dir) = &self.artifacts_dir {
            config.artifacts.dir = dir.clone();
        }
        if self.no_artifacts {
            config.artifacts.enabled = false;
        }
    }
}

pub fn run(
    output: &Output,
    mut config: RunConfig,
    inventory: &Path,
    options: MigrateOptions,
) -> Result<()> {
    options.apply(&mut config);
    config.validate().context("Invalid run configuration")?;

    let items = Inventory::new(inventory).read_items()?;
    let plan = Plan::discover(items.clone());

    let ctx = RunContext::new(config);
    let retry = RetryPolicy::from(&ctx.config.retry);
    let registry = ClonerRegistry::single(Arc::new(DirectoryCloner::new(
        items,
        &options.dest,
        retry,
    )));

    match Orchestrator::new(&ctx, &registry).run(&plan) {
        Ok(outcome) => {
            print_report(output, &outcome.report);
            if let Some(artifacts) = &ctx.artifacts {
                if !output.is_json() {
                    println!("Artifacts: {}", artifacts.root().display());
                }
            }
            Ok(())
        }
        Err(err) => {
            if let Some(report) = err.report() {
                print_report(output, report);
            }
            Err(err.into())
        }
    }
}

fn print_report(output: &Output, report: &RunReport) {
    if output.is_json() {
        output.data(report);
        return;
    }

    println!(
        "Run {}: {} finalized, {} failed, {} blocked, {} warnings",
        report.run_id,
        report.count(ItemState::Finalized),
        report.clone_failures.len(),
        report.blocked.len(),
        report.warning_count()
    );

    let created: Vec<_> = report
        .items
        .iter()
        .filter_map(|(id, outcome)| outcome.new_id.as_ref().map(|new| (id, new, outcome)))
        .collect();
    if !created.is_empty() {
        output.blank();
        output.heading("Created");
        for (id, new, outcome) in created {
            output.row(&[id.as_str(), "->", new.as_str(), &outcome.title]);
        }
    }

    if !report.clone_failures.is_empty() || !report.blocked.is_empty() {
        output.blank();
        output.heading("Not migrated");
        for failure in &report.clone_failures {
            println!("{}: {}", failure.item, failure.reason);
        }
        for blocked in &report.blocked {
            println!("{}: blocked by {}", blocked.item, blocked.failed_dependency);
        }
    }

    if !report.rolled_back.is_empty() {
        output.warning(&format!("Rolled back {} created items", report.rolled_back.len()));
    }
    for failure in &report.rollback_failures {
        output.warning(&format!(
            "Could not roll back {} ({}): {}",
            failure.item, failure.new_id, failure.reason
        ));
    }

    if report.warning_count() > 0 {
        output.blank();
        output.heading("Warnings");
        for failure in &report.extraction_failures {
            println!("{}: extraction failed: {}", failure.item, failure.reason);
        }
        for dep in &report.unresolved_dependencies {
            println!("{}: outside the migrated set: {}", dep.item, dep.target);
        }
        for found in &report.ambiguous {
            println!("{}: ambiguous {} inside '{}'", found.item, found.id, found.token);
        }
        for failure in &report.update_failures {
            println!(
                "{}: update gave up after {} attempts: {}",
                failure.item, failure.attempts, failure.reason
            );
        }
        for unresolved in &report.unresolved_references {
            let waiting: Vec<_> = unresolved
                .patch
                .outstanding()
                .into_iter()
                .map(|(_, value)| value)
                .collect();
            println!("{}: unresolved {}", unresolved.item, waiting.join(", "));
        }
    }
}
