//! Main CLI application structure

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::debug;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use super::output::{Output, OutputFormat};
use super::{deps, migrate, plan, rewrite};
use crate::storage::Config;

#[derive(Parser)]
#[command(name = "migraph")]
#[command(
    author,
    version,
    about = "Dependency-ordered migration of hosted content between accounts"
)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Output format (defaults to the configured format)
    #[arg(long, short = 'f', global = true)]
    pub format: Option<OutputFormat>,

    /// Enable debug logging
    #[arg(long, short = 'v', global = true)]
    pub verbose: bool,

    /// Run configuration file (defaults to .migraph/config.toml)
    #[arg(long, short = 'c', global = true, env = "MIGRAPH_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Show migration levels, cycles and warnings for an inventory
    Plan {
        /// Inventory file (JSONL, one item per line)
        inventory: PathBuf,
    },

    /// Show what one item depends on and what depends on it
    Deps {
        /// Inventory file (JSONL, one item per line)
        inventory: PathBuf,

        /// Item identifier
        id: String,

        /// Include indirect dependents
        #[arg(long)]
        transitive: bool,
    },

    /// Migrate an inventory into a destination directory
    Migrate {
        /// Inventory file (JSONL, one item per line)
        inventory: PathBuf,

        /// Destination directory for created items
        #[arg(long)]
        dest: PathBuf,

        /// Keep going after a clone failure, blocking dependents
        #[arg(long)]
        continue_on_error: bool,

        /// Worker threads per level (0 = one per core)
        #[arg(long)]
        parallelism: Option<usize>,

        /// Destination account name
        #[arg(long)]
        account: Option<String>,

        /// Destination hostname for cloned item URLs
        #[arg(long)]
        hostname: Option<String>,

        /// Directory for run artifacts
        #[arg(long, conflicts_with = "no_artifacts")]
        artifacts_dir: Option<PathBuf>,

        /// Do not write run artifacts
        #[arg(long)]
        no_artifacts: bool,
    },

    /// Rewrite a definition offline with saved mapping tables
    Rewrite {
        /// Definition file (JSON)
        definition: PathBuf,

        /// Mapping tables (mappings.json from a previous run)
        #[arg(long)]
        mappings: PathBuf,
    },
}

/// Installs the stderr log subscriber
fn init_tracing(verbose: bool, log_level: &str) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level))
    };

    // A subscriber may already be installed when embedded
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false),
        )
        .try_init();
}

/// Main entry point for the CLI
pub fn run() -> Result<()> {
    let cli = Cli::parse();
    let config = Config::load(cli.config.as_deref())?;

    init_tracing(cli.verbose, &config.global.log_level);
    if let Some(source) = &config.source {
        debug!(path = %source.display(), "Loaded run config");
    }

    let format = cli
        .format
        .unwrap_or_else(|| config.global.default_format.into());
    let output = Output::new(format, cli.verbose);

    match cli.command {
        Commands::Plan { inventory } => plan::run(&output, &inventory)?,

        Commands::Deps {
            inventory,
            id,
            transitive,
        } => deps::run(&output, &inventory, &id, transitive)?,

        Commands::Migrate {
            inventory,
            dest,
            continue_on_error,
            parallelism,
            account,
            hostname,
            artifacts_dir,
            no_artifacts,
        } => {
            let options = migrate::MigrateOptions {
                dest,
                continue_on_error,
                parallelism,
                account,
                hostname,
                artifacts_dir,
                no_artifacts,
            };
            migrate::run(&output, config.run, &inventory, options)?
        }

        Commands::Rewrite {
            definition,
            mappings,
        } => rewrite::run(&output, &definition, &mappings)?,
    }

    Ok(())
}
