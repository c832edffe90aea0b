//! Configuration handling for migraph
//!
//! Run settings live in `.migraph/config.toml` (project) and user
//! preferences in `~/.config/migraph/config.toml` (global). An explicit
//! `--config` path replaces the project lookup.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Name of the project directory searched for upwards
pub const PROJECT_DIR: &str = ".migraph";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid configuration: {0}")]
    Invalid(String),

    #[error("Failed to parse configuration: {0}")]
    Parse(String),
}

/// What a clone failure does to the rest of the run
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Abort and delete what was created
    #[default]
    Rollback,
    /// Keep going; dependents of the failed item are blocked
    Continue,
}

impl FailurePolicy {
    pub fn as_str(&self) -> &str {
        match self {
            FailurePolicy::Rollback => "rollback",
            FailurePolicy::Continue => "continue",
        }
    }
}

/// Fixed-backoff retry settings handed to cloners
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RetryConfig {
    pub max_retries: u32,

    /// Delay between attempts in milliseconds
    pub delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            delay_ms: 5000,
        }
    }
}

impl RetryConfig {
    pub fn delay(&self) -> Duration {
        Duration::from_millis(self.delay_ms)
    }
}

/// Run artifact settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ArtifactConfig {
    pub enabled: bool,

    /// Base directory; each run writes into `<dir>/<run-id>/`
    pub dir: PathBuf,

    /// Write per-item definitions before and after rewriting
    pub save_intermediate: bool,
}

impl Default for ArtifactConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            dir: PathBuf::from("migraph_runs"),
            save_intermediate: true,
        }
    }
}

/// Correspondences known before the run starts
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(default)]
pub struct SeedConfig {
    /// Organisation hostnames (old -> new)
    pub domains: BTreeMap<String, String>,

    /// Pre-existing groups (old -> new)
    pub groups: BTreeMap<String, String>,
}

/// Where migrated items are created
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct DestinationConfig {
    pub account: String,

    pub folder: Option<String>,

    /// Hostname swapped into cloned item URLs
    pub hostname: Option<String>,
}

impl Default for DestinationConfig {
    fn default() -> Self {
        Self {
            account: "destination".to_string(),
            folder: None,
            hostname: None,
        }
    }
}

/// Settings for one migration run
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RunConfig {
    pub failure_policy: FailurePolicy,

    /// Worker threads per level (0 = one per core, 1 = sequential)
    pub parallelism: usize,

    /// Attempts allowed per deferred update before giving up
    pub max_update_attempts: u32,

    pub retry: RetryConfig,

    pub artifacts: ArtifactConfig,

    pub seed: SeedConfig,

    pub destination: DestinationConfig,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            failure_policy: FailurePolicy::Rollback,
            parallelism: 0,
            max_update_attempts: 3,
            retry: RetryConfig::default(),
            artifacts: ArtifactConfig::default(),
            seed: SeedConfig::default(),
            destination: DestinationConfig::default(),
        }
    }
}

impl RunConfig {
    /// Checks values serde cannot
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_update_attempts == 0 {
            return Err(ConfigError::Invalid(
                "max_update_attempts must be at least 1".to_string(),
            ));
        }
        if self.destination.account.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "destination.account must not be empty".to_string(),
            ));
        }
        if let Some(host) = &self.destination.hostname {
            if host.is_empty() || host.contains(['/', ' ']) {
                return Err(ConfigError::Invalid(format!(
                    "destination.hostname must be a bare hostname, got '{}'",
                    host
                )));
            }
        }
        Ok(())
    }
}

/// Global user configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GlobalConfig {
    /// Default output format (text or json)
    pub default_format: OutputFormat,

    /// Log filter used when neither --verbose nor RUST_LOG is set
    pub log_level: String,
}

impl Default for GlobalConfig {
    fn default() -> Self {
        Self {
            default_format: OutputFormat::Text,
            log_level: "info".to_string(),
        }
    }
}

/// Output format for commands
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

/// Combined configuration (global + run)
#[derive(Debug, Clone, Default)]
pub struct Config {
    pub run: RunConfig,
    pub global: GlobalConfig,

    /// File the run settings were read from, if any
    pub source: Option<PathBuf>,
}

impl Config {
    /// Loads configuration from an explicit file or the default locations
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let global = Self::load_global()?;

        let source = match explicit {
            Some(path) => Some(path.to_path_buf()),
            None => Self::find_project_root()
                .map(|root| root.join(PROJECT_DIR).join("config.toml"))
                .filter(|path| path.exists())
                .or_else(|| {
                    Self::global_config_dir()
                        .map(|dir| dir.join("config.toml"))
                        .filter(|path| path.exists())
                }),
        };

        let run = match &source {
            Some(path) => Self::load_run_config(path)?,
            None => RunConfig::default(),
        };

        Ok(Self {
            run,
            global,
            source,
        })
    }

    /// Returns the global config directory
    pub fn global_config_dir() -> Option<PathBuf> {
        ProjectDirs::from("dev", "migraph", "migraph").map(|dirs| dirs.config_dir().to_path_buf())
    }

    /// Loads global configuration
    fn load_global() -> Result<GlobalConfig> {
        let config_dir = match Self::global_config_dir() {
            Some(dir) => dir,
            None => return Ok(GlobalConfig::default()),
        };

        let config_path = config_dir.join("config.toml");
        if !config_path.exists() {
            return Ok(GlobalConfig::default());
        }

        let content = fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read global config: {}", config_path.display()))?;

        toml::from_str(&content)
            .map_err(|e| ConfigError::Parse(e.to_string()))
            .context("Failed to parse global config")
    }

    /// Loads and validates run settings from a file
    pub fn load_run_config(path: &Path) -> Result<RunConfig> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config: {}", path.display()))?;

        let config: RunConfig = toml::from_str(&content)
            .map_err(|e| ConfigError::Parse(e.to_string()))
            .with_context(|| format!("Failed to parse config: {}", path.display()))?;

        config
            .validate()
            .with_context(|| format!("Invalid config: {}", path.display()))?;

        Ok(config)
    }

    /// Finds the project root by looking for a `.migraph/` directory
    pub fn find_project_root() -> Option<PathBuf> {
        let current = std::env::current_dir().ok()?;
        Self::find_project_root_from(&current)
    }

    fn find_project_root_from(start: &Path) -> Option<PathBuf> {
        let mut current = start.to_path_buf();
        loop {
            if current.join(PROJECT_DIR).is_dir() {
                return Some(current);
            }
            if !current.pop() {
                return None;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn default_config() {
        let config = Config::default();

        assert_eq!(config.run.failure_policy, FailurePolicy::Rollback);
        assert_eq!(config.run.max_update_attempts, 3);
        assert_eq!(config.run.retry.max_retries, 3);
        assert_eq!(config.run.retry.delay(), Duration::from_secs(5));
        assert!(config.run.artifacts.enabled);
        assert_eq!(config.global.default_format, OutputFormat::Text);
        assert_eq!(config.global.log_level, "info");
    }

    #[test]
    fn parse_run_config() {
        let toml = r#"
failure_policy = "continue"
parallelism = 4

[retry]
delay_ms = 10

[seed.domains]
"src.maps.example.com" = "dst.maps.example.com"

[destination]
account = "parks-dept"
hostname = "dst.maps.example.com"
"#;

        let config: RunConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.failure_policy, FailurePolicy::Continue);
        assert_eq!(config.parallelism, 4);
        assert_eq!(config.retry.delay_ms, 10);
        assert_eq!(config.retry.max_retries, 3);
        assert_eq!(
            config.seed.domains.get("src.maps.example.com").map(String::as_str),
            Some("dst.maps.example.com")
        );
        assert_eq!(config.destination.account, "parks-dept");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn parse_global_config() {
        let toml = r#"
default_format = "json"
log_level = "debug"
"#;

        let config: GlobalConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.default_format, OutputFormat::Json);
        assert_eq!(config.log_level, "debug");
    }

    #[test]
    fn validation_rejects_bad_values() {
        let mut config = RunConfig {
            max_update_attempts: 0,
            ..RunConfig::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        config.max_update_attempts = 1;
        config.destination.hostname = Some("https://x.example.com/".into());
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn load_explicit_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("run.toml");
        fs::write(&path, "failure_policy = \"continue\"\n").unwrap();

        let config = Config::load(Some(&path)).unwrap();
        assert_eq!(config.run.failure_policy, FailurePolicy::Continue);
        assert_eq!(config.source, Some(path));
    }

    #[test]
    fn load_rejects_malformed_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("run.toml");
        fs::write(&path, "parallelism = \"many\"\n").unwrap();

        let err = Config::load(Some(&path)).unwrap_err();
        assert!(format!("{:#}", err).contains("Failed to parse config"));
    }

    #[test]
    fn find_project_root_walks_up() {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join(PROJECT_DIR)).unwrap();
        let sub_dir = dir.path().join("sub").join("dir");
        fs::create_dir_all(&sub_dir).unwrap();

        let root = Config::find_project_root_from(&sub_dir);
        assert_eq!(root, Some(dir.path().to_path_buf()));
    }

    #[test]
    fn no_project_root() {
        let dir = TempDir::new().unwrap();
        // Only meaningful when no ancestor of the temp dir has .migraph/
        if Config::find_project_root_from(dir.path().parent().unwrap()).is_none() {
            assert_eq!(Config::find_project_root_from(dir.path()), None);
        }
    }
}
