//! Run artifacts
//!
//! Each run writes into its own directory:
//!
//! ```text
//! <artifacts.dir>/<run-id>/
//! ├── id_mapping.json                          # old id -> new id
//! ├── mappings.json                            # all six tables
//! ├── pending.json                             # deferred updates after phase 1
//! ├── report.json                              # final run report
//! └── definitions/<id>_<stage>_<timestamp>.json
//! ```
//!
//! Every write goes to a temp file under an exclusive lock and is renamed
//! into place.

use std::collections::BTreeMap;
use std::fmt;
use std::fs::{self, File, OpenOptions};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use fs2::FileExt;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use super::config::ArtifactConfig;
use crate::domain::ItemId;
use crate::mapping::{MappingTables, PendingQueue};

/// Writes `value` as pretty JSON, atomically
pub fn write_json_atomic<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
    }

    let temp_path = path.with_extension("json.tmp");

    {
        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&temp_path)
            .with_context(|| format!("Failed to create temp file: {}", temp_path.display()))?;

        file.lock_exclusive()
            .with_context(|| format!("Failed to acquire write lock: {}", temp_path.display()))?;

        let mut writer = BufWriter::new(&file);
        serde_json::to_writer_pretty(&mut writer, value)
            .with_context(|| format!("Failed to serialize {}", path.display()))?;
        writeln!(writer).context("Failed to write trailing newline")?;
        writer
            .flush()
            .with_context(|| format!("Failed to flush {}", temp_path.display()))?;
    }

    fs::rename(&temp_path, path).with_context(|| {
        format!(
            "Failed to rename {} to {}",
            temp_path.display(),
            path.display()
        )
    })
}

/// Reads a JSON document under a shared lock
pub fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let file = File::open(path).with_context(|| format!("Failed to open {}", path.display()))?;

    file.lock_shared()
        .with_context(|| format!("Failed to acquire read lock: {}", path.display()))?;

    serde_json::from_reader(BufReader::new(&file))
        .with_context(|| format!("Failed to parse {}", path.display()))
}

/// Which side of the rewrite a saved definition shows
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DefinitionStage {
    Before,
    After,
}

impl fmt::Display for DefinitionStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DefinitionStage::Before => f.write_str("before"),
            DefinitionStage::After => f.write_str("after"),
        }
    }
}

/// Writer for one run's artifact directory
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    root: PathBuf,
    save_intermediate: bool,
}

impl ArtifactStore {
    pub fn new(base: impl AsRef<Path>, run_id: &str, save_intermediate: bool) -> Self {
        Self {
            root: base.as_ref().join(run_id),
            save_intermediate,
        }
    }

    /// Returns `None` when artifacts are disabled
    pub fn from_config(config: &ArtifactConfig, run_id: &str) -> Option<Self> {
        config
            .enabled
            .then(|| Self::new(&config.dir, run_id, config.save_intermediate))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Flat old id -> new id document
    pub fn save_id_mapping(&self, ids: &BTreeMap<String, String>) -> Result<PathBuf> {
        let path = self.root.join("id_mapping.json");
        write_json_atomic(&path, ids)?;
        Ok(path)
    }

    pub fn save_mappings(&self, tables: &MappingTables) -> Result<PathBuf> {
        let path = self.root.join("mappings.json");
        write_json_atomic(&path, tables)?;
        Ok(path)
    }

    pub fn save_pending(&self, pending: &PendingQueue) -> Result<PathBuf> {
        let path = self.root.join("pending.json");
        write_json_atomic(&path, pending)?;
        Ok(path)
    }

    pub fn save_report<T: Serialize>(&self, report: &T) -> Result<PathBuf> {
        let path = self.root.join("report.json");
        write_json_atomic(&path, report)?;
        Ok(path)
    }

    /// Saves one item definition tagged with its id, stage and time
    ///
    /// Returns `None` without writing when intermediate output is off.
    pub fn save_definition(
        &self,
        id: &ItemId,
        stage: DefinitionStage,
        definition: &Value,
        at: DateTime<Utc>,
    ) -> Result<Option<PathBuf>> {
        if !self.save_intermediate {
            return Ok(None);
        }

        let name = format!("{}_{}_{}.json", id, stage, at.format("%Y%m%d_%H%M%S"));
        let path = self.root.join("definitions").join(name);
        let document = serde_json::json!({
            "item": id,
            "stage": stage.to_string(),
            "timestamp": at.to_rfc3339(),
            "definition": definition,
        });
        write_json_atomic(&path, &document)?;
        Ok(Some(path))
    }
}
