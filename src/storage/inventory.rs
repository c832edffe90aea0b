//! JSONL inventory of source items
//!
//! One item per line:
//!
//! ```text
//! {"id": "...", "type": "Web Map", "typeKeywords": [...], "title": "...", "url": "...", "data": {...}, "text": {...}}
//! ```
//!
//! The kind of each item is decided here, once, from its type name and
//! keywords.

use std::collections::{BTreeMap, HashSet};
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

use crate::domain::{ContentItem, ItemId, ItemKind};

/// One line of an inventory file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InventoryRecord {
    pub id: ItemId,

    #[serde(rename = "type")]
    pub type_name: String,

    #[serde(rename = "typeKeywords", default, skip_serializing_if = "Vec::is_empty")]
    pub type_keywords: Vec<String>,

    #[serde(default)]
    pub title: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,

    #[serde(default)]
    pub data: Value,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub text: BTreeMap<String, String>,
}

impl InventoryRecord {
    /// Classifies the record into a content item
    pub fn into_item(self) -> ContentItem {
        let kind = ItemKind::classify(&self.type_name, &self.type_keywords);
        ContentItem {
            id: self.id,
            kind,
            title: self.title,
            url: self.url,
            definition: self.data,
            text: self.text,
        }
    }
}

/// Inventory file reader/writer
pub struct Inventory {
    path: PathBuf,
}

impl Inventory {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reads every record in file order
    pub fn read_records(&self) -> Result<Vec<InventoryRecord>> {
        let file = File::open(&self.path)
            .with_context(|| format!("Failed to open inventory: {}", self.path.display()))?;

        file.lock_shared()
            .context("Failed to acquire read lock on inventory")?;

        let reader = BufReader::new(&file);
        let mut records = Vec::new();

        for (line_num, line) in reader.lines().enumerate() {
            let line = line.with_context(|| format!("Failed to read line {}", line_num + 1))?;

            if line.trim().is_empty() {
                continue;
            }

            let record: InventoryRecord = serde_json::from_str(&line)
                .with_context(|| format!("Failed to parse item at line {}", line_num + 1))?;

            records.push(record);
        }

        Ok(records)
    }

    /// Reads and classifies every item; the first record of a repeated id wins
    pub fn read_items(&self) -> Result<Vec<ContentItem>> {
        let mut seen = HashSet::new();
        let mut items = Vec::new();

        for record in self.read_records()? {
            if !seen.insert(record.id.clone()) {
                warn!(item = %record.id, "Duplicate inventory entry ignored");
                continue;
            }
            items.push(record.into_item());
        }

        Ok(items)
    }

    /// Writes records (full rewrite, temp file + rename)
    pub fn write_records(&self, records: &[InventoryRecord]) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
        }

        let temp_path = self.path.with_extension("jsonl.tmp");

        {
            let file = OpenOptions::new()
                .write(true)
                .create(true)
                .truncate(true)
                .open(&temp_path)
                .with_context(|| format!("Failed to create temp file: {}", temp_path.display()))?;

            file.lock_exclusive()
                .context("Failed to acquire write lock on inventory")?;

            let mut writer = BufWriter::new(&file);
            for record in records {
                let line = serde_json::to_string(record).context("Failed to serialize item")?;
                writeln!(writer, "{}", line).context("Failed to write item")?;
            }
            writer.flush().context("Failed to flush inventory")?;
        }

        fs::rename(&temp_path, &self.path).with_context(|| {
            format!(
                "Failed to rename {} to {}",
                temp_path.display(),
                self.path.display()
            )
        })?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn id(n: u8) -> ItemId {
        format!("{:032x}", n).parse().unwrap()
    }

    #[test]
    fn missing_file_is_an_error() {
        let dir = TempDir::new().unwrap();
        let inventory = Inventory::new(dir.path().join("nope.jsonl"));
        assert!(inventory.read_items().is_err());
    }

    #[test]
    fn parse_and_classify() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("items.jsonl");
        let lines = [
            json!({"id": id(1).to_string(), "type": "Feature Service", "typeKeywords": ["View Service"], "title": "Parcels view", "url": "https://s.example.com/x/FeatureServer"}),
            json!({"id": id(2).to_string(), "type": "Web Map", "data": {"operationalLayers": []}}),
        ];
        let content: String = lines.iter().map(|l| format!("{}\n\n", l)).collect();
        fs::write(&path, content).unwrap();

        let items = Inventory::new(&path).read_items().unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].kind, ItemKind::View);
        assert_eq!(items[0].url.as_deref(), Some("https://s.example.com/x/FeatureServer"));
        assert_eq!(items[1].kind, ItemKind::WebMap);
        assert_eq!(items[1].definition, json!({"operationalLayers": []}));
    }

    #[test]
    fn bad_line_reports_line_number() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("items.jsonl");
        fs::write(
            &path,
            format!("{}\n{{\"id\": \"short\", \"type\": \"Web Map\"}}\n", json!({"id": id(1).to_string(), "type": "Web Map"})),
        )
        .unwrap();

        let err = Inventory::new(&path).read_items().unwrap_err();
        assert!(format!("{:#}", err).contains("line 2"));
    }

    #[test]
    fn duplicates_keep_first() {
        let dir = TempDir::new().unwrap();
        let inventory = Inventory::new(dir.path().join("items.jsonl"));
        let record = |title: &str| InventoryRecord {
            id: id(1),
            type_name: "Dashboard".into(),
            type_keywords: vec![],
            title: title.into(),
            url: None,
            data: Value::Null,
            text: BTreeMap::new(),
        };
        inventory.write_records(&[record("first"), record("second")]).unwrap();

        let items = inventory.read_items().unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].title, "first");
    }
}
