//! Filesystem-backed destination
//!
//! Source definitions come from the inventory already in memory. Created
//! items are written to `<dest>/items/<new-id>.json`. New identifiers are
//! derived from (account, run id, source id), so they are stable for a
//! given run.

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use regex::Captures;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use super::{ClonedItem, Cloner, ClonerError, DestinationContext, RetryPolicy, UpdateOutcome};
use crate::domain::patterns::{replace_host, ID_TOKEN};
use crate::domain::{ContentItem, ItemId, ItemKind};
use crate::mapping::{MappingEntry, MappingKind, MappingSnapshot};
use crate::storage::{read_json, write_json_atomic};

const SITE_HOSTNAME: &str = "/values/defaultHostname";

/// Document written for each created item
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredItem {
    pub id: ItemId,
    pub source: ItemId,
    pub kind: ItemKind,
    pub title: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub folder: Option<String>,

    #[serde(default)]
    pub data: Value,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub text: BTreeMap<String, String>,
}

/// Lowercase alphanumerics and dashes
fn slug(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.trim().chars() {
        if c.is_ascii_alphanumeric() {
            out.push(c.to_ascii_lowercase());
        } else if !out.ends_with('-') {
            out.push('-');
        }
    }
    out.trim_matches('-').to_string()
}

/// Cloner that creates items as JSON files in a directory
pub struct DirectoryCloner {
    sources: HashMap<ItemId, ContentItem>,
    dest: PathBuf,
    retry: RetryPolicy,
}

impl DirectoryCloner {
    pub fn new(
        sources: impl IntoIterator<Item = ContentItem>,
        dest: impl Into<PathBuf>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            sources: sources.into_iter().map(|item| (item.id.clone(), item)).collect(),
            dest: dest.into(),
            retry,
        }
    }

    pub fn dest(&self) -> &Path {
        &self.dest
    }

    /// Path of a created item
    pub fn item_path(&self, new_id: &ItemId) -> PathBuf {
        self.dest.join("items").join(format!("{}.json", new_id))
    }

    /// Reads a created item back
    pub fn read_item(&self, new_id: &ItemId) -> anyhow::Result<StoredItem> {
        read_json(&self.item_path(new_id))
    }

    /// Destination URL of a cloned item
    ///
    /// The old id is swapped for the new one and the host for the
    /// destination host. Services with neither change move into a folder
    /// named after the account. Returns `None` if nothing changes.
    fn derive_url(
        url: &str,
        old: &ItemId,
        new: &ItemId,
        destination: &DestinationContext,
    ) -> Option<String> {
        let mut derived = ID_TOKEN
            .replace_all(url, |caps: &Captures<'_>| {
                if &caps[0] == old.as_str() {
                    new.to_string()
                } else {
                    caps[0].to_string()
                }
            })
            .into_owned();

        if let Some(host) = &destination.hostname {
            if let Some(moved) = replace_host(&derived, host) {
                derived = moved;
            }
        }

        if derived == url {
            if let Some((head, tail)) = url.split_once("/rest/services/") {
                derived = format!("{}/rest/services/{}/{}", head, slug(&destination.account), tail);
            }
        }

        (derived != url).then_some(derived)
    }

    /// Gives a cloned site its own hostname unless a seed already moved it
    fn site_hostname(
        &self,
        item: &ContentItem,
        definition: &mut Value,
        destination: &DestinationContext,
    ) -> Option<MappingEntry> {
        let source = self.sources.get(&item.id)?.definition.pointer(SITE_HOSTNAME)?.as_str()?;
        let current = definition.pointer_mut(SITE_HOSTNAME)?;
        if current.as_str() != Some(source) {
            return None;
        }

        let (label, rest) = source.split_once('.')?;
        let new_host = format!("{}-{}.{}", label, slug(&destination.account), rest);
        *current = Value::String(new_host.clone());
        Some(MappingEntry::new(MappingKind::Domain, source, new_host))
    }
}

impl Cloner for DirectoryCloner {
    fn name(&self) -> &str {
        "directory"
    }

    fn extract_definition(&self, item: &ItemId) -> Result<Value, ClonerError> {
        self.sources
            .get(item)
            .map(|source| source.definition.clone())
            .ok_or_else(|| ClonerError::Extraction {
                item: item.clone(),
                reason: "not present in the inventory".to_string(),
            })
    }

    fn clone_item(
        &self,
        item: &ContentItem,
        definition: Value,
        destination: &DestinationContext,
        _mappings: &MappingSnapshot,
    ) -> Result<ClonedItem, ClonerError> {
        let clone_error = |reason: String| ClonerError::Clone {
            item: item.id.clone(),
            reason,
        };

        let new_id = ItemId::derive(&[
            destination.account.as_str(),
            destination.run_id.as_str(),
            item.id.as_str(),
        ]);
        let path = self.item_path(&new_id);
        if path.exists() {
            return Err(clone_error(format!(
                "destination item already exists: {}",
                path.display()
            )));
        }

        let mut definition = definition;
        let mut mappings = Vec::new();
        if matches!(item.kind, ItemKind::HubSite | ItemKind::SiteApplication) {
            mappings.extend(self.site_hostname(item, &mut definition, destination));
        }

        let new_url = item
            .url
            .as_deref()
            .and_then(|url| Self::derive_url(url, &item.id, &new_id, destination));

        let stored = StoredItem {
            id: new_id.clone(),
            source: item.id.clone(),
            kind: item.kind,
            title: item.title.clone(),
            url: new_url.clone().or_else(|| item.url.clone()),
            folder: destination.folder.clone(),
            data: definition,
            text: item.text.clone(),
        };

        self.retry
            .run("write item", || write_json_atomic(&path, &stored))
            .map_err(|e| clone_error(format!("{:#}", e)))?;

        debug!(item = %item.id, new = %new_id, path = %path.display(), "Created item");

        Ok(ClonedItem {
            new_id,
            new_url,
            mappings,
        })
    }

    fn update_references(
        &self,
        new_id: &ItemId,
        mappings: &MappingSnapshot,
    ) -> Result<UpdateOutcome, ClonerError> {
        let update_error = |reason: String| ClonerError::Update {
            item: new_id.clone(),
            reason,
        };

        let path = self.item_path(new_id);
        let mut stored: StoredItem = self
            .retry
            .run("read item", || read_json(&path))
            .map_err(|e| update_error(format!("{:#}", e)))?;

        let data = mappings.rewrite_structured(&stored.data);
        let text = mappings.rewrite_payloads(&stored.text);
        if data.replaced + text.replaced == 0 {
            return Ok(UpdateOutcome::applied());
        }

        stored.data = data.value;
        stored.text = text.value;

        self.retry
            .run("write item", || write_json_atomic(&path, &stored))
            .map_err(|e| update_error(format!("{:#}", e)))?;

        debug!(item = %new_id, replaced = data.replaced + text.replaced, "Updated references");
        Ok(UpdateOutcome::applied())
    }

    fn delete_item(&self, new_id: &ItemId) -> Result<(), ClonerError> {
        let path = self.item_path(new_id);
        self.retry
            .run("delete item", || match fs::remove_file(&path) {
                Err(e) if e.kind() != ErrorKind::NotFound => Err(e),
                _ => Ok(()),
            })
            .map_err(|e| ClonerError::Delete {
                item: new_id.clone(),
                reason: e.to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mapping::MappingTables;
    use serde_json::json;
    use tempfile::TempDir;

    fn id(n: u8) -> ItemId {
        format!("{:032x}", n).parse().unwrap()
    }

    fn destination(hostname: Option<&str>) -> DestinationContext {
        DestinationContext {
            account: "Parks Dept".into(),
            folder: Some("migrated".into()),
            hostname: hostname.map(str::to_string),
            run_id: "run-1".into(),
        }
    }

    #[test]
    fn slugs() {
        assert_eq!(slug("Parks Dept"), "parks-dept");
        assert_eq!(slug("  a__b  "), "a-b");
    }

    #[test]
    fn clone_writes_item_and_derives_url() {
        let dir = TempDir::new().unwrap();
        let layer = ContentItem::new(id(1), ItemKind::FeatureService, "Parcels")
            .with_url("https://services.example.com/org/arcgis/rest/services/Parcels/FeatureServer");
        let cloner = DirectoryCloner::new([layer.clone()], dir.path(), RetryPolicy::none());

        let def = cloner.extract_definition(&id(1)).unwrap();
        let cloned = cloner
            .clone_item(&layer, def, &destination(None), &MappingSnapshot::default())
            .unwrap();

        assert_eq!(cloned.new_id, ItemId::derive(&["Parks Dept", "run-1", id(1).as_str()]));
        assert_eq!(
            cloned.new_url.as_deref(),
            Some("https://services.example.com/org/arcgis/rest/services/parks-dept/Parcels/FeatureServer")
        );

        let stored = cloner.read_item(&cloned.new_id).unwrap();
        assert_eq!(stored.source, id(1));
        assert_eq!(stored.folder.as_deref(), Some("migrated"));
    }

    #[test]
    fn url_with_id_and_hostname() {
        let old = id(1);
        let new = id(2);
        let url = format!("https://src.maps.example.com/home/item.html?id={}", old);

        let derived =
            DirectoryCloner::derive_url(&url, &old, &new, &destination(Some("dst.maps.example.com")));
        assert_eq!(
            derived,
            Some(format!("https://dst.maps.example.com/home/item.html?id={}", new))
        );
    }

    #[test]
    fn url_id_swap_stops_at_token_boundaries() {
        let old = id(1);
        let new = id(2);
        let url = format!(
            "https://src.maps.example.com/files/{}0/data?owner={}",
            old, old
        );

        let derived = DirectoryCloner::derive_url(&url, &old, &new, &destination(None));
        assert_eq!(
            derived,
            Some(format!(
                "https://src.maps.example.com/files/{}0/data?owner={}",
                old, new
            ))
        );
    }

    #[test]
    fn unknown_source_is_extraction_failure() {
        let dir = TempDir::new().unwrap();
        let cloner = DirectoryCloner::new([], dir.path(), RetryPolicy::none());
        assert!(matches!(
            cloner.extract_definition(&id(9)),
            Err(ClonerError::Extraction { .. })
        ));
    }

    #[test]
    fn second_clone_into_same_run_fails() {
        let dir = TempDir::new().unwrap();
        let map = ContentItem::new(id(1), ItemKind::WebMap, "Map");
        let cloner = DirectoryCloner::new([map.clone()], dir.path(), RetryPolicy::none());
        let snapshot = MappingSnapshot::default();

        cloner.clone_item(&map, json!({}), &destination(None), &snapshot).unwrap();
        let err = cloner
            .clone_item(&map, json!({}), &destination(None), &snapshot)
            .unwrap_err();
        assert!(matches!(err, ClonerError::Clone { .. }));
    }

    #[test]
    fn site_gets_new_hostname_mapping() {
        let dir = TempDir::new().unwrap();
        let site = ContentItem::new(id(1), ItemKind::HubSite, "Parks")
            .with_definition(json!({"values": {"defaultHostname": "parks-src.hub.example.com"}}));
        let cloner = DirectoryCloner::new([site.clone()], dir.path(), RetryPolicy::none());

        let cloned = cloner
            .clone_item(&site, site.definition.clone(), &destination(None), &MappingSnapshot::default())
            .unwrap();

        assert_eq!(
            cloned.mappings,
            vec![MappingEntry::new(
                MappingKind::Domain,
                "parks-src.hub.example.com",
                "parks-src-parks-dept.hub.example.com"
            )]
        );
        let stored = cloner.read_item(&cloned.new_id).unwrap();
        assert_eq!(stored.data["values"]["defaultHostname"], "parks-src-parks-dept.hub.example.com");
    }

    #[test]
    fn update_references_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let dash = ContentItem::new(id(1), ItemKind::Dashboard, "Dash")
            .with_definition(json!({"widgets": [{"itemId": id(5).to_string()}]}));
        let cloner = DirectoryCloner::new([dash.clone()], dir.path(), RetryPolicy::none());
        let cloned = cloner
            .clone_item(&dash, dash.definition.clone(), &destination(None), &MappingSnapshot::default())
            .unwrap();

        let mut tables = MappingTables::new();
        tables
            .record(MappingKind::Identifier, id(5).as_str(), id(55).as_str())
            .unwrap();
        let snapshot = MappingSnapshot::new(tables);

        assert!(cloner.update_references(&cloned.new_id, &snapshot).unwrap().applied);
        let once = cloner.read_item(&cloned.new_id).unwrap();
        assert!(cloner.update_references(&cloned.new_id, &snapshot).unwrap().applied);
        let twice = cloner.read_item(&cloned.new_id).unwrap();

        assert_eq!(once.data["widgets"][0]["itemId"], json!(id(55).to_string()));
        assert_eq!(once, twice);
    }

    #[test]
    fn update_of_missing_item_fails() {
        let dir = TempDir::new().unwrap();
        let cloner = DirectoryCloner::new([], dir.path(), RetryPolicy::none());
        assert!(matches!(
            cloner.update_references(&id(3), &MappingSnapshot::default()),
            Err(ClonerError::Update { .. })
        ));
    }

    #[test]
    fn delete_removes_file_and_tolerates_absence() {
        let dir = TempDir::new().unwrap();
        let map = ContentItem::new(id(1), ItemKind::WebMap, "Map");
        let cloner = DirectoryCloner::new([map.clone()], dir.path(), RetryPolicy::none());
        let cloned = cloner
            .clone_item(&map, json!({}), &destination(None), &MappingSnapshot::default())
            .unwrap();

        cloner.delete_item(&cloned.new_id).unwrap();
        assert!(!cloner.item_path(&cloned.new_id).exists());
        cloner.delete_item(&cloned.new_id).unwrap();
    }
}
