//! Write-once correspondence tables
//!
//! Six tables map old values to their destination counterparts. Each key
//! is written at most once per run; a second write with the same value is
//! a no-op and a second write with a different value is a conflict.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::ops::Deref;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn};

use crate::domain::patterns::{host_of, normalize_url, numeric_tail, replace_host, service_base};
use crate::domain::ItemId;

/// The kinds of correspondence tracked during a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MappingKind {
    Identifier,
    Url,
    ServiceUrl,
    SublayerUrl,
    Group,
    Domain,
}

impl MappingKind {
    pub const ALL: [MappingKind; 6] = [
        MappingKind::Identifier,
        MappingKind::Url,
        MappingKind::ServiceUrl,
        MappingKind::SublayerUrl,
        MappingKind::Group,
        MappingKind::Domain,
    ];

    /// Returns true for the three URL-valued kinds
    pub fn is_url(&self) -> bool {
        matches!(
            self,
            MappingKind::Url | MappingKind::ServiceUrl | MappingKind::SublayerUrl
        )
    }
}

impl fmt::Display for MappingKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            MappingKind::Identifier => "identifier",
            MappingKind::Url => "url",
            MappingKind::ServiceUrl => "service_url",
            MappingKind::SublayerUrl => "sublayer_url",
            MappingKind::Group => "group",
            MappingKind::Domain => "domain",
        };
        f.write_str(s)
    }
}

/// One old -> new correspondence
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MappingEntry {
    pub kind: MappingKind,
    pub old: String,
    pub new: String,
}

impl MappingEntry {
    pub fn new(kind: MappingKind, old: impl Into<String>, new: impl Into<String>) -> Self {
        Self {
            kind,
            old: old.into(),
            new: new.into(),
        }
    }

    pub fn identifier(old: &ItemId, new: &ItemId) -> Self {
        Self::new(MappingKind::Identifier, old.as_str(), new.as_str())
    }
}

#[derive(Debug, Error, PartialEq)]
pub enum MappingError {
    #[error("Mapping conflict for {kind} '{old}': already mapped to '{existing}', refused '{attempted}'")]
    Conflict {
        kind: MappingKind,
        old: String,
        existing: String,
        attempted: String,
    },

    #[error("Empty {0} mapping value")]
    Empty(MappingKind),
}

/// Outcome of a successful write
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Recorded {
    Inserted,
    /// The same value was already present
    Unchanged,
}

/// The six correspondence tables
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MappingTables {
    pub identifiers: BTreeMap<String, String>,
    pub urls: BTreeMap<String, String>,
    pub service_urls: BTreeMap<String, String>,
    pub sublayer_urls: BTreeMap<String, String>,
    pub groups: BTreeMap<String, String>,
    pub domains: BTreeMap<String, String>,
}

/// Canonical form of a table key
fn normalize_key(kind: MappingKind, value: &str) -> String {
    match kind {
        MappingKind::Url | MappingKind::ServiceUrl | MappingKind::SublayerUrl => {
            normalize_url(value)
        }
        MappingKind::Domain => value.trim().trim_end_matches('.').to_ascii_lowercase(),
        MappingKind::Identifier | MappingKind::Group => value.trim().to_string(),
    }
}

/// Longest boundary-aware prefix of `url` present in `table`, with the remainder re-attached
fn prefix_lookup(table: &BTreeMap<String, String>, url: &str) -> Option<String> {
    let mut end = url.len();
    loop {
        if let Some(new) = table.get(&url[..end]) {
            return Some(format!("{}{}", new, &url[end..]));
        }
        end = url[..end].rfind(['/', '?', '#'])?;
        if url[..end].ends_with(':') || url[..end].ends_with('/') {
            return None;
        }
    }
}

impl MappingTables {
    pub fn new() -> Self {
        Self::default()
    }

    fn table(&self, kind: MappingKind) -> &BTreeMap<String, String> {
        match kind {
            MappingKind::Identifier => &self.identifiers,
            MappingKind::Url => &self.urls,
            MappingKind::ServiceUrl => &self.service_urls,
            MappingKind::SublayerUrl => &self.sublayer_urls,
            MappingKind::Group => &self.groups,
            MappingKind::Domain => &self.domains,
        }
    }

    fn table_mut(&mut self, kind: MappingKind) -> &mut BTreeMap<String, String> {
        match kind {
            MappingKind::Identifier => &mut self.identifiers,
            MappingKind::Url => &mut self.urls,
            MappingKind::ServiceUrl => &mut self.service_urls,
            MappingKind::SublayerUrl => &mut self.sublayer_urls,
            MappingKind::Group => &mut self.groups,
            MappingKind::Domain => &mut self.domains,
        }
    }

    fn insert(&mut self, kind: MappingKind, old: &str, new: &str) -> Result<Recorded, MappingError> {
        let key = normalize_key(kind, old);
        let value = normalize_key(kind, new);
        if key.is_empty() || value.is_empty() {
            return Err(MappingError::Empty(kind));
        }

        match self.table(kind).get(&key) {
            Some(existing) if *existing == value => Ok(Recorded::Unchanged),
            Some(existing) => Err(MappingError::Conflict {
                kind,
                old: key,
                existing: existing.clone(),
                attempted: value,
            }),
            None => {
                debug!(%kind, old = %key, new = %value, "Recorded mapping");
                self.table_mut(kind).insert(key, value);
                Ok(Recorded::Inserted)
            }
        }
    }

    /// Records `old -> new` for `kind`
    ///
    /// A full URL pair also yields a service-base entry and, when the old
    /// URL ends in a numeric layer segment, a sub-layer entry. Derived
    /// entries never override an existing one; a clash is logged and skipped.
    pub fn record(&mut self, kind: MappingKind, old: &str, new: &str) -> Result<Recorded, MappingError> {
        let recorded = self.insert(kind, old, new)?;

        if kind == MappingKind::Url {
            let old_norm = normalize_url(old);
            let new_norm = normalize_url(new);

            if let (Some(old_base), Some(new_base)) = (service_base(&old_norm), service_base(&new_norm)) {
                self.record_derived(MappingKind::ServiceUrl, &old_base, &new_base);
            }
            if numeric_tail(&old_norm).is_some() {
                self.record_derived(MappingKind::SublayerUrl, &old_norm, &new_norm);
            }
        }

        Ok(recorded)
    }

    fn record_derived(&mut self, kind: MappingKind, old: &str, new: &str) {
        if let Err(err) = self.insert(kind, old, new) {
            warn!(error = %err, "Skipped derived mapping");
        }
    }

    /// Records an entry produced elsewhere (cloner extras, seeds)
    pub fn record_entry(&mut self, entry: &MappingEntry) -> Result<Recorded, MappingError> {
        self.record(entry.kind, &entry.old, &entry.new)
    }

    /// Looks up `old` in the table for `kind`
    ///
    /// URLs go through [`MappingTables::resolve_url`]; every other kind is
    /// an exact lookup on the normalized key.
    pub fn resolve(&self, kind: MappingKind, old: &str) -> Option<String> {
        match kind {
            MappingKind::Url => self.resolve_url(old),
            _ => self.table(kind).get(&normalize_key(kind, old)).cloned(),
        }
    }

    /// Resolves an item identifier
    pub fn resolve_id(&self, old: &str) -> Option<String> {
        self.identifiers.get(old.trim()).cloned()
    }

    /// Resolves a URL by precedence
    ///
    /// exact URL > sub-layer prefix > service-base prefix > host swap
    pub fn resolve_url(&self, url: &str) -> Option<String> {
        let norm = normalize_url(url);
        if norm.is_empty() {
            return None;
        }

        if let Some(new) = self.urls.get(&norm) {
            return Some(new.clone());
        }
        if let Some(new) = prefix_lookup(&self.sublayer_urls, &norm) {
            return Some(new);
        }
        if let Some(new) = prefix_lookup(&self.service_urls, &norm) {
            return Some(new);
        }

        let host = host_of(&norm)?;
        let new_host = self.domains.get(&host)?;
        replace_host(&norm, new_host)
    }

    /// Returns true if `value` is an old key of the table for `kind`
    pub fn is_mapped(&self, kind: MappingKind, value: &str) -> bool {
        self.table(kind).contains_key(&normalize_key(kind, value))
    }

    /// Returns all entries, table by table
    pub fn entries(&self) -> Vec<MappingEntry> {
        MappingKind::ALL
            .iter()
            .flat_map(|kind| {
                self.table(*kind)
                    .iter()
                    .map(move |(old, new)| MappingEntry::new(*kind, old.clone(), new.clone()))
            })
            .collect()
    }

    /// Returns the number of entries in the table for `kind`
    pub fn count(&self, kind: MappingKind) -> usize {
        self.table(kind).len()
    }

    /// Returns the total number of entries
    pub fn len(&self) -> usize {
        MappingKind::ALL.iter().map(|k| self.count(*k)).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Immutable view of the tables handed to workers and cloners
#[derive(Debug, Clone, Default)]
pub struct MappingSnapshot(Arc<MappingTables>);

impl MappingSnapshot {
    pub fn new(tables: MappingTables) -> Self {
        Self(Arc::new(tables))
    }

    /// Number of entries the snapshot was taken with
    pub fn generation(&self) -> usize {
        self.0.len()
    }
}

impl Deref for MappingSnapshot {
    type Target = MappingTables;

    fn deref(&self) -> &MappingTables {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const OLD_SVC: &str = "https://services.example.com/src/arcgis/rest/services/Parcels/FeatureServer";
    const NEW_SVC: &str = "https://services.example.com/dst/arcgis/rest/services/Parcels_1/FeatureServer";

    #[test]
    fn record_is_write_once() {
        let mut tables = MappingTables::new();
        assert_eq!(tables.record(MappingKind::Identifier, "a", "b"), Ok(Recorded::Inserted));
        assert_eq!(tables.record(MappingKind::Identifier, "a", "b"), Ok(Recorded::Unchanged));

        let err = tables.record(MappingKind::Identifier, "a", "c").unwrap_err();
        assert_eq!(
            err,
            MappingError::Conflict {
                kind: MappingKind::Identifier,
                old: "a".into(),
                existing: "b".into(),
                attempted: "c".into(),
            }
        );
        assert_eq!(tables.resolve(MappingKind::Identifier, "a"), Some("b".into()));
    }

    #[test]
    fn empty_values_rejected() {
        let mut tables = MappingTables::new();
        assert_eq!(
            tables.record(MappingKind::Group, " ", "x"),
            Err(MappingError::Empty(MappingKind::Group))
        );
    }

    #[test]
    fn url_keys_are_normalized() {
        let mut tables = MappingTables::new();
        tables
            .record(MappingKind::Url, "HTTPS://Services.Example.com/src/x/FeatureServer/", NEW_SVC)
            .unwrap();
        assert_eq!(
            tables.resolve_url("https://services.example.com/src/x/FeatureServer"),
            Some(NEW_SVC.into())
        );
    }

    #[test]
    fn url_record_derives_service_and_sublayer() {
        let mut tables = MappingTables::new();
        let old = format!("{}/0", OLD_SVC);
        let new = format!("{}/0", NEW_SVC);
        tables.record(MappingKind::Url, &old, &new).unwrap();

        assert_eq!(tables.resolve(MappingKind::ServiceUrl, OLD_SVC), Some(NEW_SVC.into()));
        assert_eq!(tables.resolve(MappingKind::SublayerUrl, &old), Some(new.clone()));

        // sibling sub-layer through the service prefix
        assert_eq!(
            tables.resolve_url(&format!("{}/3", OLD_SVC)),
            Some(format!("{}/3", NEW_SVC))
        );
        // query below the mapped sub-layer
        assert_eq!(
            tables.resolve_url(&format!("{}/0/query?where=1=1", OLD_SVC)),
            Some(format!("{}/0/query?where=1=1", NEW_SVC))
        );
    }

    #[test]
    fn sublayer_beats_service_prefix() {
        let mut tables = MappingTables::new();
        tables.record(MappingKind::ServiceUrl, OLD_SVC, NEW_SVC).unwrap();
        tables
            .record(MappingKind::SublayerUrl, &format!("{}/0", OLD_SVC), &format!("{}/2", NEW_SVC))
            .unwrap();

        assert_eq!(
            tables.resolve_url(&format!("{}/0", OLD_SVC)),
            Some(format!("{}/2", NEW_SVC))
        );
        assert_eq!(
            tables.resolve_url(&format!("{}/1", OLD_SVC)),
            Some(format!("{}/1", NEW_SVC))
        );
    }

    #[test]
    fn exact_beats_everything() {
        let mut tables = MappingTables::new();
        tables.record(MappingKind::ServiceUrl, OLD_SVC, NEW_SVC).unwrap();
        let old = format!("{}/0", OLD_SVC);
        tables.record(MappingKind::Url, &old, "https://elsewhere.example.com/layer").unwrap();

        assert_eq!(tables.resolve_url(&old), Some("https://elsewhere.example.com/layer".into()));
    }

    #[test]
    fn prefix_requires_path_boundary() {
        let mut tables = MappingTables::new();
        tables.record(MappingKind::ServiceUrl, OLD_SVC, NEW_SVC).unwrap();
        assert_eq!(tables.resolve_url(&format!("{}2/0", OLD_SVC)), None);
    }

    #[test]
    fn longest_prefix_wins() {
        let mut tables = MappingTables::new();
        tables
            .record(MappingKind::ServiceUrl, "https://h.example.com/a", "https://n.example.com/a")
            .unwrap();
        tables
            .record(MappingKind::ServiceUrl, "https://h.example.com/a/b", "https://n.example.com/z")
            .unwrap();

        assert_eq!(
            tables.resolve_url("https://h.example.com/a/b/c"),
            Some("https://n.example.com/z/c".into())
        );
    }

    #[test]
    fn domain_swap_is_last_resort() {
        let mut tables = MappingTables::new();
        tables.record(MappingKind::Domain, "Old.Example.com", "new.example.com").unwrap();

        assert_eq!(
            tables.resolve_url("https://old.example.com/home/index.html?x=1"),
            Some("https://new.example.com/home/index.html?x=1".into())
        );
        assert_eq!(tables.resolve(MappingKind::Domain, "OLD.example.com"), Some("new.example.com".into()));
        assert_eq!(tables.resolve_url("https://other.example.com/a"), None);
    }

    #[test]
    fn derived_conflict_is_skipped() {
        let mut tables = MappingTables::new();
        tables
            .record(MappingKind::ServiceUrl, OLD_SVC, "https://pinned.example.com/FeatureServer")
            .unwrap();
        tables
            .record(MappingKind::Url, &format!("{}/0", OLD_SVC), &format!("{}/0", NEW_SVC))
            .unwrap();

        assert_eq!(
            tables.resolve(MappingKind::ServiceUrl, OLD_SVC),
            Some("https://pinned.example.com/FeatureServer".into())
        );
    }

    #[test]
    fn entries_and_counts() {
        let mut tables = MappingTables::new();
        tables.record(MappingKind::Identifier, "a", "b").unwrap();
        tables.record(MappingKind::Group, "g1", "g2").unwrap();

        assert_eq!(tables.len(), 2);
        assert_eq!(
            tables.entries(),
            vec![
                MappingEntry::new(MappingKind::Identifier, "a", "b"),
                MappingEntry::new(MappingKind::Group, "g1", "g2"),
            ]
        );
    }

    #[test]
    fn snapshot_is_independent_of_later_writes() {
        let mut tables = MappingTables::new();
        tables.record(MappingKind::Identifier, "a", "b").unwrap();
        let snapshot = MappingSnapshot::new(tables.clone());
        tables.record(MappingKind::Identifier, "c", "d").unwrap();

        assert_eq!(snapshot.generation(), 1);
        assert_eq!(snapshot.resolve_id("c"), None);
    }

    #[test]
    fn tables_serialize_by_kind() {
        let mut tables = MappingTables::new();
        tables.record(MappingKind::Domain, "a.example.com", "b.example.com").unwrap();
        let json = serde_json::to_value(&tables).unwrap();
        assert_eq!(json["domains"]["a.example.com"], "b.example.com");

        let parsed: MappingTables = serde_json::from_str(r#"{"identifiers": {"x": "y"}}"#).unwrap();
        assert_eq!(parsed.resolve_id("x"), Some("y".into()));
    }
}
