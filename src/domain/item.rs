//! Content item domain model
//!
//! Items are the hosted content objects being migrated. Each carries a
//! kind decided once at discovery, a structured definition, and optional
//! free-text payloads (scripts, markup).

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

use super::id::ItemId;

/// Closed set of content kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemKind {
    FeatureService,
    Table,
    MapService,
    VectorTileService,
    ImageService,
    SceneService,
    /// Filtered view over a hosted layer
    View,
    JoinView,
    Form,
    WebMap,
    WebScene,
    Dashboard,
    WebMappingApplication,
    InstantApp,
    StoryMap,
    ExperienceBuilder,
    HubSite,
    SiteApplication,
    HubPage,
    SitePage,
    Notebook,
    Document,
    Other,
}

impl ItemKind {
    /// Classifies an item from its platform type name and type keywords
    ///
    /// Keywords win over the type name: a view is published as a
    /// "Feature Service" and only its keywords tell it apart.
    pub fn classify(type_name: &str, type_keywords: &[String]) -> Self {
        let has = |kw: &str| type_keywords.iter().any(|k| k == kw);

        if has("Join View") || has("joinedView") {
            return ItemKind::JoinView;
        }
        if has("View Service") {
            return ItemKind::View;
        }
        if has("Experience") || has("ExB") {
            return ItemKind::ExperienceBuilder;
        }
        if has("Instant App") {
            return ItemKind::InstantApp;
        }

        match type_name {
            "Feature Service" | "Feature Layer" => ItemKind::FeatureService,
            "Table" => ItemKind::Table,
            "Map Service" => ItemKind::MapService,
            "Vector Tile Service" => ItemKind::VectorTileService,
            "Image Service" => ItemKind::ImageService,
            "Scene Service" => ItemKind::SceneService,
            "View Service" => ItemKind::View,
            "Join View" => ItemKind::JoinView,
            "Form" => ItemKind::Form,
            "Web Map" => ItemKind::WebMap,
            "Web Scene" => ItemKind::WebScene,
            "Dashboard" => ItemKind::Dashboard,
            "Web Mapping Application" => ItemKind::WebMappingApplication,
            "Instant App" => ItemKind::InstantApp,
            "StoryMap" => ItemKind::StoryMap,
            "Web Experience" | "Experience Builder" => ItemKind::ExperienceBuilder,
            "Hub Site Application" => ItemKind::HubSite,
            "Site Application" => ItemKind::SiteApplication,
            "Hub Page" => ItemKind::HubPage,
            "Site Page" => ItemKind::SitePage,
            "Notebook" => ItemKind::Notebook,
            "Document" | "PDF" | "Microsoft Word" => ItemKind::Document,
            _ => ItemKind::Other,
        }
    }

    /// Migration priority (lower migrates first within a level)
    pub fn priority(&self) -> u8 {
        match self {
            ItemKind::FeatureService
            | ItemKind::Table
            | ItemKind::MapService
            | ItemKind::VectorTileService
            | ItemKind::ImageService
            | ItemKind::SceneService => 0,
            ItemKind::View => 1,
            ItemKind::JoinView => 2,
            ItemKind::Form => 3,
            ItemKind::WebMap | ItemKind::WebScene => 4,
            ItemKind::Dashboard
            | ItemKind::WebMappingApplication
            | ItemKind::InstantApp
            | ItemKind::StoryMap => 5,
            ItemKind::ExperienceBuilder => 6,
            ItemKind::HubSite | ItemKind::SiteApplication | ItemKind::HubPage | ItemKind::SitePage => 7,
            ItemKind::Notebook | ItemKind::Document => 8,
            ItemKind::Other => 9,
        }
    }

    /// Human-readable label
    pub fn label(&self) -> &'static str {
        match self {
            ItemKind::FeatureService => "Feature Service",
            ItemKind::Table => "Table",
            ItemKind::MapService => "Map Service",
            ItemKind::VectorTileService => "Vector Tile Service",
            ItemKind::ImageService => "Image Service",
            ItemKind::SceneService => "Scene Service",
            ItemKind::View => "View",
            ItemKind::JoinView => "Join View",
            ItemKind::Form => "Form",
            ItemKind::WebMap => "Web Map",
            ItemKind::WebScene => "Web Scene",
            ItemKind::Dashboard => "Dashboard",
            ItemKind::WebMappingApplication => "Web Mapping Application",
            ItemKind::InstantApp => "Instant App",
            ItemKind::StoryMap => "StoryMap",
            ItemKind::ExperienceBuilder => "Experience Builder",
            ItemKind::HubSite => "Hub Site",
            ItemKind::SiteApplication => "Site Application",
            ItemKind::HubPage => "Hub Page",
            ItemKind::SitePage => "Site Page",
            ItemKind::Notebook => "Notebook",
            ItemKind::Document => "Document",
            ItemKind::Other => "Other",
        }
    }
}

impl fmt::Display for ItemKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Lifecycle of an item within one migration run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ItemState {
    #[default]
    Discovered,
    Leveled,
    Cloning,
    Cloned,
    ReferencesRewritten,
    Finalized,
    CloneFailed,
    /// Skipped because a dependency failed to clone
    Blocked,
}

impl ItemState {
    /// Returns true if `next` is a legal successor of this state
    pub fn can_transition_to(&self, next: ItemState) -> bool {
        use ItemState::*;
        matches!(
            (self, next),
            (Discovered, Leveled)
                | (Leveled, Cloning)
                | (Leveled, Blocked)
                | (Cloning, Cloned)
                | (Cloning, CloneFailed)
                | (Cloned, ReferencesRewritten)
                | (Cloned, Finalized)
                | (ReferencesRewritten, Finalized)
        )
    }

    /// Returns true if the item exists in the destination
    pub fn is_created(&self) -> bool {
        matches!(
            self,
            ItemState::Cloned | ItemState::ReferencesRewritten | ItemState::Finalized
        )
    }
}

impl fmt::Display for ItemState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ItemState::Discovered => "discovered",
            ItemState::Leveled => "leveled",
            ItemState::Cloning => "cloning",
            ItemState::Cloned => "cloned",
            ItemState::ReferencesRewritten => "references_rewritten",
            ItemState::Finalized => "finalized",
            ItemState::CloneFailed => "clone_failed",
            ItemState::Blocked => "blocked",
        };
        f.write_str(s)
    }
}

/// A unit of hosted content
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentItem {
    pub id: ItemId,

    pub kind: ItemKind,

    #[serde(default)]
    pub title: String,

    /// Service URL for layer-backed items
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,

    /// Raw structured definition
    #[serde(default)]
    pub definition: Value,

    /// Free-text payloads keyed by field name (scripts, embed markup)
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub text: BTreeMap<String, String>,
}

impl ContentItem {
    /// Creates an item with an empty definition
    pub fn new(id: ItemId, kind: ItemKind, title: impl Into<String>) -> Self {
        Self {
            id,
            kind,
            title: title.into(),
            url: None,
            definition: Value::Null,
            text: BTreeMap::new(),
        }
    }

    /// Sets the structured definition
    pub fn with_definition(mut self, definition: Value) -> Self {
        self.definition = definition;
        self
    }

    /// Sets the service URL
    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    /// Adds a free-text payload
    pub fn with_text(mut self, field: impl Into<String>, text: impl Into<String>) -> Self {
        self.text.insert(field.into(), text.into());
        self
    }
}
