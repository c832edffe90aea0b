//! Reference extraction
//!
//! Discovers which other items an item depends on by inspecting its
//! definition. Each kind has a small visitor that knows where that kind
//! keeps its references and checks that those places have the expected
//! shape. Every kind also gets the generic scan: allow-listed keys in the
//! structured definition plus identifier and URL tokens in free text.

use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeSet;
use thiserror::Error;

use super::id::{is_id_shaped, ItemId};
use super::item::{ContentItem, ItemKind};
use super::patterns::{
    is_service_url, normalize_url, trim_url_punctuation, KeyClass, UrlShape, ID_TOKEN, TEXT_TOKEN,
};
use super::value::for_each_string;

#[derive(Debug, Error, PartialEq)]
pub enum ExtractError {
    #[error("Malformed definition at '{pointer}': expected {expected}")]
    Malformed {
        pointer: String,
        expected: &'static str,
    },
}

/// A dependency discovered in a definition
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Reference {
    Item(ItemId),
    /// Normalized service or layer URL
    Url(String),
}

/// Extracts the set of references an item depends on
///
/// The item's own identifier is never part of the result.
pub fn extract_references(item: &ContentItem) -> Result<BTreeSet<Reference>, ExtractError> {
    let mut refs = BTreeSet::new();
    let def = &item.definition;

    match item.kind {
        ItemKind::WebMap | ItemKind::WebScene => visit_map(def, &mut refs)?,
        ItemKind::Dashboard => visit_dashboard(def)?,
        ItemKind::WebMappingApplication | ItemKind::InstantApp | ItemKind::StoryMap => {
            visit_application(def, &mut refs)?
        }
        ItemKind::ExperienceBuilder => visit_experience(def)?,
        ItemKind::View | ItemKind::JoinView | ItemKind::Form => visit_view(def, &mut refs)?,
        ItemKind::HubSite | ItemKind::SiteApplication | ItemKind::HubPage | ItemKind::SitePage => {
            visit_site(def, &mut refs)?
        }
        ItemKind::Notebook => visit_notebook(def)?,
        _ => {}
    }

    scan_structured(def, &mut refs);
    for text in item.text.values() {
        scan_text(text, &mut refs);
    }

    refs.remove(&Reference::Item(item.id.clone()));
    Ok(refs)
}

/// Generic scan of allow-listed keys
pub fn scan_structured(value: &Value, refs: &mut BTreeSet<Reference>) {
    for_each_string(value, &mut |leaf, s| match KeyClass::of(leaf.key) {
        KeyClass::Identifier => add_identifier(s, refs),
        KeyClass::Url => add_url(s, refs),
        KeyClass::Text => scan_text(s, refs),
        KeyClass::Group | KeyClass::Domain | KeyClass::Other => {}
    });
}

/// Scans free text for URLs and identifier-shaped tokens
pub fn scan_text(text: &str, refs: &mut BTreeSet<Reference>) {
    for caps in TEXT_TOKEN.captures_iter(text) {
        if let Some(url) = caps.name("url") {
            add_url(url.as_str(), refs);
        } else if let Some(id) = caps.name("id") {
            add_identifier(id.as_str(), refs);
        }
    }
}

fn add_identifier(s: &str, refs: &mut BTreeSet<Reference>) {
    if is_id_shaped(s) {
        if let Ok(id) = s.parse() {
            refs.insert(Reference::Item(id));
        }
    }
}

fn add_url(raw: &str, refs: &mut BTreeSet<Reference>) {
    let (url, _) = trim_url_punctuation(raw.trim());
    if !url.starts_with("http://") && !url.starts_with("https://") {
        return;
    }
    for id in ID_TOKEN.find_iter(url) {
        add_identifier(id.as_str(), refs);
    }
    if UrlShape::classify(url).carries_identifier() {
        return;
    }
    if is_service_url(url) {
        refs.insert(Reference::Url(normalize_url(url)));
    }
}

fn malformed(pointer: &str, expected: &'static str) -> ExtractError {
    ExtractError::Malformed {
        pointer: pointer.to_string(),
        expected,
    }
}

/// Root must be an object (or absent)
fn expect_root_object(def: &Value) -> Result<(), ExtractError> {
    match def {
        Value::Null | Value::Object(_) => Ok(()),
        _ => Err(malformed("", "object")),
    }
}

/// Returns the array at `pointer`, if present
fn array_at<'a>(def: &'a Value, pointer: &str) -> Result<Option<&'a Vec<Value>>, ExtractError> {
    match def.pointer(pointer) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Array(items)) => Ok(Some(items)),
        Some(_) => Err(malformed(pointer, "array")),
    }
}

/// Returns the elements of an array or the values of an object at `pointer`
fn members_at<'a>(def: &'a Value, pointer: &str) -> Result<Vec<&'a Value>, ExtractError> {
    match def.pointer(pointer) {
        None | Some(Value::Null) => Ok(Vec::new()),
        Some(Value::Array(items)) => Ok(items.iter().collect()),
        Some(Value::Object(map)) => Ok(map.values().collect()),
        Some(_) => Err(malformed(pointer, "array or object")),
    }
}

fn visit_map(def: &Value, refs: &mut BTreeSet<Reference>) -> Result<(), ExtractError> {
    expect_root_object(def)?;

    for pointer in ["/operationalLayers", "/tables", "/baseMap/baseMapLayers"] {
        if let Some(layers) = array_at(def, pointer)? {
            visit_layers(layers, pointer, refs)?;
        }
    }
    Ok(())
}

/// Layer lists nest through group layers
fn visit_layers(
    layers: &[Value],
    pointer: &str,
    refs: &mut BTreeSet<Reference>,
) -> Result<(), ExtractError> {
    for (i, layer) in layers.iter().enumerate() {
        let here = format!("{}/{}", pointer, i);
        if !layer.is_object() {
            return Err(malformed(&here, "layer object"));
        }
        if let Some(Value::String(id)) = layer.get("itemId") {
            add_identifier(id, refs);
        }
        if let Some(Value::String(url)) = layer.get("url") {
            add_url(url, refs);
        }
        if let Some(children) = array_at(layer, "/layers")? {
            visit_layers(children, &format!("{}/layers", here), refs)?;
        }
    }
    Ok(())
}

fn visit_dashboard(def: &Value) -> Result<(), ExtractError> {
    expect_root_object(def)?;

    // Widget and data source containers come as lists in older dashboards
    // and as id-keyed maps in newer ones; the generic scan reads their content.
    for pointer in [
        "/widgets",
        "/desktopView/widgets",
        "/mobileView/widgets",
        "/dataSources",
        "/headerPanel/selectors",
        "/leftPanel/selectors",
    ] {
        for widget in members_at(def, pointer)? {
            if !widget.is_object() {
                return Err(malformed(pointer, "widget objects"));
            }
        }
    }

    for pointer in ["/dataExpressions", "/arcadeDataSourceItems"] {
        if let Some(items) = array_at(def, pointer)? {
            if items.iter().any(|item| !item.is_object()) {
                return Err(malformed(pointer, "data expression objects"));
            }
        }
    }
    Ok(())
}

fn visit_application(def: &Value, refs: &mut BTreeSet<Reference>) -> Result<(), ExtractError> {
    expect_root_object(def)?;

    match def.get("values") {
        None | Some(Value::Null) | Some(Value::Object(_)) => {}
        Some(_) => return Err(malformed("/values", "object")),
    }

    if let Some(items) = array_at(def, "/values/mapItemCollection")? {
        for item in items {
            match item {
                Value::String(id) => add_identifier(id, refs),
                Value::Object(obj) => {
                    if let Some(Value::String(id)) = obj.get("id") {
                        add_identifier(id, refs);
                    }
                }
                _ => return Err(malformed("/values/mapItemCollection", "identifiers")),
            }
        }
    }
    Ok(())
}

fn visit_experience(def: &Value) -> Result<(), ExtractError> {
    expect_root_object(def)?;

    for pointer in ["/dataSources", "/widgets", "/pages"] {
        match def.pointer(pointer) {
            None | Some(Value::Null) | Some(Value::Object(_)) => {}
            Some(_) => return Err(malformed(pointer, "object")),
        }
    }
    Ok(())
}

fn visit_view(def: &Value, refs: &mut BTreeSet<Reference>) -> Result<(), ExtractError> {
    expect_root_object(def)?;

    if let Some(sources) = array_at(def, "/sources")? {
        for source in sources {
            match source {
                Value::String(url) => add_url(url, refs),
                Value::Object(_) => scan_structured(source, refs),
                _ => return Err(malformed("/sources", "source URLs or objects")),
            }
        }
    }
    Ok(())
}

fn visit_site(def: &Value, refs: &mut BTreeSet<Reference>) -> Result<(), ExtractError> {
    expect_root_object(def)?;

    for pointer in ["/values/pages", "/values/sites"] {
        if let Some(entries) = array_at(def, pointer)? {
            if entries.iter().any(|e| !e.is_object()) {
                return Err(malformed(pointer, "page or site objects"));
            }
        }
    }

    // Layout cards list gallery items under "ids"
    if let Some(sections) = array_at(def, "/values/layout/sections")? {
        for section in sections {
            for_each_string(section, &mut |leaf, s| {
                if leaf.key == Some("ids") {
                    add_identifier(s, refs);
                }
            });
        }
    }
    Ok(())
}

fn visit_notebook(def: &Value) -> Result<(), ExtractError> {
    expect_root_object(def)?;

    if let Some(cells) = array_at(def, "/cells")? {
        for (i, cell) in cells.iter().enumerate() {
            match cell.get("source") {
                None | Some(Value::String(_)) | Some(Value::Array(_)) => {}
                Some(_) => return Err(malformed(&format!("/cells/{}/source", i), "text")),
            }
        }
    }
    Ok(())
}
