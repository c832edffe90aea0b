//! Reference rewriting
//!
//! Applies the mapping tables to structured definitions and free text.
//! Structured values are rewritten by the key that owns each string; free
//! text is scanned for URLs and identifier tokens on word boundaries.
//!
//! Rewriting is idempotent as long as no new value is itself an old key of
//! the same table, and is the identity when nothing in the input is mapped.

use regex::Captures;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

use super::tables::{MappingKind, MappingTables};
use crate::domain::patterns::{
    host_of, is_service_url, normalize_url, replace_host, trim_url_punctuation, KeyClass, UrlShape, ID_TOKEN,
    LONG_RUN, TEXT_TOKEN,
};
use crate::domain::value::map_strings;
use crate::domain::{is_id_shaped, ITEM_ID_LEN};

/// Where an unresolved reference sits in an item
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "in", content = "at", rename_all = "snake_case")]
pub enum Location {
    /// Whole string value at a JSON pointer of the definition
    Field(String),

    /// Text-bearing string at a JSON pointer of the definition
    Text(String),

    /// Named free-text payload of the item
    Payload(String),
}

impl Location {
    /// Returns true if the location is rewritten as free text
    pub fn is_text(&self) -> bool {
        !matches!(self, Location::Field(_))
    }
}

/// A reference the tables could not satisfy
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct UnresolvedRef {
    pub kind: MappingKind,
    pub value: String,
    pub location: Location,
}

/// A mapped identifier found inside a longer token and left alone
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AmbiguousMatch {
    pub id: String,
    pub token: String,
    pub location: Location,
}

/// Something noteworthy found while rewriting free text
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "finding", rename_all = "snake_case")]
pub enum TextFinding {
    /// Reference-shaped token with no mapping
    Unresolved { kind: MappingKind, value: String },

    /// Mapped identifier embedded in a longer alphanumeric run
    Ambiguous { id: String, token: String },
}

/// Result of rewriting one text
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TextRewrite {
    pub text: String,
    pub replaced: usize,
    pub findings: Vec<TextFinding>,
}

/// Result of rewriting a structured value or a set of payloads
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Rewrite<T> {
    pub value: T,
    pub replaced: usize,
    pub unresolved: Vec<UnresolvedRef>,
    pub ambiguous: Vec<AmbiguousMatch>,
}

impl<T> Rewrite<T> {
    fn new(value: T) -> Self {
        Self {
            value,
            replaced: 0,
            unresolved: Vec::new(),
            ambiguous: Vec::new(),
        }
    }

    fn absorb(&mut self, findings: Vec<TextFinding>, location: &Location) {
        for finding in findings {
            match finding {
                TextFinding::Unresolved { kind, value } => {
                    // An identifier inside a URL field is patched as text
                    let location = match location {
                        Location::Field(p) if kind == MappingKind::Identifier => {
                            Location::Text(p.clone())
                        }
                        other => other.clone(),
                    };
                    self.unresolved.push(UnresolvedRef { kind, value, location });
                }
                TextFinding::Ambiguous { id, token } => self.ambiguous.push(AmbiguousMatch {
                    id,
                    token,
                    location: location.clone(),
                }),
            }
        }
    }
}

impl MappingTables {
    /// Rewrites every reference in a structured definition
    ///
    /// Identifier keys go through the identifier table, URL keys through
    /// URL precedence, group and domain keys through their tables, and
    /// text keys through [`MappingTables::rewrite_text`]. Everything else
    /// is copied unchanged.
    pub fn rewrite_structured(&self, value: &Value) -> Rewrite<Value> {
        let mut out = Rewrite::new(Value::Null);

        let rewritten = map_strings(value, &mut |leaf, s| {
            let pointer = leaf.pointer.to_string();
            match KeyClass::of(leaf.key) {
                KeyClass::Identifier => {
                    if !is_id_shaped(s) {
                        return None;
                    }
                    match self.resolve_id(s) {
                        Some(new) => {
                            out.replaced += 1;
                            Some(new)
                        }
                        None => {
                            out.unresolved.push(UnresolvedRef {
                                kind: MappingKind::Identifier,
                                value: s.to_string(),
                                location: Location::Field(pointer),
                            });
                            None
                        }
                    }
                }
                KeyClass::Url => {
                    let url = s.trim();
                    if !url.starts_with("http://") && !url.starts_with("https://") {
                        return None;
                    }
                    let mut findings = Vec::new();
                    let new = self.rewrite_url(url, &mut findings);
                    out.absorb(findings, &Location::Field(pointer));
                    if new.is_some() {
                        out.replaced += 1;
                    }
                    new
                }
                KeyClass::Group => self.lookup(MappingKind::Group, s, &mut out.replaced),
                KeyClass::Domain => self.lookup(MappingKind::Domain, s, &mut out.replaced),
                KeyClass::Text => {
                    let text = self.rewrite_text(s);
                    out.absorb(text.findings, &Location::Text(pointer));
                    out.replaced += text.replaced;
                    (text.replaced > 0).then_some(text.text)
                }
                KeyClass::Other => None,
            }
        });

        out.value = rewritten;
        out
    }

    fn lookup(&self, kind: MappingKind, s: &str, replaced: &mut usize) -> Option<String> {
        let new = self.resolve(kind, s)?;
        if new == s {
            return None;
        }
        *replaced += 1;
        Some(new)
    }

    /// Rewrites every named free-text payload of an item
    pub fn rewrite_payloads(&self, payloads: &BTreeMap<String, String>) -> Rewrite<BTreeMap<String, String>> {
        let mut out = Rewrite::new(BTreeMap::new());

        for (field, text) in payloads {
            let rewritten = self.rewrite_text(text);
            out.absorb(rewritten.findings, &Location::Payload(field.clone()));
            out.replaced += rewritten.replaced;
            out.value.insert(field.clone(), rewritten.text);
        }
        out
    }

    /// Rewrites URLs and identifier tokens in free text
    ///
    /// Tokens without a mapping are left verbatim; identifier-shaped and
    /// service-URL tokens among them are reported as unresolved. A mapped
    /// identifier inside a longer alphanumeric run is never replaced and is
    /// reported as ambiguous.
    pub fn rewrite_text(&self, text: &str) -> TextRewrite {
        let mut findings = self.ambiguous_matches(text);
        let mut replaced = 0;

        let rewritten = TEXT_TOKEN.replace_all(text, |caps: &Captures<'_>| {
            let whole = &caps[0];

            if let Some(url) = caps.name("url") {
                let (url, tail) = trim_url_punctuation(url.as_str());
                return match self.rewrite_url(url, &mut findings) {
                    Some(new) => {
                        replaced += 1;
                        format!("{}{}", new, tail)
                    }
                    None => whole.to_string(),
                };
            }

            if let Some(id) = caps.name("id") {
                return match self.resolve_id(id.as_str()) {
                    Some(new) => {
                        replaced += 1;
                        new
                    }
                    None => {
                        findings.push(TextFinding::Unresolved {
                            kind: MappingKind::Identifier,
                            value: id.as_str().to_string(),
                        });
                        whole.to_string()
                    }
                };
            }

            whole.to_string()
        });

        TextRewrite {
            text: rewritten.into_owned(),
            replaced,
            findings,
        }
    }

    /// Rewrites one URL token; returns `None` when it is left unchanged
    fn rewrite_url(&self, url: &str, findings: &mut Vec<TextFinding>) -> Option<String> {
        if UrlShape::classify(url).carries_identifier() {
            return self.rewrite_link(url, findings);
        }

        // Any other non-service URL carrying an identifier: exact item URL
        // first, then the per-identifier swap
        if !is_service_url(url) && ID_TOKEN.is_match(url) {
            return match self.urls.get(&normalize_url(url)) {
                Some(new) => (new != url).then(|| new.clone()),
                None => self.rewrite_link(url, findings),
            };
        }

        match self.resolve_url(url) {
            Some(new) if new != url => Some(new),
            Some(_) => None,
            None => {
                if is_service_url(url) {
                    findings.push(TextFinding::Unresolved {
                        kind: MappingKind::Url,
                        value: url.to_string(),
                    });
                }
                None
            }
        }
    }

    /// Links carrying item identifiers: swap every mapped identifier and
    /// the organisation host
    fn rewrite_link(&self, url: &str, findings: &mut Vec<TextFinding>) -> Option<String> {
        let mut changed = false;
        let swapped = ID_TOKEN.replace_all(url, |caps: &Captures<'_>| {
            let old = &caps[0];
            match self.resolve_id(old) {
                Some(new) => {
                    changed = true;
                    new
                }
                None => {
                    findings.push(TextFinding::Unresolved {
                        kind: MappingKind::Identifier,
                        value: old.to_string(),
                    });
                    old.to_string()
                }
            }
        });

        let mut result = swapped.into_owned();
        if let Some(new_host) = host_of(&result).and_then(|host| self.resolve(MappingKind::Domain, &host)) {
            if let Some(moved) = replace_host(&result, &new_host) {
                changed |= moved != result;
                result = moved;
            }
        }

        changed.then_some(result)
    }

    fn ambiguous_matches(&self, text: &str) -> Vec<TextFinding> {
        if self.identifiers.is_empty() {
            return Vec::new();
        }

        let mut findings = Vec::new();
        for run in LONG_RUN.find_iter(text) {
            let token = run.as_str();
            for start in 0..=token.len() - ITEM_ID_LEN {
                let window = &token[start..start + ITEM_ID_LEN];
                if is_id_shaped(window) && self.identifiers.contains_key(window) {
                    findings.push(TextFinding::Ambiguous {
                        id: window.to_string(),
                        token: token.to_string(),
                    });
                }
            }
        }
        findings
    }
}
