//! Item identifiers
//!
//! ID Format:
//! - Item IDs: 32 lowercase hexadecimal characters (e.g., `9f2b4c1e...`)
//!
//! The same shape is used on both sides of a migration: source items keep
//! their original identifiers, destination items receive fresh ones.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Length of an identifier-shaped token
pub const ITEM_ID_LEN: usize = 32;

#[derive(Debug, Error, PartialEq)]
pub enum IdError {
    #[error("Invalid item ID format: expected 32 lowercase hex characters, got '{0}'")]
    InvalidItemId(String),
}

/// Returns true if `s` has the shape of an item identifier
pub fn is_id_shaped(s: &str) -> bool {
    s.len() == ITEM_ID_LEN && s.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
}

/// Identifier of one hosted content item
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ItemId(String);

impl ItemId {
    /// Derives a destination identifier from arbitrary seed material
    ///
    /// Deterministic for identical seeds, so replaying a run against the
    /// same destination yields the same identifiers.
    pub fn derive(parts: &[&str]) -> Self {
        let mut hasher = blake3::Hasher::new();
        for part in parts {
            hasher.update(part.as_bytes());
            hasher.update(&[0]);
        }
        let hex = hasher.finalize().to_hex();
        Self(hex[..ITEM_ID_LEN].to_string())
    }

    /// Returns the identifier as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for ItemId {
    type Err = IdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if !is_id_shaped(s) {
            return Err(IdError::InvalidItemId(s.to_string()));
        }
        Ok(Self(s.to_string()))
    }
}

impl TryFrom<String> for ItemId {
    type Error = IdError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<ItemId> for String {
    fn from(id: ItemId) -> Self {
        id.0
    }
}

impl AsRef<str> for ItemId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
