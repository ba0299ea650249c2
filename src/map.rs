//! The limited-value map: a site-keyed, variable-keyed catalogue of values
//! observed often enough at a branch to be worth proposing as constraints.
//!
//! Produced once by the distiller, loaded once per symbolic-execution
//! process, immutable afterwards. Keys are ordered so serialization is
//! deterministic.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Type tag marking a decimal integer literal in [`ValueProperty::value`].
/// Other tags are reserved; the solver wrapper only acts on this one.
pub const INT_TAG: i64 = 0;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValueProperty {
    #[serde(rename = "type", default)]
    pub tag: i64,

    #[serde(default)]
    pub value: String,

    /// Provenance from the distiller; preserved for round-tripping but
    /// otherwise unused.
    #[serde(default)]
    pub ops: Vec<String>,
}

impl ValueProperty {
    pub fn int(value: i64) -> Self {
        Self {
            tag: INT_TAG,
            value: value.to_string(),
            ops: vec![],
        }
    }
}

/// Values catalogued at one site, keyed by variable name.
pub type SiteEntry = BTreeMap<String, Vec<ValueProperty>>;

#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LimitedValueMap {
    pub sites: BTreeMap<String, SiteEntry>,
}

#[derive(Error, Debug)]
pub enum MapError {
    #[error("failed to read the map file")]
    Io(#[from] std::io::Error),

    #[error("the map file is not a valid nested document")]
    Parse(#[from] serde_json::Error),
}

impl LimitedValueMap {
    pub fn load(path: &Path) -> Result<Self, MapError> {
        let text = fs::read_to_string(path)?;

        Ok(serde_json::from_str(&text)?)
    }

    pub fn to_json(&self) -> String {
        let mut text = serde_json::to_string_pretty(self).expect("map serialization is infallible");
        text.push('\n');

        text
    }

    pub fn is_empty(&self) -> bool {
        self.sites.is_empty()
    }

    pub fn len(&self) -> usize {
        self.sites.len()
    }

    pub fn get(&self, site: &str) -> Option<&SiteEntry> {
        self.sites.get(site)
    }

    /// Exact lookup, then retry with a `:branch:<B>` suffix stripped.
    pub fn get_with_fallback(&self, site: &str) -> Option<&SiteEntry> {
        self.sites.get(site).or_else(|| {
            let base = site.split_once(":branch:")?.0;

            self.sites.get(base)
        })
    }
}
