//! Normalized record model

use mdm_common::ParsedAddress;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Which strategy produced a record's canonical fields
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NormalizationMethod {
    /// Inference backend output, passed through the formatting rules
    Model,
    /// Deterministic rules only
    Rules,
}

/// A raw record rewritten into canonical form.
///
/// `index` is the record's position in the input batch and the key used by
/// every later stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizedRecord {
    #[serde(rename = "_index")]
    pub index: usize,
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default)]
    pub id: Option<String>,
    #[serde(flatten)]
    pub fields: BTreeMap<String, Option<String>>,
    #[serde(rename = "_parsed", default, skip_serializing_if = "Option::is_none")]
    pub parsed: Option<ParsedAddress>,
    #[serde(rename = "_method")]
    pub method: NormalizationMethod,
}

impl NormalizedRecord {
    /// Field value, treating blank strings as absent
    pub fn get(&self, field: &str) -> Option<&str> {
        self.fields
            .get(field)
            .and_then(|v| v.as_deref())
            .map(str::trim)
            .filter(|v| !v.is_empty())
    }

    /// Number of populated fields
    pub fn completeness(&self) -> usize {
        self.fields
            .values()
            .filter(|v| v.as_deref().map_or(false, |s| !s.trim().is_empty()))
            .count()
    }
}
