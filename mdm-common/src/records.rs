//! Record data model shared by every pipeline stage
//!
//! Record *indices* (position in the input batch) are the stable key used
//! throughout a batch; `source` and `id` are informational and may repeat
//! across source systems.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Master-data domain of a batch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Domain {
    Customer,
    Product,
    Supplier,
    Financial,
    Address,
}

impl Domain {
    pub fn as_str(&self) -> &'static str {
        match self {
            Domain::Customer => "customer",
            Domain::Product => "product",
            Domain::Supplier => "supplier",
            Domain::Financial => "financial",
            Domain::Address => "address",
        }
    }
}

impl std::fmt::Display for Domain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Pipeline stage requested by the caller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    Normalize,
    Validate,
    Dedupe,
    Consolidate,
    Harmonize,
    Enrich,
    Mask,
    OutlierCheck,
}

/// One input record as delivered by a source system.
///
/// Field values are kept verbatim; unknown field names are preserved.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawRecord {
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default)]
    pub id: Option<String>,
    #[serde(flatten)]
    pub fields: BTreeMap<String, Option<String>>,
}

impl RawRecord {
    /// Field value, treating blank strings as absent
    pub fn get(&self, field: &str) -> Option<&str> {
        self.fields
            .get(field)
            .and_then(|v| v.as_deref())
            .map(str::trim)
            .filter(|v| !v.is_empty())
    }

    /// Builder-style setter used by tests and fixtures
    pub fn with(mut self, field: &str, value: &str) -> Self {
        self.fields.insert(field.to_string(), Some(value.to_string()));
        self
    }

    pub fn with_source(mut self, source: &str) -> Self {
        self.source = Some(source.to_string());
        self
    }

    pub fn with_id(mut self, id: &str) -> Self {
        self.id = Some(id.to_string());
        self
    }
}

/// Address broken into its components
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParsedAddress {
    pub thoroughfare: Option<String>,
    pub house_number: Option<String>,
    pub neighborhood: Option<String>,
    pub city: Option<String>,
    pub state: Option<String>,
    pub postal_code: Option<String>,
    pub country_code: Option<String>,
    pub complement: Option<String>,
}

impl ParsedAddress {
    /// True when no component is populated
    pub fn is_empty(&self) -> bool {
        self.populated_count() == 0
    }

    pub fn populated_count(&self) -> usize {
        [
            &self.thoroughfare,
            &self.house_number,
            &self.neighborhood,
            &self.city,
            &self.state,
            &self.postal_code,
            &self.country_code,
            &self.complement,
        ]
        .iter()
        .filter(|v| v.as_deref().map_or(false, |s| !s.trim().is_empty()))
        .count()
    }
}

/// Issue severity
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    Medium,
    High,
}

/// A finding attached to a record index; never mutates the record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Issue {
    /// Record index in the batch (None for batch-level findings)
    pub index: Option<usize>,
    /// Source-system id of the record, when known
    pub record_id: Option<String>,
    /// Stage that raised the issue ("normalize", "validate", ...)
    pub stage: String,
    pub field: Option<String>,
    pub severity: Severity,
    pub message: String,
}

impl Issue {
    pub fn new(stage: &str, severity: Severity, message: impl Into<String>) -> Self {
        Self {
            index: None,
            record_id: None,
            stage: stage.to_string(),
            field: None,
            severity,
            message: message.into(),
        }
    }

    pub fn for_record(mut self, index: usize, record_id: Option<&str>) -> Self {
        self.index = Some(index);
        self.record_id = record_id.map(str::to_string);
        self
    }

    pub fn on_field(mut self, field: &str) -> Self {
        self.field = Some(field.to_string());
        self
    }
}
