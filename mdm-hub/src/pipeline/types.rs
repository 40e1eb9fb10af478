//! Batch request and response payloads

use crate::matching::{Cluster, GoldenRecord, MatchEdge};
use crate::models::NormalizedRecord;
use crate::services::{HarmonizationReport, MaskedValue};
use chrono::{DateTime, Utc};
use mdm_common::{Domain, Issue, Operation, RawRecord};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// Conflict-resolution options supplied with a batch
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchPolicies {
    /// Preferred source systems, best first; overrides the configured list
    pub source_priority: Option<Vec<String>>,
    /// Overrides the configured match threshold
    pub match_threshold: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchRequest {
    pub domain: Domain,
    pub operations: Vec<Operation>,
    #[serde(default)]
    pub policies: BatchPolicies,
    pub records: Vec<RawRecord>,
}

impl BatchRequest {
    pub fn wants(&self, operation: Operation) -> bool {
        self.operations.contains(&operation)
    }
}

/// Locality data found for a record's postal code
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnrichmentEntry {
    pub index: usize,
    pub postal_code: String,
    pub city: Option<String>,
    pub state: Option<String>,
    pub neighborhood: Option<String>,
    pub provider: String,
}

/// Follow-up suggested to the caller
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Action {
    /// Records of a multi-member cluster should be merged into its golden record
    Merge {
        cluster_id: usize,
        members: Vec<usize>,
        baseline: usize,
        confidence: f64,
    },
    /// A record has high-severity issues and needs a human look
    Review { index: usize, reasons: Vec<String> },
}

/// One pipeline stage as executed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub stage: String,
    pub started_at: DateTime<Utc>,
    pub elapsed_ms: u64,
    pub summary: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchResponse {
    pub batch_id: Uuid,
    pub domain: Domain,
    /// One entry per input record, in input order
    pub record_clean: Vec<NormalizedRecord>,
    /// Golden record of the dominant cluster
    pub golden_record: Option<GoldenRecord>,
    pub golden_records: Vec<GoldenRecord>,
    pub clusters: Vec<Cluster>,
    pub matches: Vec<MatchEdge>,
    pub harmonization: HarmonizationReport,
    pub enrichment: Vec<EnrichmentEntry>,
    pub issues: Vec<Issue>,
    pub actions: Vec<Action>,
    /// Record index → field → mask
    pub pii_masks: BTreeMap<usize, BTreeMap<String, MaskedValue>>,
    pub audit_log: Vec<AuditEntry>,
    pub confidence: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_parses_flattened_records() {
        let request: BatchRequest = serde_json::from_str(
            r#"{
                "domain": "customer",
                "operations": ["normalize", "dedupe"],
                "policies": {"source_priority": ["CRM"], "unknown_option": 1},
                "records": [{"source": "CRM", "id": "1", "name": "Ana", "cpf": null}]
            }"#,
        )
        .unwrap();

        assert_eq!(request.domain, Domain::Customer);
        assert!(request.wants(Operation::Dedupe));
        assert!(!request.wants(Operation::Mask));
        assert_eq!(request.policies.source_priority, Some(vec!["CRM".to_string()]));
        assert_eq!(request.records[0].get("name"), Some("Ana"));
    }

    #[test]
    fn test_action_tagging() {
        let action = Action::Review {
            index: 3,
            reasons: vec!["bad cpf".into()],
        };
        let value = serde_json::to_value(&action).unwrap();
        assert_eq!(value["type"], "review");
        assert_eq!(value["index"], 3);
    }
}
