//! Field Normalizer
//!
//! Rewrites one raw record into canonical form. Two strategies:
//! - [`NormalizationStrategy::ModelBacked`]: prompt the inference backend
//!   through the [`BackendPool`], then pass every proposed value through the
//!   formatting rules
//! - [`NormalizationStrategy::RuleBased`]: formatting rules only
//!
//! The model path never fails outward. Dispatcher errors and unparseable
//! output fall back to the rules and leave an [`Issue`] behind.
//!
//! Each record is independent; the pipeline coordinator fans records out
//! concurrently and the pool's admission limits do the bounding.

pub mod model;
pub mod prompts;
pub mod rules;

pub use prompts::PromptTemplates;

use crate::config::InferenceConfig;
use crate::dispatcher::{BackendPool, DispatchError, GenerationParams, OperationClass};
use crate::models::{NormalizationMethod, NormalizedRecord};
use crate::utils::extract_json_object;
use mdm_common::{Issue, ParsedAddress, RawRecord, Severity};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, warn};

const STAGE: &str = "normalize";

/// How a record's canonical fields are produced
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NormalizationStrategy {
    ModelBacked,
    RuleBased,
}

impl NormalizationStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            NormalizationStrategy::ModelBacked => "model_backed",
            NormalizationStrategy::RuleBased => "rule_based",
        }
    }
}

/// Normalized record plus anything worth reporting about how it was made
#[derive(Debug, Clone)]
pub struct NormalizationOutcome {
    pub record: NormalizedRecord,
    pub issues: Vec<Issue>,
}

pub struct FieldNormalizer {
    pool: Option<Arc<BackendPool>>,
    prompts: PromptTemplates,
    normalize_params: GenerationParams,
    address_params: GenerationParams,
}

impl FieldNormalizer {
    pub fn new(pool: Arc<BackendPool>, prompts: PromptTemplates, inference: &InferenceConfig) -> Self {
        Self {
            pool: Some(pool),
            prompts,
            normalize_params: GenerationParams::for_class(inference, OperationClass::Normalize),
            address_params: GenerationParams::for_class(inference, OperationClass::Address),
        }
    }

    /// Normalizer without a backend; every strategy resolves to the rules
    pub fn rules_only(inference: &InferenceConfig) -> Self {
        Self {
            pool: None,
            prompts: PromptTemplates::default(),
            normalize_params: GenerationParams::for_class(inference, OperationClass::Normalize),
            address_params: GenerationParams::for_class(inference, OperationClass::Address),
        }
    }

    /// The pool behind the model strategy, if any
    pub fn pool(&self) -> Option<&Arc<BackendPool>> {
        self.pool.as_ref()
    }

    /// Strategy actually available for a request
    pub fn strategy_for(&self, model_requested: bool) -> NormalizationStrategy {
        if model_requested && self.pool.is_some() {
            NormalizationStrategy::ModelBacked
        } else {
            NormalizationStrategy::RuleBased
        }
    }

    /// Normalize one record
    pub async fn normalize(
        &self,
        index: usize,
        raw: &RawRecord,
        strategy: NormalizationStrategy,
    ) -> NormalizationOutcome {
        match (strategy, &self.pool) {
            (NormalizationStrategy::ModelBacked, Some(pool)) => self.model_backed(pool, index, raw).await,
            _ => Self::normalize_with_rules(index, raw, None),
        }
    }

    /// Rule-based normalization; `reason` becomes a low-severity issue
    /// explaining why the model path was not used.
    pub fn normalize_with_rules(index: usize, raw: &RawRecord, reason: Option<(Severity, String)>) -> NormalizationOutcome {
        let fields = rules::normalize_fields(raw);
        let parsed = rules::parse_address(&fields);
        let issues = reason
            .map(|(severity, message)| vec![Issue::new(STAGE, severity, message).for_record(index, raw.id.as_deref())])
            .unwrap_or_default();

        NormalizationOutcome {
            record: build_record(index, raw, fields, parsed, NormalizationMethod::Rules),
            issues,
        }
    }

    async fn model_backed(&self, pool: &BackendPool, index: usize, raw: &RawRecord) -> NormalizationOutcome {
        let prepared = model::prepare_for_prompt(raw);
        let input_json = match serde_json::to_string(&prepared) {
            Ok(json) => json,
            Err(e) => {
                return Self::normalize_with_rules(
                    index,
                    raw,
                    Some((Severity::Low, format!("record could not be serialized for the model: {}", e))),
                )
            }
        };

        let answer = match pool
            .invoke(OperationClass::Normalize, &self.prompts.render_normalize(&input_json), &self.normalize_params)
            .await
        {
            Ok(text) => text,
            Err(e) => return Self::normalize_with_rules(index, raw, Some(dispatch_failure(&e))),
        };

        let Some(object) = extract_json_object(&answer) else {
            warn!(index, "Model output not parseable, applying formatting rules");
            return Self::normalize_with_rules(
                index,
                raw,
                Some((Severity::Low, "model output was not a JSON object; formatting rules applied".to_string())),
            );
        };

        let merged = model::merge_model_fields(raw, &object);
        let mut issues: Vec<Issue> = merged
            .overridden
            .iter()
            .map(|field| {
                Issue::new(STAGE, Severity::Low, "model value not in canonical form; formatting rules applied")
                    .for_record(index, raw.id.as_deref())
                    .on_field(field)
            })
            .collect();

        let (parsed, address_issue) = self.parse_address(pool, &merged.fields).await;
        if let Some(message) = address_issue {
            issues.push(Issue::new(STAGE, Severity::Low, message).for_record(index, raw.id.as_deref()).on_field("address"));
        }

        debug!(index, overridden = merged.overridden.len(), "Record normalized by model");
        NormalizationOutcome {
            record: build_record(index, raw, merged.fields, parsed, NormalizationMethod::Model),
            issues,
        }
    }

    /// Address parsing through the address class; rules on failure
    async fn parse_address(
        &self,
        pool: &BackendPool,
        fields: &BTreeMap<String, Option<String>>,
    ) -> (Option<ParsedAddress>, Option<String>) {
        if !model::has_address_data(fields) {
            return (None, None);
        }

        let input_json = match serde_json::to_string(fields) {
            Ok(json) => json,
            Err(e) => return (rules::parse_address(fields), Some(format!("address not serializable: {}", e))),
        };

        let answer = match pool
            .invoke(OperationClass::Address, &self.prompts.render_address(&input_json), &self.address_params)
            .await
        {
            Ok(text) => text,
            Err(e) => {
                return (
                    rules::parse_address(fields),
                    Some(format!("address parsing by model failed ({}); rule-based parsing applied", e)),
                )
            }
        };

        match extract_json_object(&answer).as_ref().and_then(model::parsed_from_model) {
            Some(parsed) => (Some(model::fill_from_fields(parsed, fields)), None),
            None => (
                rules::parse_address(fields),
                Some("model address output unusable; rule-based parsing applied".to_string()),
            ),
        }
    }
}

/// Fallback after the pre-flight availability check passed is always low
/// severity; pool exhaustion keeps its own message.
fn dispatch_failure(error: &DispatchError) -> (Severity, String) {
    let message = if error.is_pool_exhausted() {
        format!("inference pool exhausted mid-batch ({}); formatting rules applied", error)
    } else {
        format!("model normalization failed ({}); formatting rules applied", error)
    };
    (Severity::Low, message)
}

fn build_record(
    index: usize,
    raw: &RawRecord,
    fields: BTreeMap<String, Option<String>>,
    parsed: Option<ParsedAddress>,
    method: NormalizationMethod,
) -> NormalizedRecord {
    NormalizedRecord {
        index,
        source: raw.source.clone(),
        id: raw.id.clone(),
        fields,
        parsed,
        method,
    }
}
