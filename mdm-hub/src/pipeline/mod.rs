//! Pipeline Coordinator
//!
//! Sequences one batch through the stages:
//!
//! ```text
//! normalize → validate → outlier_check → match/cluster → enrich
//!           → consolidate → harmonize → mask → actions
//! ```
//!
//! Normalization fans out over every record at once; the backend pool's
//! admission limits bound the calls in flight. Results are reassembled by
//! record index, so output order is input order whatever the completion
//! order. A batch deadline cancels outstanding normalizations, which then
//! fall back to the formatting rules.
//!
//! Matching and later stages run over the finished, immutable list of
//! normalized records.

pub mod types;

pub use types::{Action, AuditEntry, BatchPolicies, BatchRequest, BatchResponse, EnrichmentEntry};

use crate::config::{MatchingConfig, PipelineConfig};
use crate::matching::{self, dominant_cluster, Cluster, GoldenRecord, MatchEdge, Matcher, SourcePriority};
use crate::models::{NormalizationMethod, NormalizedRecord};
use crate::normalizer::{FieldNormalizer, NormalizationOutcome, NormalizationStrategy};
use crate::services::harmonize::{harmonize_fields, HarmonizationReport, Subject};
use crate::services::{masking, outlier, PostalLookup};
use crate::validators::Validator;
use chrono::Utc;
use futures::stream::{FuturesUnordered, StreamExt};
use mdm_common::{Issue, Operation, ParsedAddress, Severity};
use std::collections::BTreeMap;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

/// Batch-level failures; everything else degrades into issues
#[derive(Debug, Error)]
pub enum PipelineError {
    /// No inference endpoint can serve the batch; retry the batch later
    #[error("Inference backend unavailable: all {endpoints} endpoints unhealthy")]
    BackendUnavailable { endpoints: usize },

    #[error("Invalid batch: {0}")]
    InvalidRequest(String),
}

/// Records the timing of each stage
struct AuditTrail {
    entries: Vec<AuditEntry>,
}

impl AuditTrail {
    fn new() -> Self {
        Self { entries: Vec::new() }
    }

    fn start(&self) -> (chrono::DateTime<Utc>, Instant) {
        (Utc::now(), Instant::now())
    }

    fn finish(&mut self, stage: &str, started: (chrono::DateTime<Utc>, Instant), summary: String) {
        let elapsed_ms = started.1.elapsed().as_millis() as u64;
        info!(stage, elapsed_ms, summary = %summary, "Stage complete");
        self.entries.push(AuditEntry {
            stage: stage.to_string(),
            started_at: started.0,
            elapsed_ms,
            summary,
        });
    }
}

/// Normalized batch plus per-record issues
struct NormalizedBatch {
    records: Vec<NormalizedRecord>,
    issues: Vec<Issue>,
    cancelled: usize,
}

pub struct PipelineCoordinator {
    normalizer: FieldNormalizer,
    matching: MatchingConfig,
    pipeline: PipelineConfig,
    postal: Option<PostalLookup>,
}

impl PipelineCoordinator {
    pub fn new(
        normalizer: FieldNormalizer,
        matching: MatchingConfig,
        pipeline: PipelineConfig,
        postal: Option<PostalLookup>,
    ) -> Self {
        Self {
            normalizer,
            matching,
            pipeline,
            postal,
        }
    }

    pub fn normalizer(&self) -> &FieldNormalizer {
        &self.normalizer
    }

    /// Run one batch.
    ///
    /// # Errors
    /// * `InvalidRequest` - empty record list or out-of-range policy
    /// * `BackendUnavailable` - model normalization requested while every
    ///   endpoint is unhealthy
    pub async fn process(&self, request: BatchRequest) -> Result<BatchResponse, PipelineError> {
        if request.records.is_empty() {
            return Err(PipelineError::InvalidRequest("records must not be empty".to_string()));
        }
        let threshold = request.policies.match_threshold.unwrap_or(self.matching.threshold);
        if !(0.0..=1.0).contains(&threshold) {
            return Err(PipelineError::InvalidRequest(format!(
                "match_threshold {} outside [0, 1]",
                threshold
            )));
        }

        let batch_id = Uuid::new_v4();
        info!(
            %batch_id,
            domain = %request.domain,
            records = request.records.len(),
            operations = ?request.operations,
            "Processing batch"
        );

        let strategy = self.normalizer.strategy_for(request.wants(Operation::Normalize));
        if strategy == NormalizationStrategy::ModelBacked {
            if let Some(pool) = self.normalizer.pool() {
                pool.ensure_available().map_err(|_| {
                    warn!(%batch_id, "Refusing batch: no inference endpoint available");
                    PipelineError::BackendUnavailable {
                        endpoints: pool.endpoint_count(),
                    }
                })?;
            }
        }

        let mut audit = AuditTrail::new();
        let mut issues: Vec<Issue> = Vec::new();

        // normalize
        let started = audit.start();
        let normalized = self.normalize_batch(&request, strategy).await;
        let mut records = normalized.records;
        issues.extend(normalized.issues);
        let by_model = records.iter().filter(|r| r.method == NormalizationMethod::Model).count();
        audit.finish(
            "normalize",
            started,
            format!(
                "{} records, strategy {}, {} by model, {} cancelled by deadline",
                records.len(),
                strategy.as_str(),
                by_model,
                normalized.cancelled
            ),
        );

        if request.wants(Operation::Validate) {
            let started = audit.start();
            let validator = Validator::new(request.domain);
            let found: Vec<Issue> = records.iter().flat_map(|r| validator.validate(r)).collect();
            audit.finish("validate", started, format!("{} issues", found.len()));
            issues.extend(found);
        }

        if request.wants(Operation::OutlierCheck) {
            let started = audit.start();
            let today = Utc::now().date_naive();
            let found: Vec<Issue> = records.iter().flat_map(|r| outlier::check_record(r, today)).collect();
            audit.finish("outlier_check", started, format!("{} issues", found.len()));
            issues.extend(found);
        }

        let consolidating = request.wants(Operation::Dedupe) || request.wants(Operation::Consolidate);
        let mut matches: Vec<MatchEdge> = Vec::new();
        let mut clusters: Vec<Cluster> = Vec::new();
        if consolidating {
            let started = audit.start();
            let mut matching_config = self.matching.clone();
            matching_config.threshold = threshold;
            matches = Matcher::from_config(&matching_config).match_records(&records);
            clusters = matching::cluster(&matches, records.len());
            audit.finish(
                "match",
                started,
                format!("{} edges, {} clusters", matches.len(), clusters.len()),
            );
        }

        let mut enrichment = Vec::new();
        if request.wants(Operation::Enrich) {
            let started = audit.start();
            match &self.postal {
                Some(lookup) => enrichment = enrich_records(lookup, &mut records).await,
                None => issues.push(Issue::new(
                    "enrich",
                    Severity::Low,
                    "postal lookup is disabled; enrichment skipped",
                )),
            }
            audit.finish("enrich", started, format!("{} records enriched", enrichment.len()));
        }

        let mut golden_records: Vec<GoldenRecord> = Vec::new();
        if consolidating {
            let started = audit.start();
            let priority = SourcePriority::new(
                request
                    .policies
                    .source_priority
                    .as_ref()
                    .unwrap_or(&self.pipeline.source_priority),
            );
            golden_records = matching::consolidate_all(&clusters, &records, &priority);
            audit.finish("consolidate", started, format!("{} golden records", golden_records.len()));
        }

        let mut harmonization = HarmonizationReport::default();
        if request.wants(Operation::Harmonize) {
            let started = audit.start();
            if golden_records.is_empty() {
                for record in records.iter_mut() {
                    harmonize_fields(Subject::Record(record.index), &mut record.fields, &mut harmonization);
                }
            } else {
                for golden in golden_records.iter_mut() {
                    harmonize_fields(Subject::GoldenRecord(golden.cluster_id), &mut golden.fields, &mut harmonization);
                }
            }
            audit.finish("harmonize", started, format!("{} changes", harmonization.len()));
        }

        let mut pii_masks = BTreeMap::new();
        if request.wants(Operation::Mask) {
            let started = audit.start();
            for mask in records.iter().filter_map(masking::mask_record) {
                pii_masks.insert(mask.index, mask.fields);
            }
            audit.finish("mask", started, format!("{} records masked", pii_masks.len()));
        }

        let golden_record = dominant_cluster(&clusters)
            .and_then(|dominant| golden_records.iter().find(|g| g.cluster_id == dominant.id))
            .cloned();
        let actions = suggest_actions(&golden_records, &issues);

        let confidence = match &golden_record {
            Some(golden) => golden.confidence,
            None => by_model as f64 / records.len() as f64,
        };

        info!(
            %batch_id,
            records = records.len(),
            clusters = clusters.len(),
            issues = issues.len(),
            confidence,
            "Batch complete"
        );

        Ok(BatchResponse {
            batch_id,
            domain: request.domain,
            record_clean: records,
            golden_record,
            golden_records,
            clusters,
            matches,
            harmonization,
            enrichment,
            issues,
            actions,
            pii_masks,
            audit_log: audit.entries,
            confidence,
        })
    }

    /// Normalize every record concurrently under the batch deadline
    async fn normalize_batch(&self, request: &BatchRequest, strategy: NormalizationStrategy) -> NormalizedBatch {
        let total = request.records.len();
        let token = CancellationToken::new();
        let normalizer = &self.normalizer;

        let mut tasks: FuturesUnordered<_> = request
            .records
            .iter()
            .enumerate()
            .map(|(index, raw)| {
                let token = token.clone();
                async move {
                    tokio::select! {
                        outcome = normalizer.normalize(index, raw, strategy) => (index, outcome, false),
                        _ = token.cancelled() => {
                            let outcome = FieldNormalizer::normalize_with_rules(
                                index,
                                raw,
                                Some((Severity::Low, "batch deadline exceeded; formatting rules applied".to_string())),
                            );
                            (index, outcome, true)
                        }
                    }
                }
            })
            .collect();

        let deadline = tokio::time::sleep(self.pipeline.batch_deadline().max(Duration::from_millis(1)));
        tokio::pin!(deadline);

        let mut slots: Vec<Option<NormalizationOutcome>> = vec![None; total];
        let mut remaining = total;
        let mut cancelled = 0;
        while remaining > 0 {
            tokio::select! {
                Some((index, outcome, was_cancelled)) = tasks.next() => {
                    slots[index] = Some(outcome);
                    cancelled += usize::from(was_cancelled);
                    remaining -= 1;
                }
                _ = &mut deadline, if !token.is_cancelled() => {
                    warn!(remaining, "Batch deadline exceeded, abandoning in-flight normalizations");
                    token.cancel();
                }
                else => break,
            }
        }

        let mut records = Vec::with_capacity(total);
        let mut issues = Vec::new();
        for (index, slot) in slots.into_iter().enumerate() {
            let outcome = slot.unwrap_or_else(|| {
                FieldNormalizer::normalize_with_rules(
                    index,
                    &request.records[index],
                    Some((Severity::Low, "normalization did not complete; formatting rules applied".to_string())),
                )
            });
            records.push(outcome.record);
            issues.extend(outcome.issues);
        }

        NormalizedBatch {
            records,
            issues,
            cancelled,
        }
    }
}

/// Look up postal codes and back-fill empty locality fields of `_parsed`
async fn enrich_records(lookup: &PostalLookup, records: &mut [NormalizedRecord]) -> Vec<EnrichmentEntry> {
    let queries: Vec<(usize, String, Option<String>)> = records
        .iter()
        .filter_map(|r| {
            let code = r
                .get("cep")
                .map(str::to_string)
                .or_else(|| r.parsed.as_ref().and_then(|p| p.postal_code.clone()))?;
            let country = r
                .get("country_code")
                .map(str::to_string)
                .or_else(|| r.parsed.as_ref().and_then(|p| p.country_code.clone()));
            Some((r.index, code, country))
        })
        .collect();

    let found = futures::future::join_all(
        queries
            .iter()
            .map(|(index, code, country)| async move { (*index, lookup.lookup(code, country.as_deref()).await) }),
    )
    .await;

    let mut entries = Vec::new();
    for (index, info) in found {
        let Some(info) = info else { continue };
        if let Some(record) = records.get_mut(index) {
            let parsed = record.parsed.get_or_insert_with(ParsedAddress::default);
            info.fill(parsed);
        }
        entries.push(EnrichmentEntry {
            index,
            postal_code: info.postal_code,
            city: info.city,
            state: info.state,
            neighborhood: info.neighborhood,
            provider: info.provider,
        });
    }
    entries
}

/// Merge suggestions per multi-member cluster, review per high-severity record
fn suggest_actions(golden_records: &[GoldenRecord], issues: &[Issue]) -> Vec<Action> {
    let mut actions: Vec<Action> = golden_records
        .iter()
        .filter(|g| g.members.len() > 1)
        .map(|g| Action::Merge {
            cluster_id: g.cluster_id,
            members: g.members.clone(),
            baseline: g.baseline,
            confidence: g.confidence,
        })
        .collect();

    let mut review: BTreeMap<usize, Vec<String>> = BTreeMap::new();
    for issue in issues.iter().filter(|i| i.severity == Severity::High) {
        if let Some(index) = issue.index {
            review.entry(index).or_default().push(issue.message.clone());
        }
    }
    actions.extend(review.into_iter().map(|(index, reasons)| Action::Review { index, reasons }));
    actions
}
