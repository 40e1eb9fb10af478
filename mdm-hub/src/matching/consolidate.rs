//! Golden-record consolidation
//!
//! Members of a cluster are ranked by one total order:
//! 1. source priority (position in the caller's list; unlisted sources last)
//! 2. completeness, descending (count of non-empty fields)
//! 3. record index, ascending
//!
//! The top-ranked member is the baseline. Each field takes the value of the
//! highest-ranked member that has it, so empty baseline fields are
//! back-filled from the next-ranked members in order. `provenance` names the
//! member that supplied each field.

use super::cluster::Cluster;
use crate::models::NormalizedRecord;
use mdm_common::ParsedAddress;
use serde::{Deserialize, Serialize};
use std::cmp::Reverse;
use std::collections::{BTreeMap, BTreeSet};

/// Caller-supplied ranking of source systems (case-insensitive)
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SourcePriority {
    order: Vec<String>,
}

impl SourcePriority {
    pub fn new<I, S>(order: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            order: order.into_iter().map(|s| s.as_ref().trim().to_uppercase()).collect(),
        }
    }

    /// Rank of a source; lower is preferred
    pub fn rank(&self, source: Option<&str>) -> usize {
        source
            .map(|s| s.trim().to_uppercase())
            .and_then(|s| self.order.iter().position(|o| *o == s))
            .unwrap_or(self.order.len())
    }
}

/// One consolidated record per cluster
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GoldenRecord {
    pub cluster_id: usize,
    pub members: Vec<usize>,
    /// Top-ranked member
    pub baseline: usize,
    pub source: Option<String>,
    pub id: Option<String>,
    pub fields: BTreeMap<String, Option<String>>,
    #[serde(rename = "_parsed", default, skip_serializing_if = "Option::is_none")]
    pub parsed: Option<ParsedAddress>,
    /// Member whose `_parsed` was taken
    pub parsed_from: Option<usize>,
    /// Field name → contributing record index
    pub provenance: BTreeMap<String, usize>,
    /// Distinct source systems of the members
    pub sources: Vec<String>,
    pub confidence: f64,
}

impl GoldenRecord {
    pub fn get(&self, field: &str) -> Option<&str> {
        self.fields.get(field).and_then(|v| v.as_deref())
    }
}

/// Members of a cluster in consolidation order
pub fn rank_members<'a>(
    cluster: &Cluster,
    records: &'a [NormalizedRecord],
    priority: &SourcePriority,
) -> Vec<&'a NormalizedRecord> {
    let mut ranked: Vec<&NormalizedRecord> = cluster
        .members
        .iter()
        .filter_map(|&index| records.get(index))
        .collect();
    ranked.sort_by_key(|r| (priority.rank(r.source.as_deref()), Reverse(r.completeness()), r.index));
    ranked
}

/// Build the golden record of one cluster.
///
/// `records` is the whole batch, indexed by record index.
/// Returns `None` only for an empty cluster.
pub fn consolidate(cluster: &Cluster, records: &[NormalizedRecord], priority: &SourcePriority) -> Option<GoldenRecord> {
    let ranked = rank_members(cluster, records, priority);
    let baseline = *ranked.first()?;

    let field_names: BTreeSet<&String> = ranked.iter().flat_map(|r| r.fields.keys()).collect();
    let mut fields = BTreeMap::new();
    let mut provenance = BTreeMap::new();
    for name in field_names {
        let winner = ranked.iter().find_map(|r| r.get(name).map(|v| (r.index, v)));
        match winner {
            Some((index, value)) => {
                fields.insert(name.clone(), Some(value.to_string()));
                provenance.insert(name.clone(), index);
            }
            None => {
                fields.insert(name.clone(), None);
            }
        }
    }

    let parsed_winner = ranked
        .iter()
        .find(|r| r.parsed.as_ref().map_or(false, |p| !p.is_empty()));

    let sources: BTreeSet<String> = ranked.iter().filter_map(|r| r.source.clone()).collect();

    debug_assert!(
        provenance.values().all(|i| cluster.members.contains(i)),
        "golden record drew a field from outside its cluster"
    );

    Some(GoldenRecord {
        cluster_id: cluster.id,
        members: cluster.members.clone(),
        baseline: baseline.index,
        source: baseline.source.clone(),
        id: baseline.id.clone(),
        fields,
        parsed: parsed_winner.and_then(|r| r.parsed.clone()),
        parsed_from: parsed_winner.map(|r| r.index),
        provenance,
        sources: sources.into_iter().collect(),
        confidence: cluster.confidence,
    })
}

/// Golden records for every cluster, in cluster order
pub fn consolidate_all(clusters: &[Cluster], records: &[NormalizedRecord], priority: &SourcePriority) -> Vec<GoldenRecord> {
    clusters
        .iter()
        .filter_map(|cluster| consolidate(cluster, records, priority))
        .collect()
}

/// The cluster representing the batch: largest, then lowest first member
pub fn dominant_cluster(clusters: &[Cluster]) -> Option<&Cluster> {
    clusters
        .iter()
        .min_by_key(|c| (Reverse(c.members.len()), c.members.first().copied().unwrap_or(usize::MAX)))
}
