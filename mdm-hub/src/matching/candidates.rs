//! Candidate-pair generation
//!
//! Decides which pairs the similarity engine scores. The engine's per-pair
//! contract does not change with the generator.

use super::similarity::ComparableRecord;
use crate::config::BlockingMode;
use std::collections::{BTreeMap, BTreeSet};

/// Digits of the postal code used as the blocking key
const POSTAL_PREFIX_LEN: usize = 5;

/// Produces index pairs `(i, j)` with `i < j`, sorted and unique
pub trait CandidateGenerator: Send + Sync {
    fn name(&self) -> &'static str;
    fn candidates(&self, records: &[ComparableRecord]) -> Vec<(usize, usize)>;
}

/// Every pair: N×(N-1)/2 comparisons
pub struct AllPairs;

impl CandidateGenerator for AllPairs {
    fn name(&self) -> &'static str {
        "all_pairs"
    }

    fn candidates(&self, records: &[ComparableRecord]) -> Vec<(usize, usize)> {
        let indices: Vec<usize> = records.iter().map(|r| r.index).collect();
        let mut pairs = Vec::with_capacity(indices.len() * indices.len().saturating_sub(1) / 2);
        for (position, &i) in indices.iter().enumerate() {
            for &j in &indices[position + 1..] {
                pairs.push((i.min(j), i.max(j)));
            }
        }
        pairs.sort_unstable();
        pairs.dedup();
        pairs
    }
}

/// Pairs sharing a postal-code prefix or an identifier.
///
/// Records without a postal code are paired with everyone, so blocking
/// never hides a record that could only match on other fields.
pub struct PostalPrefixBlocking {
    prefix_len: usize,
}

impl Default for PostalPrefixBlocking {
    fn default() -> Self {
        Self {
            prefix_len: POSTAL_PREFIX_LEN,
        }
    }
}

impl PostalPrefixBlocking {
    fn key(&self, record: &ComparableRecord) -> Option<String> {
        record
            .postal_code
            .as_deref()
            .filter(|pc| pc.len() >= self.prefix_len)
            .map(|pc| pc[..self.prefix_len].to_string())
    }
}

impl CandidateGenerator for PostalPrefixBlocking {
    fn name(&self) -> &'static str {
        "postal_prefix"
    }

    fn candidates(&self, records: &[ComparableRecord]) -> Vec<(usize, usize)> {
        let mut buckets: BTreeMap<String, Vec<usize>> = BTreeMap::new();
        let mut unkeyed = Vec::new();
        let mut by_identifier: BTreeMap<&str, Vec<usize>> = BTreeMap::new();

        for record in records {
            match self.key(record) {
                Some(key) => buckets.entry(key).or_default().push(record.index),
                None => unkeyed.push(record.index),
            }
            for id in [&record.cpf, &record.cnpj].into_iter().flatten() {
                by_identifier.entry(id.as_str()).or_default().push(record.index);
            }
        }

        let mut pairs = BTreeSet::new();
        let mut add_group = |group: &[usize]| {
            for (position, &i) in group.iter().enumerate() {
                for &j in &group[position + 1..] {
                    if i != j {
                        pairs.insert((i.min(j), i.max(j)));
                    }
                }
            }
        };
        for group in buckets.values().chain(by_identifier.values()) {
            add_group(group);
        }

        let all: Vec<usize> = records.iter().map(|r| r.index).collect();
        for &i in &unkeyed {
            for &j in &all {
                if i != j {
                    pairs.insert((i.min(j), i.max(j)));
                }
            }
        }
        pairs.into_iter().collect()
    }
}

/// Generator for a configured blocking mode
pub fn generator_for(mode: BlockingMode) -> Box<dyn CandidateGenerator> {
    match mode {
        BlockingMode::None => Box::new(AllPairs),
        BlockingMode::PostalPrefix => Box::new(PostalPrefixBlocking::default()),
    }
}
