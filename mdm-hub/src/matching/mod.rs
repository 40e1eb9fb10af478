//! Record linkage: pairwise similarity, clustering and consolidation
//!
//! All stages here are pure functions over an immutable slice of
//! normalized records built before matching starts.

pub mod candidates;
pub mod cluster;
pub mod consolidate;
pub mod similarity;

pub use candidates::{generator_for, AllPairs, CandidateGenerator, PostalPrefixBlocking};
pub use cluster::{cluster, is_partition, Cluster, UnionFind};
pub use consolidate::{consolidate, consolidate_all, dominant_cluster, GoldenRecord, SourcePriority};
pub use similarity::{ComparableRecord, SimilarityEngine};

use crate::config::MatchingConfig;
use crate::models::NormalizedRecord;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Accepted pairwise match, `i < j`
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MatchEdge {
    pub i: usize,
    pub j: usize,
    pub score: f64,
}

/// Scores candidate pairs and keeps those at or above the threshold
pub struct Matcher {
    engine: SimilarityEngine,
    generator: Box<dyn CandidateGenerator>,
    threshold: f64,
}

impl Matcher {
    pub fn new(engine: SimilarityEngine, generator: Box<dyn CandidateGenerator>, threshold: f64) -> Self {
        Self {
            engine,
            generator,
            threshold,
        }
    }

    pub fn from_config(config: &MatchingConfig) -> Self {
        Self::new(
            SimilarityEngine::from_config(config),
            generator_for(config.blocking),
            config.threshold,
        )
    }

    pub fn engine(&self) -> &SimilarityEngine {
        &self.engine
    }

    /// Accepted edges, sorted by `(i, j)`.
    ///
    /// `records[k].index` must equal `k`.
    pub fn match_records(&self, records: &[NormalizedRecord]) -> Vec<MatchEdge> {
        let prepared: Vec<ComparableRecord> = records.iter().map(ComparableRecord::from_record).collect();
        let pairs = self.generator.candidates(&prepared);
        let evaluated = pairs.len();

        let edges: Vec<MatchEdge> = pairs
            .into_iter()
            .filter(|(i, j)| i != j)
            .filter_map(|(i, j)| {
                let score = self.engine.score_prepared(prepared.get(i)?, prepared.get(j)?);
                (score >= self.threshold).then_some(MatchEdge { i, j, score })
            })
            .collect();

        debug!(
            records = records.len(),
            generator = self.generator.name(),
            evaluated,
            accepted = edges.len(),
            "Pairwise matching complete"
        );
        edges
    }
}
