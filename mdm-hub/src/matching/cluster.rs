//! Connected-component clustering over accepted match edges

use super::MatchEdge;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Union-Find (disjoint set) with path compression and union by rank
pub struct UnionFind {
    parent: Vec<usize>,
    rank: Vec<usize>,
}

impl UnionFind {
    #[must_use]
    pub fn new(n: usize) -> Self {
        Self {
            parent: (0..n).collect(),
            rank: vec![0; n],
        }
    }

    /// Root of the set containing `x`
    pub fn find(&mut self, x: usize) -> usize {
        let mut root = x;
        while self.parent[root] != root {
            root = self.parent[root];
        }
        // compress
        let mut node = x;
        while self.parent[node] != root {
            let next = self.parent[node];
            self.parent[node] = root;
            node = next;
        }
        root
    }

    /// Merge the sets of `x` and `y`; false if already joined
    pub fn union(&mut self, x: usize, y: usize) -> bool {
        let rx = self.find(x);
        let ry = self.find(y);
        if rx == ry {
            return false;
        }

        match self.rank[rx].cmp(&self.rank[ry]) {
            std::cmp::Ordering::Less => self.parent[rx] = ry,
            std::cmp::Ordering::Greater => self.parent[ry] = rx,
            std::cmp::Ordering::Equal => {
                self.parent[ry] = rx;
                self.rank[rx] += 1;
            }
        }
        true
    }

    /// Members grouped by set, each group sorted, groups ordered by their
    /// smallest member. Independent of union order.
    pub fn groups(&mut self) -> Vec<Vec<usize>> {
        let mut by_root: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
        for i in 0..self.parent.len() {
            let root = self.find(i);
            by_root.entry(root).or_default().push(i);
        }
        let mut groups: Vec<Vec<usize>> = by_root.into_values().collect();
        groups.sort_by_key(|members| members[0]);
        groups
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.parent.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.parent.is_empty()
    }
}

/// A connected component of the match graph
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cluster {
    /// Position in the cluster list (clusters ordered by smallest member)
    pub id: usize,
    /// Record indices, ascending
    pub members: Vec<usize>,
    /// Mean score of the edges inside the cluster; 1.0 for a singleton
    pub confidence: f64,
}

impl Cluster {
    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn is_singleton(&self) -> bool {
        self.members.len() == 1
    }
}

/// Partition `0..n` into clusters joined by `edges`.
///
/// Edges referencing an index `>= n` or a self-pair are programming errors
/// and are skipped (asserted in debug builds).
pub fn cluster(edges: &[MatchEdge], n: usize) -> Vec<Cluster> {
    let mut sets = UnionFind::new(n);
    for edge in edges {
        debug_assert!(edge.i < edge.j && edge.j < n, "invalid match edge {:?}", edge);
        if edge.i < edge.j && edge.j < n {
            sets.union(edge.i, edge.j);
        }
    }

    let groups = sets.groups();

    let mut cluster_of = vec![0usize; n];
    for (id, members) in groups.iter().enumerate() {
        for &m in members {
            cluster_of[m] = id;
        }
    }
    let mut score_sums = vec![(0.0f64, 0usize); groups.len()];
    for edge in edges.iter().filter(|e| e.i < e.j && e.j < n) {
        let id = cluster_of[edge.i];
        score_sums[id].0 += edge.score;
        score_sums[id].1 += 1;
    }

    let clusters: Vec<Cluster> = groups
        .into_iter()
        .enumerate()
        .map(|(id, members)| {
            let (sum, count) = score_sums[id];
            let confidence = if count == 0 { 1.0 } else { sum / count as f64 };
            Cluster {
                id,
                members,
                confidence,
            }
        })
        .collect();

    debug_assert!(is_partition(&clusters, n), "clusters do not partition 0..{}", n);
    clusters
}

/// True when every index in `0..n` appears in exactly one cluster
pub fn is_partition(clusters: &[Cluster], n: usize) -> bool {
    let mut seen = vec![false; n];
    for member in clusters.iter().flat_map(|c| c.members.iter().copied()) {
        if member >= n || seen[member] {
            return false;
        }
        seen[member] = true;
    }
    seen.into_iter().all(|s| s)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn edge(i: usize, j: usize, score: f64) -> MatchEdge {
        MatchEdge { i, j, score }
    }

    #[test]
    fn test_union_find_basics() {
        let mut uf = UnionFind::new(4);
        assert!(uf.union(0, 1));
        assert!(!uf.union(1, 0));
        assert_eq!(uf.find(0), uf.find(1));
        assert_ne!(uf.find(0), uf.find(2));
        assert_eq!(uf.len(), 4);
    }

    #[test]
    fn test_transitive_components() {
        let edges = vec![edge(0, 3, 0.9), edge(3, 4, 0.95), edge(1, 2, 1.0)];
        let clusters = cluster(&edges, 6);

        assert_eq!(clusters.len(), 3);
        assert_eq!(clusters[0].members, vec![0, 3, 4]);
        assert_eq!(clusters[1].members, vec![1, 2]);
        assert_eq!(clusters[2].members, vec![5]);
        assert!((clusters[0].confidence - 0.925).abs() < 1e-12);
        assert_eq!(clusters[2].confidence, 1.0);
        assert!(is_partition(&clusters, 6));
    }

    #[test]
    fn test_edge_order_does_not_matter() {
        let edges = vec![edge(0, 1, 0.9), edge(2, 3, 0.9), edge(1, 2, 0.9), edge(5, 6, 0.9)];
        let mut reversed = edges.clone();
        reversed.reverse();

        let a: Vec<Vec<usize>> = cluster(&edges, 7).into_iter().map(|c| c.members).collect();
        let b: Vec<Vec<usize>> = cluster(&reversed, 7).into_iter().map(|c| c.members).collect();
        assert_eq!(a, b);
    }

    #[test]
    fn test_no_edges_all_singletons() {
        let clusters = cluster(&[], 3);
        assert_eq!(clusters.len(), 3);
        assert!(clusters.iter().all(Cluster::is_singleton));
    }

    #[test]
    fn test_empty_batch() {
        assert!(cluster(&[], 0).is_empty());
    }

    #[test]
    fn test_partition_detects_duplicates() {
        let clusters = vec![
            Cluster { id: 0, members: vec![0, 1], confidence: 1.0 },
            Cluster { id: 1, members: vec![1], confidence: 1.0 },
        ];
        assert!(!is_partition(&clusters, 2));
    }
}
