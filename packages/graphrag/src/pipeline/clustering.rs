//! Hierarchical Louvain community detection.
//!
//! Local moving maximizes modularity
//!
//! Q = (1/2m) * Σij[Aij - γ(ki*kj)/(2m)] * δ(ci, cj)
//!
//! then communities are aggregated into super-nodes and the process repeats
//! on the smaller graph. Each aggregation round is one hierarchy level.
//! Nodes are visited in name order, so results are reproducible.

use std::collections::{BTreeMap, BTreeSet};

use crate::types::graph::KnowledgeGraph;

/// Passes over all nodes per level before giving up on convergence.
const MAX_PASSES: usize = 64;

const MIN_GAIN: f64 = 1e-12;

/// Weighted undirected graph over dense indices.
#[derive(Debug, Clone)]
struct WeightedGraph {
    /// Neighbor -> weight, self excluded
    adj: Vec<BTreeMap<usize, f64>>,
    /// Weight of edges folded inside each node
    internal: Vec<f64>,
}

impl WeightedGraph {
    fn len(&self) -> usize {
        self.adj.len()
    }

    fn degree(&self, i: usize) -> f64 {
        self.adj[i].values().sum::<f64>() + 2.0 * self.internal[i]
    }

    fn total_weight(&self) -> f64 {
        (0..self.len()).map(|i| self.degree(i)).sum::<f64>() / 2.0
    }
}

/// Louvain clustering parameters.
#[derive(Debug, Clone)]
pub struct Louvain {
    /// Resolution γ (higher = more communities)
    pub resolution: f64,
    /// Maximum hierarchy depth
    pub max_levels: usize,
}

impl Louvain {
    pub fn new(resolution: f64, max_levels: usize) -> Self {
        Self {
            resolution,
            max_levels,
        }
    }

    /// Detect communities at up to `max_levels` levels.
    ///
    /// Level 0 is the finest partition. Every level covers every node.
    /// Stops early once a level merges nothing further.
    pub fn detect(&self, graph: &KnowledgeGraph) -> Vec<Vec<BTreeSet<String>>> {
        let names: Vec<&str> = graph.node_names().collect();
        if names.is_empty() || self.max_levels == 0 {
            return Vec::new();
        }
        let index: BTreeMap<&str, usize> = names.iter().enumerate().map(|(i, n)| (*n, i)).collect();

        let mut current = WeightedGraph {
            adj: vec![BTreeMap::new(); names.len()],
            internal: vec![0.0; names.len()],
        };
        for edge in graph.edges() {
            let (Some(&a), Some(&b)) = (index.get(edge.source.as_str()), index.get(edge.target.as_str())) else {
                continue;
            };
            let w = edge.weight.max(0.0);
            if w == 0.0 || a == b {
                continue;
            }
            *current.adj[a].entry(b).or_default() += w;
            *current.adj[b].entry(a).or_default() += w;
        }

        // membership[i] = super-node that original node i belongs to
        let mut membership: Vec<usize> = (0..names.len()).collect();
        let mut levels = Vec::new();

        for _ in 0..self.max_levels {
            let assignment = self.local_moving(&current);
            let (assignment, count) = renumber(&assignment);
            if count == current.len() && !levels.is_empty() {
                break;
            }

            for m in membership.iter_mut() {
                *m = assignment[*m];
            }
            let mut communities: Vec<BTreeSet<String>> = vec![BTreeSet::new(); count];
            for (node, &c) in membership.iter().enumerate() {
                communities[c].insert(names[node].to_string());
            }
            levels.push(communities);

            if count == current.len() {
                break;
            }
            current = aggregate(&current, &assignment, count);
        }
        levels
    }

    /// Move nodes between communities until no move improves modularity.
    fn local_moving(&self, graph: &WeightedGraph) -> Vec<usize> {
        let n = graph.len();
        let mut community: Vec<usize> = (0..n).collect();
        let m = graph.total_weight();
        if m == 0.0 {
            return community;
        }

        let degrees: Vec<f64> = (0..n).map(|i| graph.degree(i)).collect();
        let mut totals = degrees.clone();

        for _ in 0..MAX_PASSES {
            let mut moved = false;
            for node in 0..n {
                let own = community[node];
                let k = degrees[node];
                totals[own] -= k;

                let mut links: BTreeMap<usize, f64> = BTreeMap::new();
                links.insert(own, 0.0);
                for (&neighbor, &w) in &graph.adj[node] {
                    *links.entry(community[neighbor]).or_default() += w;
                }

                let gain = |c: usize, w: f64| w - self.resolution * totals[c] * k / (2.0 * m);
                let mut best = own;
                let mut best_gain = gain(own, links[&own]);
                for (&c, &w) in &links {
                    let g = gain(c, w);
                    if g > best_gain + MIN_GAIN {
                        best = c;
                        best_gain = g;
                    }
                }

                totals[best] += k;
                if best != own {
                    community[node] = best;
                    moved = true;
                }
            }
            if !moved {
                break;
            }
        }
        community
    }
}

/// Renumber community ids densely in order of first appearance.
fn renumber(assignment: &[usize]) -> (Vec<usize>, usize) {
    let mut ids: BTreeMap<usize, usize> = BTreeMap::new();
    let mut out = Vec::with_capacity(assignment.len());
    for &c in assignment {
        let next = ids.len();
        out.push(*ids.entry(c).or_insert(next));
    }
    (out, ids.len())
}

/// Collapse each community into one node.
fn aggregate(graph: &WeightedGraph, assignment: &[usize], count: usize) -> WeightedGraph {
    let mut next = WeightedGraph {
        adj: vec![BTreeMap::new(); count],
        internal: vec![0.0; count],
    };
    for (node, neighbors) in graph.adj.iter().enumerate() {
        let c = assignment[node];
        next.internal[c] += graph.internal[node];
        for (&neighbor, &w) in neighbors {
            // each undirected edge is seen from both ends
            if neighbor < node {
                continue;
            }
            let d = assignment[neighbor];
            if c == d {
                next.internal[c] += w;
            } else {
                *next.adj[c].entry(d).or_default() += w;
                *next.adj[d].entry(c).or_default() += w;
            }
        }
    }
    next
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::graph::{Entity, Relationship};

    fn graph(edges: &[(&str, &str)]) -> KnowledgeGraph {
        let mut g = KnowledgeGraph::new();
        for (a, b) in edges {
            g.upsert_entity(Entity::new(a, "organization", *a));
            g.upsert_entity(Entity::new(b, "organization", *b));
        }
        for (a, b) in edges {
            g.upsert_relationship(Relationship::new(a, b, "rel"));
        }
        g
    }

    #[test]
    fn test_two_triangles_split_at_bridge() {
        let g = graph(&[
            ("a", "b"),
            ("b", "c"),
            ("a", "c"),
            ("x", "y"),
            ("y", "z"),
            ("x", "z"),
            ("c", "x"),
        ]);

        let levels = Louvain::new(1.0, 3).detect(&g);
        let finest = &levels[0];
        assert_eq!(finest.len(), 2);

        let abc: BTreeSet<String> = ["A", "B", "C"].iter().map(|s| s.to_string()).collect();
        assert!(finest.contains(&abc));
    }

    #[test]
    fn test_every_level_covers_every_node() {
        let g = graph(&[("a", "b"), ("b", "c"), ("c", "d"), ("d", "e"), ("e", "f"), ("f", "a")]);

        for level in Louvain::new(1.0, 3).detect(&g) {
            let covered: usize = level.iter().map(BTreeSet::len).sum();
            assert_eq!(covered, g.node_count());
        }
    }

    #[test]
    fn test_isolated_nodes_stay_alone() {
        let mut g = KnowledgeGraph::new();
        g.upsert_entity(Entity::new("solo", "person", "alone"));
        g.upsert_entity(Entity::new("other", "person", "alone too"));

        let levels = Louvain::new(1.0, 3).detect(&g);
        assert_eq!(levels.len(), 1);
        assert_eq!(levels[0].len(), 2);
    }

    #[test]
    fn test_deterministic() {
        let g = graph(&[("a", "b"), ("b", "c"), ("c", "a"), ("c", "d"), ("d", "e")]);
        let louvain = Louvain::new(1.0, 3);
        assert_eq!(louvain.detect(&g), louvain.detect(&g));
    }
}
