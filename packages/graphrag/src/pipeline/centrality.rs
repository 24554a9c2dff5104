//! Centrality scoring (PageRank) over the collection graph.

use std::collections::BTreeMap;

use petgraph::algo::page_rank;
use petgraph::graph::{DiGraph, NodeIndex};

use crate::types::config::PageRankConfig;
use crate::types::graph::KnowledgeGraph;

/// PageRank score per node name.
///
/// Edges are undirected, so each contributes in both directions. Nodes are
/// inserted in name order, which makes the scores reproducible.
pub fn pagerank_scores(graph: &KnowledgeGraph, config: &PageRankConfig) -> BTreeMap<String, f64> {
    if graph.is_empty() {
        return BTreeMap::new();
    }

    let mut pg: DiGraph<(), ()> = DiGraph::with_capacity(graph.node_count(), graph.edge_count() * 2);
    let mut index: BTreeMap<&str, NodeIndex> = BTreeMap::new();
    let mut names: Vec<&str> = Vec::with_capacity(graph.node_count());
    for name in graph.node_names() {
        index.insert(name, pg.add_node(()));
        names.push(name);
    }
    for key in graph.edge_keys() {
        if let (Some(&a), Some(&b)) = (index.get(key.source.as_str()), index.get(key.target.as_str())) {
            pg.add_edge(a, b, ());
            pg.add_edge(b, a, ());
        }
    }

    let scores = page_rank(&pg, config.damping, config.iterations);
    names
        .into_iter()
        .zip(scores)
        .map(|(name, score)| (name.to_string(), score))
        .collect()
}

/// Recompute and store every node's centrality.
pub fn refresh_centrality(graph: &mut KnowledgeGraph, config: &PageRankConfig) {
    let scores = pagerank_scores(graph, config);
    for (name, score) in scores {
        if let Some(node) = graph.node_mut(&name) {
            node.centrality = score;
        }
    }
}
