//! Property tests for fragment merging.
//!
//! Fragments may reach the collection graph in any order and more than once;
//! the merged graph must not depend on either.

use std::collections::BTreeSet;

use proptest::prelude::*;

use graphrag::pipeline::merge_fragments;
use graphrag::{Entity, Fragment, KnowledgeGraph, PageRankConfig, Relationship};

const NAMES: [&str; 5] = ["Acme", "Bolt Inc", "Carol", "Dan", "Eve"];
const TYPES: [&str; 2] = ["organization", "person"];

type NodeView = (String, String, String, BTreeSet<String>);
type EdgeView = (String, String, String, BTreeSet<String>, BTreeSet<String>, u64);

/// Everything but centrality, which is recomputed from the same structure.
fn view(graph: &KnowledgeGraph) -> (Vec<NodeView>, Vec<EdgeView>, BTreeSet<String>) {
    let nodes = graph
        .nodes()
        .map(|n| {
            (
                n.name.clone(),
                n.entity_type.clone(),
                n.description.clone(),
                n.source_ids.clone(),
            )
        })
        .collect();
    let edges = graph
        .edges()
        .map(|e| {
            (
                e.source.clone(),
                e.target.clone(),
                e.description.clone(),
                e.keywords.clone(),
                e.source_ids.clone(),
                e.weight as u64,
            )
        })
        .collect();
    (nodes, edges, graph.source_ids().clone())
}

fn fragment(doc: usize, members: &[usize], links: &[(usize, usize, u8)]) -> Fragment {
    let document_id = format!("doc-{doc}");
    let nodes = members.iter().map(|&i| {
        Entity::new(
            NAMES[i],
            TYPES[(i + doc) % TYPES.len()],
            format!("{} as seen by {document_id}", NAMES[i]),
        )
        .with_source(document_id.clone())
    });
    let edges = links.iter().filter(|(a, b, _)| a != b).map(|&(a, b, w)| {
        Relationship::new(NAMES[a], NAMES[b], format!("link in {document_id}"))
            .with_weight(f64::from(w))
            .with_keywords([format!("k{w}")])
            .with_source(document_id.clone())
    });
    let (graph, _dropped) = KnowledgeGraph::from_parts(nodes, edges, Vec::new());
    Fragment::new(document_id, graph)
}

fn fragments() -> impl Strategy<Value = Vec<Fragment>> {
    let one = (
        prop::collection::vec(0..NAMES.len(), 1..5),
        prop::collection::vec((0..NAMES.len(), 0..NAMES.len(), 1..4u8), 0..6),
    );
    prop::collection::vec(one, 1..6).prop_map(|specs| {
        specs
            .iter()
            .enumerate()
            .map(|(doc, (members, links))| fragment(doc, members, links))
            .collect()
    })
}

fn merged(fragments: &[Fragment]) -> KnowledgeGraph {
    let mut graph = KnowledgeGraph::new();
    merge_fragments(&mut graph, fragments, &PageRankConfig::default());
    graph
}

proptest! {
    #[test]
    fn merge_order_does_not_change_the_graph(fragments in fragments()) {
        let forward = merged(&fragments);

        let mut reversed = fragments.clone();
        reversed.reverse();
        let backward = merged(&reversed);

        let mut rotated = fragments.clone();
        rotated.rotate_left(1);
        let shifted = merged(&rotated);

        prop_assert_eq!(view(&forward), view(&backward));
        prop_assert_eq!(view(&forward), view(&shifted));
    }

    #[test]
    fn merging_a_fragment_twice_is_a_no_op(fragments in fragments()) {
        let mut graph = merged(&fragments);
        let once = view(&graph);

        let outcome = merge_fragments(&mut graph, &fragments, &PageRankConfig::default());
        prop_assert!(outcome.change.is_empty());
        prop_assert!(outcome.merged.is_empty());
        prop_assert_eq!(outcome.already_merged.len(), fragments.len());
        prop_assert_eq!(view(&graph), once);
    }

    #[test]
    fn merged_edges_only_join_existing_nodes(fragments in fragments()) {
        let graph = merged(&fragments);
        for edge in graph.edges() {
            prop_assert!(graph.has_node(&edge.source));
            prop_assert!(graph.has_node(&edge.target));
            prop_assert!(!edge.source_ids.is_empty());
        }
        for fragment in &fragments {
            prop_assert!(graph.contains_source(&fragment.document_id));
        }
    }
}

#[test]
fn test_source_ids_union_across_fragments() {
    let graph = merged(&[
        fragment(0, &[0, 1], &[(0, 1, 1)]),
        fragment(1, &[0, 2], &[(0, 2, 2)]),
        fragment(2, &[0, 1], &[(0, 1, 3)]),
    ]);

    let acme = graph.node("ACME").unwrap();
    assert_eq!(
        acme.source_ids,
        BTreeSet::from(["doc-0".to_string(), "doc-1".to_string(), "doc-2".to_string()])
    );
    assert_eq!(acme.description.matches("<SEP>").count(), 2);

    let edge = graph.edge("ACME", "BOLT INC").unwrap();
    assert_eq!(edge.weight, 4.0);
    assert_eq!(edge.source_ids.len(), 2);
}
