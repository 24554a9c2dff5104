//! Serialized merge of fragments into the collection graph.

use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, info};

use crate::codec::GraphCodec;
use crate::error::Result;
use crate::pipeline::centrality::refresh_centrality;
use crate::pipeline::locking::CollectionLocks;
use crate::pipeline::with_deadline;
use crate::types::config::{GraphRagConfig, PageRankConfig};
use crate::types::graph::{Fragment, GraphChange, KnowledgeGraph};

/// Result of one merge invocation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MergeOutcome {
    pub change: GraphChange,

    /// Documents merged by this call
    pub merged: Vec<String>,

    /// Documents whose fragment the graph already contained
    pub already_merged: Vec<String>,
}

/// Fold fragments into `graph` in order, then refresh centrality.
///
/// A fragment whose document is already recorded in the graph is skipped, so
/// applying the same fragment twice is a no-op.
pub fn merge_fragments(
    graph: &mut KnowledgeGraph,
    fragments: &[Fragment],
    pagerank: &PageRankConfig,
) -> MergeOutcome {
    let mut outcome = MergeOutcome::default();
    for fragment in fragments {
        if graph.contains_source(&fragment.document_id) {
            outcome.already_merged.push(fragment.document_id.clone());
            continue;
        }
        graph.merge(&fragment.graph, &mut outcome.change);
        graph.add_source_id(fragment.document_id.clone());
        outcome.merged.push(fragment.document_id.clone());
    }
    if !outcome.merged.is_empty() {
        refresh_centrality(graph, pagerank);
    }
    outcome
}

/// Merges fragments into a collection's persistent graph under the
/// collection lock.
#[derive(Clone)]
pub struct MergeCoordinator {
    codec: GraphCodec,
    locks: CollectionLocks,
    config: Arc<GraphRagConfig>,
}

impl MergeCoordinator {
    pub fn new(codec: GraphCodec, locks: CollectionLocks, config: Arc<GraphRagConfig>) -> Self {
        Self {
            codec,
            locks,
            config,
        }
    }

    /// Merge `fragments` into the collection graph.
    ///
    /// Load, merge, centrality and persist all happen while holding the
    /// lock; the persist is the last step, so a failure leaves the stored
    /// graph untouched. Lock timeout, deadline and persistence failures are
    /// returned as errors.
    pub async fn merge(&self, collection_id: &str, fragments: &[Fragment]) -> Result<MergeOutcome> {
        if fragments.is_empty() {
            return Ok(MergeOutcome::default());
        }
        let started = Instant::now();

        let outcome = self
            .locks
            .with_lock(collection_id, || {
                with_deadline("merge", self.config.deadlines.merge(), async {
                    let mut graph = self
                        .codec
                        .load_graph(collection_id)
                        .await?
                        .unwrap_or_default();

                    let outcome = merge_fragments(&mut graph, fragments, &self.config.pagerank);
                    if outcome.merged.is_empty() {
                        debug!(collection_id = %collection_id, "All fragments already merged");
                        return Ok(outcome);
                    }

                    self.codec.save_graph(collection_id, &graph).await?;
                    info!(
                        collection_id = %collection_id,
                        fragments = outcome.merged.len(),
                        nodes = graph.node_count(),
                        edges = graph.edge_count(),
                        changed_nodes = outcome.change.added_updated_nodes.len(),
                        changed_edges = outcome.change.added_updated_edges.len(),
                        "Merged fragments into collection graph"
                    );
                    Ok(outcome)
                })
            })
            .await?;

        debug!(
            collection_id = %collection_id,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Merge finished"
        );
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stores::memory::{MemoryLock, MemoryStore};
    use crate::types::config::LockConfig;
    use crate::types::graph::{Entity, Relationship};
    use std::time::Duration;

    fn fragment(doc: &str, nodes: &[&str], edges: &[(&str, &str)]) -> Fragment {
        let mut graph = KnowledgeGraph::new();
        for n in nodes {
            graph.upsert_entity(Entity::new(n, "organization", format!("{n} in {doc}")).with_source(doc));
        }
        for (a, b) in edges {
            graph.upsert_relationship(Relationship::new(a, b, format!("{a}-{b}")).with_source(doc));
        }
        Fragment::new(doc, graph)
    }

    fn coordinator(store: Arc<MemoryStore>, lock: Arc<MemoryLock>) -> MergeCoordinator {
        let config = GraphRagConfig::default().with_lock(
            LockConfig::default()
                .with_acquire_wait(Duration::from_millis(200))
                .with_poll_interval(Duration::from_millis(5)),
        );
        MergeCoordinator::new(
            GraphCodec::new(store),
            CollectionLocks::new(lock, config.lock.clone()),
            Arc::new(config),
        )
    }

    #[test]
    fn test_merge_unions_source_ids() {
        let mut graph = KnowledgeGraph::new();
        let a = fragment("d1", &["acme", "bolt"], &[("acme", "bolt")]);
        let b = fragment("d2", &["acme", "cog"], &[("acme", "cog")]);

        let outcome = merge_fragments(&mut graph, &[a, b], &PageRankConfig::default());

        let acme = graph.node("ACME").unwrap();
        assert_eq!(acme.source_ids.len(), 2);
        assert!(acme.description.contains("acme in d1"));
        assert!(acme.description.contains("acme in d2"));
        assert_eq!(outcome.merged, vec!["d1", "d2"]);
        assert_eq!(outcome.change.added_updated_nodes.len(), 3);
        assert!(acme.centrality > 0.0);
    }

    #[test]
    fn test_remerging_same_fragment_is_noop() {
        let mut graph = KnowledgeGraph::new();
        let a = fragment("d1", &["acme", "bolt"], &[("acme", "bolt")]);

        merge_fragments(&mut graph, &[a.clone()], &PageRankConfig::default());
        let snapshot = graph.clone();
        let again = merge_fragments(&mut graph, &[a], &PageRankConfig::default());

        assert!(again.change.is_empty());
        assert_eq!(again.already_merged, vec!["d1"]);
        assert_eq!(graph, snapshot);
    }

    #[tokio::test]
    async fn test_merge_persists_and_releases_lock() {
        let store = Arc::new(MemoryStore::new());
        let lock = Arc::new(MemoryLock::new());
        let merger = coordinator(store.clone(), lock.clone());

        let outcome = merger
            .merge("kb1", &[fragment("d1", &["a", "b"], &[("a", "b")])])
            .await
            .unwrap();
        assert_eq!(outcome.merged, vec!["d1"]);

        let graph = GraphCodec::new(store).load_graph("kb1").await.unwrap().unwrap();
        assert_eq!(graph.node_count(), 2);
        assert!(graph.contains_source("d1"));
        assert_eq!(lock.holder("graphrag_task_kb1"), None);
    }

    #[tokio::test]
    async fn test_merge_times_out_while_lock_held() {
        let store = Arc::new(MemoryStore::new());
        let lock = Arc::new(MemoryLock::new());
        let merger = coordinator(store.clone(), lock.clone());

        let held = CollectionLocks::new(lock.clone(), LockConfig::default())
            .acquire("kb1")
            .await
            .unwrap();
        let err = merger
            .merge("kb1", &[fragment("d1", &["a"], &[])])
            .await
            .unwrap_err();
        assert!(err.is_retryable());
        assert!(GraphCodec::new(store).load_graph("kb1").await.unwrap().is_none());

        held.release().await.unwrap();
    }
}
