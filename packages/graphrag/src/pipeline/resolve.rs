//! Entity resolution: merges near-duplicate entities judged identical by the
//! LLM.
//!
//! Scope is the set of nodes touched by the latest merge plus their
//! neighborhood, never a full rescan. Candidate pairs must share a type and
//! pass the cheap name filter before any LLM call is made. All edits happen
//! on an in-memory copy; the stored graph changes only at the final persist.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Instant;

use futures::future::join_all;
use petgraph::unionfind::UnionFind;
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

use crate::codec::GraphCodec;
use crate::error::{GraphError, Result};
use crate::pipeline::centrality::refresh_centrality;
use crate::pipeline::locking::CollectionLocks;
use crate::pipeline::similarity::is_similar;
use crate::pipeline::with_deadline;
use crate::traits::cache::{cache_key, cached, remember, LlmCache};
use crate::traits::cancel::JobContext;
use crate::traits::llm::GraphLlm;
use crate::types::config::GraphRagConfig;
use crate::types::graph::{EdgeKey, Entity, GraphChange, KnowledgeGraph};

/// Result of one resolution pass.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResolutionOutcome {
    pub change: GraphChange,

    /// Pairs sent to the LLM
    pub candidates: usize,

    /// Pairs judged identical
    pub matched: usize,

    /// Nodes merged away
    pub removed: usize,
}

/// Same-type name pairs worth asking about.
///
/// At least one side of each pair lies in `scope`. Pairs are `(a, b)` with
/// `a < b`, sorted.
pub fn candidate_pairs(graph: &KnowledgeGraph, scope: &BTreeSet<String>) -> Vec<(String, String)> {
    let mut by_type: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
    for node in graph.nodes() {
        by_type.entry(node.entity_type.as_str()).or_default().push(node.name.as_str());
    }

    let mut pairs = Vec::new();
    for names in by_type.values() {
        for (i, a) in names.iter().enumerate() {
            for b in &names[i + 1..] {
                if !scope.contains(*a) && !scope.contains(*b) {
                    continue;
                }
                if is_similar(a, b) {
                    pairs.push((a.to_string(), b.to_string()));
                }
            }
        }
    }
    pairs
}

/// Merge each group of identical entities into one survivor.
///
/// The survivor is the member with the most edges (ties: smaller name).
/// Edges are re-pointed to it; edges that would become self-loops are
/// removed.
pub fn merge_duplicates(graph: &mut KnowledgeGraph, groups: &[BTreeSet<String>]) -> GraphChange {
    let mut change = GraphChange::new();

    for group in groups {
        let Some(survivor) = group
            .iter()
            .filter(|n| graph.has_node(n))
            .max_by(|a, b| graph.degree(a).cmp(&graph.degree(b)).then_with(|| b.cmp(a)))
            .cloned()
        else {
            continue;
        };

        for duplicate in group.iter().filter(|n| **n != survivor) {
            let Some((entity, edges)) = graph.remove_node(duplicate) else {
                continue;
            };
            change.node_removed(duplicate);

            if let Some(node) = graph.node_mut(&survivor) {
                node.absorb(&entity);
            }

            for mut edge in edges {
                let old_key = edge.key();
                change.edge_removed(old_key.clone());

                let Some(other) = old_key.other(duplicate).map(str::to_string) else {
                    continue;
                };
                if other == survivor {
                    continue;
                }
                let key = EdgeKey::new(survivor.clone(), other);
                edge.source = key.source.clone();
                edge.target = key.target.clone();
                if graph.upsert_relationship(edge).is_some() {
                    change.edge_upserted(key);
                }
            }
        }
        change.node_upserted(&survivor);
    }
    change
}

/// Group matched pairs into connected components.
fn group_matches(pairs: &[(String, String)]) -> Vec<BTreeSet<String>> {
    let names: BTreeSet<&str> = pairs
        .iter()
        .flat_map(|(a, b)| [a.as_str(), b.as_str()])
        .collect();
    let index: BTreeMap<&str, usize> = names.iter().enumerate().map(|(i, n)| (*n, i)).collect();

    let mut sets = UnionFind::<usize>::new(names.len());
    for (a, b) in pairs {
        sets.union(index[a.as_str()], index[b.as_str()]);
    }

    let mut groups: BTreeMap<usize, BTreeSet<String>> = BTreeMap::new();
    for (name, &i) in &index {
        groups.entry(sets.find(i)).or_default().insert(name.to_string());
    }
    groups.into_values().filter(|g| g.len() > 1).collect()
}

const STAGE: &str = "resolving";

/// Deduplicates entities of a collection graph under the collection lock.
#[derive(Clone)]
pub struct EntityResolver {
    llm: Arc<dyn GraphLlm>,
    codec: GraphCodec,
    locks: CollectionLocks,
    cache: Option<Arc<dyn LlmCache>>,
    config: Arc<GraphRagConfig>,
}

impl EntityResolver {
    pub fn new(
        llm: Arc<dyn GraphLlm>,
        codec: GraphCodec,
        locks: CollectionLocks,
        config: Arc<GraphRagConfig>,
    ) -> Self {
        Self {
            llm,
            codec,
            locks,
            cache: None,
            config,
        }
    }

    /// Use an LLM response cache.
    pub fn with_cache(mut self, cache: Arc<dyn LlmCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Resolve duplicates around `touched` and persist the result.
    ///
    /// A failed judgment batch leaves its pairs unmerged. Exceeding the pass
    /// deadline or canceling the job aborts without writing anything.
    pub async fn resolve(
        &self,
        collection_id: &str,
        touched: &BTreeSet<String>,
        job: &JobContext,
    ) -> Result<ResolutionOutcome> {
        let started = Instant::now();

        let outcome = self
            .locks
            .with_lock(collection_id, || {
                with_deadline("entity resolution", self.config.deadlines.resolution_pass(), async {
                    let mut graph = self.codec.load_graph(collection_id).await?.ok_or_else(|| {
                        GraphError::MissingGraph {
                            collection_id: collection_id.to_string(),
                        }
                    })?;

                    let outcome = self.resolve_graph(&mut graph, touched, job).await?;
                    if outcome.change.is_empty() {
                        return Ok(outcome);
                    }

                    refresh_centrality(&mut graph, &self.config.pagerank);
                    job.check(STAGE).await?;
                    self.codec.save_graph(collection_id, &graph).await?;
                    Ok(outcome)
                })
            })
            .await?;

        info!(
            collection_id = %collection_id,
            candidates = outcome.candidates,
            matched = outcome.matched,
            removed = outcome.removed,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Entity resolution finished"
        );
        Ok(outcome)
    }

    /// Resolve in memory without touching storage.
    ///
    /// Cancellation is checked before each judgment batch; a canceled job
    /// returns `Cancelled` and leaves `graph` untouched.
    pub async fn resolve_graph(
        &self,
        graph: &mut KnowledgeGraph,
        touched: &BTreeSet<String>,
        job: &JobContext,
    ) -> Result<ResolutionOutcome> {
        let scope = graph.neighborhood(touched, self.config.resolution.neighborhood_radius);
        let pairs = candidate_pairs(graph, &scope);
        let mut outcome = ResolutionOutcome {
            candidates: pairs.len(),
            ..Default::default()
        };
        if pairs.is_empty() {
            return Ok(outcome);
        }
        debug!(scope = scope.len(), candidates = pairs.len(), "Judging candidate pairs");

        let semaphore = Arc::new(Semaphore::new(self.config.resolution.max_concurrency));
        let batches: Vec<(&[(String, String)], Vec<(Entity, Entity)>)> = pairs
            .chunks(self.config.resolution.batch_size)
            .map(|batch| {
                let entities = batch
                    .iter()
                    .filter_map(|(a, b)| Some((graph.node(a)?.clone(), graph.node(b)?.clone())))
                    .collect();
                (batch, entities)
            })
            .collect();

        let judgments = batches.into_iter().map(|(batch, entities)| {
            let semaphore = semaphore.clone();
            async move {
                // never closed
                let _permit = semaphore.acquire().await.ok();
                if let Err(e) = job.check(STAGE).await {
                    return (batch, Err(e));
                }
                let answers = with_deadline(
                    "entity judgment batch",
                    self.config.deadlines.resolution_batch(),
                    self.judge_cached(&entities),
                )
                .await;
                (batch, answers)
            }
        });

        let mut matched = Vec::new();
        for (batch, answers) in join_all(judgments).await {
            match answers {
                Ok(answers) => {
                    for (pair, answer) in batch.iter().zip(answers) {
                        if answer == Some(true) {
                            matched.push(pair.clone());
                        }
                    }
                }
                Err(e) if e.is_cancelled() => return Err(e),
                Err(e) => {
                    warn!(pairs = batch.len(), error = %e, "Judgment batch failed; pairs left unmerged");
                }
            }
        }
        outcome.matched = matched.len();

        let groups = group_matches(&matched);
        outcome.change = merge_duplicates(graph, &groups);
        outcome.removed = outcome.change.removed_nodes.len();
        Ok(outcome)
    }

    async fn judge_cached(&self, pairs: &[(Entity, Entity)]) -> Result<Vec<Option<bool>>> {
        let Some(cache) = &self.cache else {
            return self.llm.judge_same_entities(pairs).await;
        };
        let names: Vec<(&str, &str, &str)> = pairs
            .iter()
            .map(|(a, b)| (a.entity_type.as_str(), a.name.as_str(), b.name.as_str()))
            .collect();
        let key = cache_key("judge_same_entities", self.llm.model_id(), &names)?;
        if let Some(hit) = cached::<Vec<Option<bool>>>(cache.as_ref(), &key).await? {
            return Ok(hit);
        }
        let answers = self.llm.judge_same_entities(pairs).await?;
        if answers.iter().all(Option::is_some) {
            remember(cache.as_ref(), &key, &answers).await?;
        }
        Ok(answers)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stores::memory::{MemoryLock, MemoryStore};
    use crate::testing::MockLlm;
    use crate::types::graph::Relationship;
    use tokio_util::sync::CancellationToken;

    fn graph() -> KnowledgeGraph {
        let mut g = KnowledgeGraph::new();
        for (name, ty) in [
            ("Acme Corp", "organization"),
            ("Acme Corporation", "organization"),
            ("Bolt", "organization"),
            ("Alice", "person"),
        ] {
            g.upsert_entity(Entity::new(name, ty, format!("about {name}")).with_source("d1"));
        }
        g.upsert_relationship(Relationship::new("Acme Corp", "Bolt", "buys").with_source("d1"));
        g.upsert_relationship(Relationship::new("Acme Corporation", "Alice", "employs").with_source("d2"));
        g.upsert_relationship(Relationship::new("Acme Corp", "Acme Corporation", "same").with_source("d1"));
        g
    }

    #[test]
    fn test_candidate_pairs_respect_type_and_scope() {
        let g = graph();
        let scope: BTreeSet<String> = ["ACME CORP".to_string()].into();
        let pairs = candidate_pairs(&g, &scope);
        assert_eq!(pairs, vec![("ACME CORP".to_string(), "ACME CORPORATION".to_string())]);

        let outside: BTreeSet<String> = ["ALICE".to_string()].into();
        assert!(candidate_pairs(&g, &outside).is_empty());
    }

    #[test]
    fn test_merge_duplicates_repoints_edges() {
        let mut g = graph();
        let group: BTreeSet<String> = ["ACME CORP".to_string(), "ACME CORPORATION".to_string()].into();

        let change = merge_duplicates(&mut g, &[group]);

        assert_eq!(g.node_count(), 3);
        // both have degree 2; smaller name survives
        let survivor = g.node("ACME CORP").unwrap();
        assert!(survivor.description.contains("about Acme Corporation"));
        assert!(g.has_edge("ACME CORP", "ALICE"));
        assert!(g.has_edge("ACME CORP", "BOLT"));
        assert_eq!(g.edge_count(), 2);
        assert!(change.removed_nodes.contains("ACME CORPORATION"));
        assert!(change.removed_edges.contains(&EdgeKey::new("ACME CORP", "ACME CORPORATION")));
        assert!(change.added_updated_edges.contains(&EdgeKey::new("ACME CORP", "ALICE")));

        for edge in g.edges() {
            assert!(g.has_node(&edge.source) && g.has_node(&edge.target));
        }
    }

    #[test]
    fn test_group_matches_transitive() {
        let pairs = vec![
            ("A".to_string(), "B".to_string()),
            ("B".to_string(), "C".to_string()),
            ("X".to_string(), "Y".to_string()),
        ];
        let groups = group_matches(&pairs);
        assert_eq!(groups.len(), 2);
        assert!(groups.iter().any(|g| g.len() == 3));
    }

    #[tokio::test]
    async fn test_canceled_job_leaves_graph_untouched() {
        let llm = Arc::new(MockLlm::new().with_same_entities("Acme Corp", "Acme Corporation"));
        let config = Arc::new(GraphRagConfig::default());
        let resolver = EntityResolver::new(
            llm.clone(),
            GraphCodec::new(Arc::new(MemoryStore::new())),
            CollectionLocks::new(Arc::new(MemoryLock::new()), config.lock.clone()),
            config,
        );
        let token = CancellationToken::new();
        token.cancel();
        let job = JobContext::new("job-9", Arc::new(token));

        let mut g = graph();
        let before = g.clone();
        let touched: BTreeSet<String> = ["ACME CORP".to_string()].into();
        let err = resolver.resolve_graph(&mut g, &touched, &job).await.unwrap_err();

        assert!(err.is_cancelled());
        assert_eq!(g, before);
        assert_eq!(llm.judge_calls(), 0);
    }
}
