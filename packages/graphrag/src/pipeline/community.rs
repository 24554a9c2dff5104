//! Community detection and reporting.
//!
//! Communities are recomputed from scratch on every run and the collection's
//! community records are replaced wholesale.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Instant;

use futures::future::join_all;
use tokio::sync::Semaphore;
use tracing::{info, warn};

use crate::codec::GraphCodec;
use crate::error::{GraphError, Result};
use crate::pipeline::clustering::Louvain;
use crate::pipeline::locking::CollectionLocks;
use crate::pipeline::with_deadline;
use crate::traits::cache::{cache_key, cached, remember, LlmCache};
use crate::traits::cancel::JobContext;
use crate::traits::llm::GraphLlm;
use crate::types::community::{Community, CommunityContext, CommunityRecord, CommunityReport};
use crate::types::config::{CommunityConfig, GraphRagConfig};
use crate::types::graph::KnowledgeGraph;

/// Result of one community run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CommunityOutcome {
    /// Communities detected (after size and duplicate filtering)
    pub detected: usize,

    /// Records written
    pub written: usize,

    /// Communities whose summary failed and were left out
    pub failed: usize,
}

/// Detect reportable communities.
///
/// Communities smaller than `min_size`, and communities whose membership
/// repeats one from a lower level, are dropped.
pub fn detect_communities(graph: &KnowledgeGraph, config: &CommunityConfig) -> Vec<Community> {
    let levels = Louvain::new(config.resolution, config.max_levels).detect(graph);

    let mut seen: BTreeSet<BTreeSet<String>> = BTreeSet::new();
    let mut communities = Vec::new();
    for (level, partition) in levels.into_iter().enumerate() {
        for members in partition {
            if members.len() < config.min_size || seen.contains(&members) {
                continue;
            }
            seen.insert(members.clone());
            communities.push(Community { level, members });
        }
    }
    communities
}

/// What the LLM sees for one community: the most central members and the
/// relationships among them.
pub fn community_context(graph: &KnowledgeGraph, community: &Community, max_members: usize) -> CommunityContext {
    let mut entities: Vec<_> = community
        .members
        .iter()
        .filter_map(|name| graph.node(name).cloned())
        .collect();
    entities.sort_by(|a, b| b.centrality.total_cmp(&a.centrality).then_with(|| a.name.cmp(&b.name)));
    entities.truncate(max_members.max(1));

    let included: BTreeSet<&str> = entities.iter().map(|e| e.name.as_str()).collect();
    let mut relationships: Vec<_> = graph
        .edges()
        .filter(|e| included.contains(e.source.as_str()) && included.contains(e.target.as_str()))
        .cloned()
        .collect();
    relationships.sort_by(|a, b| b.weight.total_cmp(&a.weight).then_with(|| a.key().cmp(&b.key())));

    CommunityContext {
        level: community.level,
        entities,
        relationships,
    }
}

const STAGE: &str = "extracting";

/// Partitions the collection graph and replaces its community records.
#[derive(Clone)]
pub struct CommunityExtractor {
    llm: Arc<dyn GraphLlm>,
    codec: GraphCodec,
    locks: CollectionLocks,
    cache: Option<Arc<dyn LlmCache>>,
    config: Arc<GraphRagConfig>,
}

impl CommunityExtractor {
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

    /// Detect, summarize and persist the collection's communities.
    ///
    /// A failed summary drops that community from the run. If every summary
    /// fails, or the job is canceled, the stored records are left as they
    /// were. A failure while replacing the stored records is returned; the
    /// caller reruns the whole extraction.
    pub async fn extract(&self, collection_id: &str, job: &JobContext) -> Result<CommunityOutcome> {
        let started = Instant::now();

        let outcome = self
            .locks
            .with_lock(collection_id, || {
                with_deadline("community extraction", self.config.deadlines.community_pass(), async {
                    let graph = self.codec.load_graph(collection_id).await?.ok_or_else(|| {
                        GraphError::MissingGraph {
                            collection_id: collection_id.to_string(),
                        }
                    })?;

                    let communities = detect_communities(&graph, &self.config.community);
                    let (records, failed) = self
                        .summarize_all(collection_id, &graph, &communities, job)
                        .await?;
                    if records.is_empty() && !communities.is_empty() {
                        return Err(GraphError::llm(format!(
                            "all {failed} community summaries failed; keeping the previous index"
                        )));
                    }

                    job.check(STAGE).await?;
                    let written = self.codec.replace_communities(collection_id, &records).await?;

                    Ok(CommunityOutcome {
                        detected: communities.len(),
                        written,
                        failed,
                    })
                })
            })
            .await?;

        info!(
            collection_id = %collection_id,
            detected = outcome.detected,
            written = outcome.written,
            failed = outcome.failed,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Community extraction finished"
        );
        Ok(outcome)
    }

    /// Summarize every community with bounded concurrency.
    ///
    /// Returns records ordered by level then weight, and the failure count.
    /// Cancellation is checked before each summary and returned as an error.
    async fn summarize_all(
        &self,
        collection_id: &str,
        graph: &KnowledgeGraph,
        communities: &[Community],
        job: &JobContext,
    ) -> Result<(Vec<CommunityRecord>, usize)> {
        let semaphore = Arc::new(Semaphore::new(self.config.community.max_concurrency));
        let max_members = self.config.community.max_members_per_prompt;

        let jobs = communities.iter().map(|community| {
            let semaphore = semaphore.clone();
            let context = community_context(graph, community, max_members);
            async move {
                // never closed
                let _permit = semaphore.acquire().await.ok();
                if let Err(e) = job.check(STAGE).await {
                    return (community, Err(e));
                }
                let report = with_deadline(
                    "community summary",
                    self.config.deadlines.community_summary(),
                    self.summarize_cached(&context),
                )
                .await;
                (community, report)
            }
        });
        let results = join_all(jobs).await;

        let mut failed = 0;
        let mut scored = Vec::with_capacity(results.len());
        for (community, report) in results {
            match report {
                Ok(report) => {
                    let weight: f64 = community
                        .members
                        .iter()
                        .filter_map(|m| graph.node(m))
                        .map(|n| n.centrality)
                        .sum();
                    scored.push((community, report, weight));
                }
                Err(e) if e.is_cancelled() => return Err(e),
                Err(e) => {
                    warn!(
                        level = community.level,
                        members = community.members.len(),
                        error = %e,
                        "Community summary failed"
                    );
                    failed += 1;
                }
            }
        }

        let max_weight = scored.iter().map(|(_, _, w)| *w).fold(0.0_f64, f64::max);
        let mut records: Vec<CommunityRecord> = scored
            .into_iter()
            .map(|(community, report, weight)| {
                let normalized = if max_weight > 0.0 { weight / max_weight } else { 0.0 };
                let sources: BTreeSet<String> = community
                    .members
                    .iter()
                    .filter_map(|m| graph.node(m))
                    .flat_map(|n| n.source_ids.iter().cloned())
                    .collect();
                CommunityRecord::from_report(collection_id, community, &report, normalized, sources)
            })
            .collect();
        records.sort_by(|a, b| {
            a.level
                .cmp(&b.level)
                .then_with(|| b.weight.total_cmp(&a.weight))
                .then_with(|| a.entities.cmp(&b.entities))
        });
        Ok((records, failed))
    }

    async fn summarize_cached(&self, context: &CommunityContext) -> Result<CommunityReport> {
        let Some(cache) = &self.cache else {
            return self.llm.summarize_community(context).await;
        };
        let key = cache_key("summarize_community", self.llm.model_id(), context)?;
        if let Some(hit) = cached::<CommunityReport>(cache.as_ref(), &key).await? {
            return Ok(hit);
        }
        let report = self.llm.summarize_community(context).await?;
        remember(cache.as_ref(), &key, &report).await?;
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::centrality::refresh_centrality;
    use crate::types::config::PageRankConfig;
    use crate::types::graph::{Entity, Relationship};

    fn two_clusters() -> KnowledgeGraph {
        let mut g = KnowledgeGraph::new();
        for n in ["a", "b", "c", "x", "y", "z", "lonely"] {
            g.upsert_entity(Entity::new(n, "organization", n).with_source(format!("doc-{n}")));
        }
        for (a, b) in [("a", "b"), ("b", "c"), ("a", "c"), ("x", "y"), ("y", "z"), ("x", "z"), ("c", "x")] {
            g.upsert_relationship(Relationship::new(a, b, "rel"));
        }
        refresh_centrality(&mut g, &PageRankConfig::default());
        g
    }

    #[test]
    fn test_detect_skips_singletons() {
        let communities = detect_communities(&two_clusters(), &CommunityConfig::default());
        assert_eq!(communities.len(), 2);
        assert!(communities.iter().all(|c| c.members.len() == 3 && c.level == 0));
    }

    #[test]
    fn test_context_limits_members() {
        let g = two_clusters();
        let community = Community {
            level: 0,
            members: ["A", "B", "C"].iter().map(|s| s.to_string()).collect(),
        };

        let context = community_context(&g, &community, 2);
        assert_eq!(context.entities.len(), 2);
        // C bridges to X, so it ranks first
        assert_eq!(context.entities[0].name, "C");
        assert_eq!(context.relationships.len(), 1);
    }
}
