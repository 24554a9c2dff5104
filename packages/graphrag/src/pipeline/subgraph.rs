//! Per-document fragment extraction.
//!
//! A fragment is built at most once per document: the persisted
//! `subgraph:<document_id>` artifact is the idempotency marker, so a
//! redelivered document is reported as already built without touching the LLM.

use std::collections::BTreeSet;
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::codec::GraphCodec;
use crate::error::{GraphError, Result};
use crate::pipeline::chunking::{estimate_tokens, pack_chunks};
use crate::pipeline::with_deadline;
use crate::traits::cache::{cache_key, cached, remember, LlmCache};
use crate::traits::llm::GraphLlm;
use crate::traits::store::ChunkSource;
use crate::types::batch::FailureReason;
use crate::types::config::GraphRagConfig;
use crate::types::extraction::{ExtractionRequest, RawExtraction};
use crate::types::graph::{
    description_parts, normalize_entity_type, Entity, Fragment, KnowledgeGraph, Relationship,
};

/// What happened to one document.
#[derive(Debug, Clone)]
pub enum FragmentOutcome {
    /// A new fragment was extracted and persisted
    Built(Fragment),
    /// A fragment was already persisted; nothing was extracted
    AlreadyBuilt,
    Failed(FailureReason),
}

/// Outcome of [`SubgraphBuilder::build`].
#[derive(Debug, Clone)]
pub struct FragmentReport {
    pub document_id: String,
    /// Chunks read for this document (0 when already built)
    pub chunks: usize,
    pub outcome: FragmentOutcome,
}

/// Extracts and persists one document's fragment.
#[derive(Clone)]
pub struct SubgraphBuilder {
    llm: Arc<dyn GraphLlm>,
    chunks: Arc<dyn ChunkSource>,
    codec: GraphCodec,
    cache: Option<Arc<dyn LlmCache>>,
    config: Arc<GraphRagConfig>,
}

impl SubgraphBuilder {
    pub fn new(
        llm: Arc<dyn GraphLlm>,
        chunks: Arc<dyn ChunkSource>,
        codec: GraphCodec,
        config: Arc<GraphRagConfig>,
    ) -> Self {
        Self {
            llm,
            chunks,
            codec,
            cache: None,
            config,
        }
    }

    /// Use an LLM response cache.
    pub fn with_cache(mut self, cache: Arc<dyn LlmCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Build the fragment for one document.
    ///
    /// Never fails as a whole: extraction, deadline and storage errors come
    /// back as `FragmentOutcome::Failed` so siblings in a batch keep going.
    /// Nothing is retried here.
    pub async fn build(&self, collection_id: &str, document_id: &str) -> FragmentReport {
        let mut chunks_read = 0;
        let outcome = match self.try_build(collection_id, document_id, &mut chunks_read).await {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!(
                    collection_id = %collection_id,
                    document_id = %document_id,
                    error = %e,
                    "Fragment build failed"
                );
                FragmentOutcome::Failed(failure_reason(e))
            }
        };
        FragmentReport {
            document_id: document_id.to_string(),
            chunks: chunks_read,
            outcome,
        }
    }

    async fn try_build(
        &self,
        collection_id: &str,
        document_id: &str,
        chunks_read: &mut usize,
    ) -> Result<FragmentOutcome> {
        if self.codec.fragment_exists(collection_id, document_id).await? {
            debug!(document_id = %document_id, "Fragment already built, skipping");
            return Ok(FragmentOutcome::AlreadyBuilt);
        }

        let chunks = self.chunks.list_chunks(collection_id, document_id).await?;
        *chunks_read = chunks.len();
        if chunks.is_empty() {
            return Ok(FragmentOutcome::Failed(FailureReason::EmptyInput));
        }

        let batches = pack_chunks(&chunks, self.config.chunk_token_budget);
        if batches.is_empty() {
            return Ok(FragmentOutcome::Failed(FailureReason::EmptyInput));
        }
        let deadline = self.config.deadlines.document_build(batches.len());

        let graph = with_deadline(&format!("extraction of {document_id}"), deadline, async {
            let mut raw = RawExtraction::new();
            for text in &batches {
                raw.extend(self.extract_cached(document_id, text).await?);
            }
            let mut graph = self.assemble(document_id, raw);
            self.condense_descriptions(&mut graph).await?;
            Ok(graph)
        })
        .await?;

        if graph.node_count() == 0 {
            return Ok(FragmentOutcome::Failed(FailureReason::EmptyFragment));
        }

        let fragment = Fragment::new(document_id, graph);
        self.codec.save_fragment(collection_id, &fragment).await?;

        info!(
            collection_id = %collection_id,
            document_id = %document_id,
            chunks = chunks.len(),
            nodes = fragment.graph.node_count(),
            edges = fragment.graph.edge_count(),
            "Built fragment"
        );
        Ok(FragmentOutcome::Built(fragment))
    }

    async fn extract_cached(&self, document_id: &str, text: &str) -> Result<RawExtraction> {
        let request = ExtractionRequest {
            document_id,
            text,
            language: &self.config.language,
            entity_types: &self.config.entity_types,
        };

        let Some(cache) = &self.cache else {
            return self.llm.extract(&request).await;
        };
        // keyed on content, not on the document it came from
        let key = cache_key(
            "extract",
            self.llm.model_id(),
            &(text, &self.config.language, &self.config.entity_types),
        )?;
        if let Some(hit) = cached::<RawExtraction>(cache.as_ref(), &key).await? {
            return Ok(hit);
        }
        let raw = self.llm.extract(&request).await?;
        remember(cache.as_ref(), &key, &raw).await?;
        Ok(raw)
    }

    /// Turn raw candidates into a fragment graph.
    ///
    /// Entities outside the type vocabulary are dropped, and relations whose
    /// endpoints did not survive are dropped with them.
    fn assemble(&self, document_id: &str, raw: RawExtraction) -> KnowledgeGraph {
        let allowed: BTreeSet<String> = self
            .config
            .entity_types
            .iter()
            .map(|t| normalize_entity_type(t))
            .collect();

        let mut graph = KnowledgeGraph::new();
        let mut off_vocabulary = 0;
        for candidate in raw.entities {
            let entity = Entity::new(&candidate.name, &candidate.entity_type, candidate.description)
                .with_source(document_id);
            if entity.name.is_empty() {
                continue;
            }
            if !allowed.is_empty() && !allowed.contains(&entity.entity_type) {
                off_vocabulary += 1;
                continue;
            }
            graph.upsert_entity(entity);
        }

        let mut dangling = 0;
        for candidate in raw.relations {
            let keywords = candidate
                .keywords
                .iter()
                .map(|k| k.trim().to_lowercase())
                .filter(|k| !k.is_empty())
                .collect::<Vec<_>>();
            let relationship = Relationship::new(&candidate.source, &candidate.target, candidate.description)
                .with_weight(candidate.weight)
                .with_keywords(keywords)
                .with_source(document_id);
            if graph.upsert_relationship(relationship).is_none() {
                dangling += 1;
            }
        }

        if off_vocabulary > 0 || dangling > 0 {
            warn!(
                document_id = %document_id,
                off_vocabulary,
                dangling_relations = dangling,
                "Dropped extraction candidates"
            );
        }
        graph
    }

    /// Ask the LLM to condense descriptions past the size threshold.
    async fn condense_descriptions(&self, graph: &mut KnowledgeGraph) -> Result<()> {
        let threshold = self.config.description_summary_threshold;
        let long: Vec<(String, Vec<String>)> = graph
            .nodes()
            .filter(|n| estimate_tokens(&n.description) > threshold)
            .map(|n| {
                let parts = description_parts(&n.description).map(str::to_string).collect();
                (n.name.clone(), parts)
            })
            .collect();

        for (name, parts) in long {
            let summary = self.summarize_cached(&name, &parts).await?;
            if let Some(node) = graph.node_mut(&name) {
                node.description = summary.trim().to_string();
            }
        }
        Ok(())
    }

    async fn summarize_cached(&self, name: &str, parts: &[String]) -> Result<String> {
        let Some(cache) = &self.cache else {
            return self.llm.summarize_descriptions(name, parts).await;
        };
        let key = cache_key("summarize_descriptions", self.llm.model_id(), &(name, parts))?;
        if let Some(hit) = cached::<String>(cache.as_ref(), &key).await? {
            return Ok(hit);
        }
        let summary = self.llm.summarize_descriptions(name, parts).await?;
        remember(cache.as_ref(), &key, &summary).await?;
        Ok(summary)
    }
}

fn failure_reason(err: GraphError) -> FailureReason {
    match err {
        GraphError::DeadlineExceeded { operation, .. } => FailureReason::Timeout(operation),
        other => FailureReason::Error(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stores::memory::{MemoryCache, MemoryStore};
    use crate::codec::ArtifactFilter;
    use crate::testing::MockLlm;
    use crate::traits::store::ArtifactStore;
    use crate::types::config::DeadlinePolicy;
    use crate::types::extraction::{RawEntity, RawRelation};
    use std::time::Duration;

    fn setup(llm: MockLlm) -> (Arc<MemoryStore>, Arc<MockLlm>, SubgraphBuilder) {
        setup_with_config(llm, GraphRagConfig::default())
    }

    fn setup_with_config(
        llm: MockLlm,
        config: GraphRagConfig,
    ) -> (Arc<MemoryStore>, Arc<MockLlm>, SubgraphBuilder) {
        let store = Arc::new(MemoryStore::new());
        let llm = Arc::new(llm);
        let builder = SubgraphBuilder::new(
            llm.clone(),
            store.clone(),
            GraphCodec::new(store.clone()),
            Arc::new(config),
        );
        (store, llm, builder)
    }

    fn acme_extraction() -> RawExtraction {
        RawExtraction::new()
            .with_entity(RawEntity::new("Acme", "organization", "A maker"))
            .with_entity(RawEntity::new("Bolt", "organization", "A supplier"))
            .with_relation(RawRelation::new("Acme", "Bolt", "buys from"))
            .with_relation(RawRelation::new("Acme", "Ghost", "never extracted"))
    }

    #[tokio::test]
    async fn test_build_drops_dangling_relations_and_persists() {
        let (store, _, builder) = setup(MockLlm::new().with_extraction("d1", acme_extraction()));
        store.add_document("kb1", "d1", ["Acme buys from Bolt."]).unwrap();

        let report = builder.build("kb1", "d1").await;
        let FragmentOutcome::Built(fragment) = report.outcome else {
            panic!("expected built fragment, got {:?}", report.outcome);
        };
        assert_eq!(report.chunks, 1);
        assert_eq!(fragment.graph.node_count(), 2);
        assert_eq!(fragment.graph.edge_count(), 1);
        assert!(fragment.graph.nodes().all(|n| n.source_ids.contains("d1")));

        let persisted = GraphCodec::new(store.clone())
            .load_fragment("kb1", "d1")
            .await
            .unwrap()
            .unwrap();
        assert!(!persisted.graph.has_node("GHOST"));
    }

    #[tokio::test]
    async fn test_second_build_is_already_built() {
        let (store, llm, builder) = setup(MockLlm::new().with_extraction("d1", acme_extraction()));
        store.add_document("kb1", "d1", ["Acme buys from Bolt."]).unwrap();

        assert!(matches!(builder.build("kb1", "d1").await.outcome, FragmentOutcome::Built(_)));
        assert!(matches!(builder.build("kb1", "d1").await.outcome, FragmentOutcome::AlreadyBuilt));
        assert_eq!(llm.extract_calls(), 1);
    }

    #[tokio::test]
    async fn test_empty_input_and_empty_fragment() {
        let (store, _, builder) = setup(MockLlm::new());
        store.add_document("kb1", "blank", Vec::<String>::new()).unwrap();
        store.add_document("kb1", "nothing", ["no entities here"]).unwrap();

        let blank = builder.build("kb1", "blank").await;
        assert!(matches!(blank.outcome, FragmentOutcome::Failed(FailureReason::EmptyInput)));

        let nothing = builder.build("kb1", "nothing").await;
        assert!(matches!(nothing.outcome, FragmentOutcome::Failed(FailureReason::EmptyFragment)));
        // failed builds leave no idempotency marker
        assert_eq!(store.artifact_count("kb1"), 0);
    }

    #[tokio::test]
    async fn test_extraction_error_is_a_document_failure() {
        let (store, _, builder) = setup(MockLlm::new().with_failure("d3"));
        store.add_document("kb1", "d3", ["text"]).unwrap();

        let report = builder.build("kb1", "d3").await;
        match report.outcome {
            FragmentOutcome::Failed(FailureReason::Error(msg)) => assert!(msg.contains("d3")),
            other => panic!("unexpected outcome {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_extraction_times_out() {
        let llm = MockLlm::new()
            .with_extraction("slow", acme_extraction())
            .with_delay("slow", Duration::from_secs(3600));
        let (store, _, builder) = setup(llm);
        store.add_document("kb1", "slow", ["text"]).unwrap();

        let report = builder.build("kb1", "slow").await;
        assert!(matches!(report.outcome, FragmentOutcome::Failed(FailureReason::Timeout(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_manual_testing_deadlines_do_not_time_out() {
        let llm = MockLlm::new()
            .with_extraction("slow", acme_extraction())
            .with_delay("slow", Duration::from_secs(3600));
        let config = GraphRagConfig::default().with_deadlines(DeadlinePolicy::manual_testing());
        let (store, _, builder) = setup_with_config(llm, config);
        store.add_document("kb1", "slow", ["text"]).unwrap();

        assert!(matches!(builder.build("kb1", "slow").await.outcome, FragmentOutcome::Built(_)));
    }

    #[tokio::test]
    async fn test_vocabulary_filters_entity_types() {
        let raw = RawExtraction::new()
            .with_entity(RawEntity::new("Acme", "organization", "maker"))
            .with_entity(RawEntity::new("Blue", "color", "a color"))
            .with_relation(RawRelation::new("Acme", "Blue", "painted"));
        let (store, _, builder) = setup(MockLlm::new().with_extraction("d1", raw));
        store.add_document("kb1", "d1", ["text"]).unwrap();

        let FragmentOutcome::Built(fragment) = builder.build("kb1", "d1").await.outcome else {
            panic!("expected built fragment");
        };
        assert!(fragment.graph.has_node("ACME"));
        assert!(!fragment.graph.has_node("BLUE"));
        assert_eq!(fragment.graph.edge_count(), 0);
    }

    #[tokio::test]
    async fn test_cache_avoids_repeat_extraction() {
        let (store, llm, builder) = setup(MockLlm::new().with_extraction("d1", acme_extraction()));
        let cache = Arc::new(MemoryCache::new());
        let builder = builder.with_cache(cache.clone());
        store.add_document("kb1", "d1", ["Acme buys from Bolt."]).unwrap();

        assert!(matches!(builder.build("kb1", "d1").await.outcome, FragmentOutcome::Built(_)));
        assert_eq!(cache.len(), 1);

        // drop the marker so the document is rebuilt
        store
            .delete_artifacts("kb1", &ArtifactFilter::Fragment("d1".into()))
            .await
            .unwrap();
        assert!(matches!(builder.build("kb1", "d1").await.outcome, FragmentOutcome::Built(_)));
        assert_eq!(llm.extract_calls(), 1);
    }
}
