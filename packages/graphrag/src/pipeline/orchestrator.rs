//! Batch orchestration: build → merge → resolve → communities.
//!
//! Documents are built concurrently under a semaphore. Per-document failures
//! are collected as data; phase failures propagate. Each collection-level
//! phase takes the collection lock on its own, so phases never overlap.

use std::collections::BTreeSet;
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use futures::future::join_all;
use tokio::sync::Semaphore;
use tracing::{debug, error, info};

use crate::codec::GraphCodec;
use crate::error::Result;
use crate::pipeline::community::CommunityExtractor;
use crate::pipeline::locking::CollectionLocks;
use crate::pipeline::merge::{MergeCoordinator, MergeOutcome};
use crate::pipeline::progress::{Phase, ProgressEvent, ProgressReporter};
use crate::pipeline::resolve::EntityResolver;
use crate::pipeline::subgraph::{FragmentOutcome, FragmentReport, SubgraphBuilder};
use crate::stores::memory::{MemoryLock, MemoryStore};
use crate::traits::cache::LlmCache;
use crate::traits::cancel::{check_cancelled, CancellationSource, JobContext, NeverCancel};
use crate::traits::llm::GraphLlm;
use crate::traits::lock::DistributedLock;
use crate::traits::store::{ArtifactStore, ChunkSource, DocumentCatalog};
use crate::types::batch::{
    BatchRequest, BatchSummary, BuildResult, BuildStatus, DocumentState, FailedDocument,
};
use crate::types::config::GraphRagConfig;
use crate::types::graph::Fragment;

/// External systems the engine talks to.
#[derive(Clone)]
pub struct Collaborators {
    pub llm: Arc<dyn GraphLlm>,
    pub chunks: Arc<dyn ChunkSource>,
    pub catalog: Arc<dyn DocumentCatalog>,
    pub store: Arc<dyn ArtifactStore>,
    pub lock: Arc<dyn DistributedLock>,
}

impl Collaborators {
    /// Everything backed by one in-process store.
    pub fn in_memory(llm: Arc<dyn GraphLlm>, store: Arc<MemoryStore>, lock: Arc<MemoryLock>) -> Self {
        Self {
            llm,
            chunks: store.clone(),
            catalog: store.clone(),
            store,
            lock,
        }
    }
}

/// Runs batches of documents through every phase for one collection.
pub struct BatchOrchestrator {
    builder: SubgraphBuilder,
    merger: MergeCoordinator,
    resolver: EntityResolver,
    communities: CommunityExtractor,
    codec: GraphCodec,
    catalog: Arc<dyn DocumentCatalog>,
    cancel: Arc<dyn CancellationSource>,
    progress: ProgressReporter,
    config: Arc<GraphRagConfig>,
}

impl BatchOrchestrator {
    pub fn new(collaborators: Collaborators, config: GraphRagConfig) -> Self {
        let config = Arc::new(config);
        let codec = GraphCodec::new(collaborators.store);
        let locks = CollectionLocks::new(collaborators.lock, config.lock.clone());

        Self {
            builder: SubgraphBuilder::new(
                collaborators.llm.clone(),
                collaborators.chunks,
                codec.clone(),
                config.clone(),
            ),
            merger: MergeCoordinator::new(codec.clone(), locks.clone(), config.clone()),
            resolver: EntityResolver::new(
                collaborators.llm.clone(),
                codec.clone(),
                locks.clone(),
                config.clone(),
            ),
            communities: CommunityExtractor::new(collaborators.llm, codec.clone(), locks, config.clone()),
            codec,
            catalog: collaborators.catalog,
            cancel: Arc::new(NeverCancel),
            progress: ProgressReporter::disabled(),
            config,
        }
    }

    /// Share one LLM response cache across every phase.
    pub fn with_cache(mut self, cache: Arc<dyn LlmCache>) -> Self {
        self.builder = self.builder.with_cache(cache.clone());
        self.resolver = self.resolver.with_cache(cache.clone());
        self.communities = self.communities.with_cache(cache);
        self
    }

    pub fn with_cancellation(mut self, cancel: Arc<dyn CancellationSource>) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn with_progress(mut self, progress: ProgressReporter) -> Self {
        self.progress = progress;
        self
    }

    pub fn builder(&self) -> &SubgraphBuilder {
        &self.builder
    }

    pub fn merger(&self) -> &MergeCoordinator {
        &self.merger
    }

    pub fn resolver(&self) -> &EntityResolver {
        &self.resolver
    }

    pub fn communities(&self) -> &CommunityExtractor {
        &self.communities
    }

    pub fn codec(&self) -> &GraphCodec {
        &self.codec
    }

    pub fn config(&self) -> &GraphRagConfig {
        &self.config
    }

    /// Build one document's fragment and merge it.
    ///
    /// A document that was built before but never reached the collection
    /// graph is merged from its stored fragment. Build failures are reported
    /// in the status; merge failures are returned as errors.
    pub async fn build_fragment(&self, collection_id: &str, document_id: &str) -> Result<BuildResult> {
        let report = self.builder.build(collection_id, document_id).await;

        let (status, fragments) = match report.outcome {
            FragmentOutcome::Built(fragment) => (
                BuildStatus::Built {
                    nodes: fragment.graph.node_count(),
                    edges: fragment.graph.edge_count(),
                },
                vec![fragment],
            ),
            FragmentOutcome::AlreadyBuilt => {
                let pending = self
                    .unmerged_fragments(collection_id, &[report.document_id.clone()])
                    .await?;
                (BuildStatus::Skipped, pending)
            }
            FragmentOutcome::Failed(reason) => (BuildStatus::Failed(reason), Vec::new()),
        };

        let outcome = self.merger.merge(collection_id, &fragments).await?;
        Ok(BuildResult {
            document_id: report.document_id,
            status,
            change: outcome.change,
        })
    }

    /// Run a batch through build, merge and the requested later phases.
    ///
    /// Requested document ids are deduplicated, keeping first occurrences.
    ///
    /// Cancellation is checked before each document is dispatched, before
    /// each phase, and inside resolution and community extraction before
    /// every LLM batch and before their final write. Once observed, in-flight
    /// work finishes and the batch returns `Cancelled` without persisting the
    /// interrupted phase.
    pub async fn run_batch(&self, request: BatchRequest) -> Result<BatchSummary> {
        let started = Instant::now();
        let collection_id = request.collection_id.as_str();
        let job_id = request.job_id.as_str();
        check_cancelled(self.cancel.as_ref(), job_id, "start").await?;
        let job = JobContext::new(job_id, self.cancel.clone());

        let mut documents = if request.document_ids.is_empty() {
            self.catalog.list_documents(collection_id).await?
        } else {
            request.document_ids.clone()
        };
        let mut seen = BTreeSet::new();
        documents.retain(|d| seen.insert(d.clone()));
        let concurrency = request
            .concurrency
            .unwrap_or(self.config.max_parallel_docs)
            .max(1);

        info!(
            collection_id = %collection_id,
            job_id = %job_id,
            documents = documents.len(),
            concurrency,
            "Starting batch"
        );

        let mut summary = BatchSummary {
            total_docs: documents.len(),
            ..Default::default()
        };

        let reports = self
            .phase(&request, Phase::Building, self.build_all(&request, &documents, concurrency))
            .await?;

        let mut built = Vec::new();
        let mut already_built = Vec::new();
        for report in reports {
            summary.total_chunks += report.chunks;
            match report.outcome {
                FragmentOutcome::Built(fragment) => built.push(fragment),
                FragmentOutcome::AlreadyBuilt => already_built.push(report.document_id),
                FragmentOutcome::Failed(reason) => summary.failed_docs.push(FailedDocument {
                    document_id: report.document_id,
                    reason,
                }),
            }
        }

        let mut fragments = built;
        fragments.extend(self.unmerged_fragments(collection_id, &already_built).await?);

        if !fragments.is_empty() {
            let merged: MergeOutcome = self
                .phase(&request, Phase::Merging, self.merger.merge(collection_id, &fragments))
                .await?;
            summary.change.extend(merged.change);
            summary.ok_docs = merged.merged;
        }
        let merged_now: BTreeSet<&str> = summary.ok_docs.iter().map(String::as_str).collect();
        summary.skipped_docs = already_built
            .iter()
            .filter(|d| !merged_now.contains(d.as_str()))
            .cloned()
            .collect();

        let any_graph = !summary.ok_docs.is_empty() || !summary.skipped_docs.is_empty();

        if request.with_resolution && !summary.change.added_updated_nodes.is_empty() {
            let touched = summary.change.added_updated_nodes.clone();
            let resolved = self
                .phase(
                    &request,
                    Phase::Resolving,
                    self.resolver.resolve(collection_id, &touched, &job),
                )
                .await?;
            summary.resolved_entities = Some(resolved.removed);
            summary.change.extend(resolved.change);
        }

        if request.with_community && any_graph {
            let outcome = self
                .phase(
                    &request,
                    Phase::Extracting,
                    self.communities.extract(collection_id, &job),
                )
                .await?;
            summary.communities = Some(outcome.written);
        }

        summary.elapsed = started.elapsed();
        info!(
            collection_id = %collection_id,
            job_id = %job_id,
            ok = summary.ok_docs.len(),
            skipped = summary.skipped_docs.len(),
            failed = summary.failed_docs.len(),
            chunks = summary.total_chunks,
            elapsed_ms = summary.elapsed.as_millis() as u64,
            "Batch finished"
        );
        Ok(summary)
    }

    /// Build every document, at most `concurrency` at a time.
    async fn build_all(
        &self,
        request: &BatchRequest,
        documents: &[String],
        concurrency: usize,
    ) -> Result<Vec<FragmentReport>> {
        let semaphore = Arc::new(Semaphore::new(concurrency));
        let collection_id = request.collection_id.as_str();
        let job_id = request.job_id.as_str();

        let builds = documents.iter().map(|document_id| {
            let semaphore = semaphore.clone();
            async move {
                // never closed
                let _permit = semaphore.acquire().await.ok();
                if self.cancel.is_canceled(job_id).await {
                    debug!(document_id = %document_id, "Job canceled, not dispatching");
                    return None;
                }

                self.progress.emit(ProgressEvent::DocumentStarted {
                    job_id: job_id.to_string(),
                    document_id: document_id.clone(),
                });
                let report = self.builder.build(collection_id, document_id).await;
                let (state, detail) = match &report.outcome {
                    FragmentOutcome::Built(_) => (DocumentState::Built, None),
                    FragmentOutcome::AlreadyBuilt => (DocumentState::Skipped, None),
                    FragmentOutcome::Failed(reason) => (DocumentState::Failed, Some(reason.to_string())),
                };
                self.progress.emit(ProgressEvent::DocumentFinished {
                    job_id: job_id.to_string(),
                    document_id: document_id.clone(),
                    state,
                    detail,
                });
                Some(report)
            }
        });

        let reports: Vec<FragmentReport> = join_all(builds).await.into_iter().flatten().collect();
        // undispatched documents mean cancellation was observed
        if reports.len() < documents.len() {
            check_cancelled(self.cancel.as_ref(), job_id, Phase::Building.as_str()).await?;
        }
        Ok(reports)
    }

    /// Stored fragments of documents missing from the collection graph.
    async fn unmerged_fragments(&self, collection_id: &str, documents: &[String]) -> Result<Vec<Fragment>> {
        if documents.is_empty() {
            return Ok(Vec::new());
        }
        let graph = self.codec.load_graph(collection_id).await?.unwrap_or_default();

        let mut fragments = Vec::new();
        for document_id in documents {
            if graph.contains_source(document_id) {
                continue;
            }
            if let Some(fragment) = self.codec.load_fragment(collection_id, document_id).await? {
                info!(
                    collection_id = %collection_id,
                    document_id = %document_id,
                    "Re-merging fragment missing from collection graph"
                );
                fragments.push(fragment);
            }
        }
        Ok(fragments)
    }

    /// Run one collection-level phase with cancellation check, progress
    /// events and failure logging.
    async fn phase<T, F>(&self, request: &BatchRequest, phase: Phase, work: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        check_cancelled(self.cancel.as_ref(), &request.job_id, phase.as_str()).await?;
        self.progress.emit(ProgressEvent::PhaseStarted {
            job_id: request.job_id.clone(),
            collection_id: request.collection_id.clone(),
            phase,
        });

        let started = Instant::now();
        let result = work.await;
        match &result {
            Ok(_) => self.progress.emit(ProgressEvent::PhaseFinished {
                job_id: request.job_id.clone(),
                collection_id: request.collection_id.clone(),
                phase,
                elapsed_ms: started.elapsed().as_millis() as u64,
            }),
            Err(e) if e.is_cancelled() => {}
            Err(e) => error!(
                collection_id = %request.collection_id,
                job_id = %request.job_id,
                phase = phase.as_str(),
                error = %e,
                "Phase failed"
            ),
        }
        result
    }
}
