//! Incremental Knowledge-Graph Construction Engine
//!
//! Builds and maintains one knowledge graph per document collection. Each
//! document is turned into a small graph fragment by an LLM; fragments are
//! merged into the collection graph under a per-collection lock; duplicate
//! entities are resolved near what just changed; communities are detected
//! and summarized into searchable reports.
//!
//! # Design Philosophy
//!
//! - Collaborators (chunks, artifacts, LLM, lock, cancellation) are traits
//! - Per-document failures are data, phase failures are errors
//! - Merging is commutative and idempotent, so fragments may land in any order
//! - Nothing retries on its own; the outer job system owns retry policy
//!
//! # Usage
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use graphrag::{BatchOrchestrator, BatchRequest, Collaborators, GraphRagConfig};
//! use graphrag::llm::{ChatGraphLlm, OpenAiChat};
//! use graphrag::stores::{MemoryLock, MemoryStore};
//!
//! let store = Arc::new(MemoryStore::new());
//! store.add_document("kb1", "d1", ["Acme buys bolts from Bolt Inc."])?;
//!
//! let llm = Arc::new(ChatGraphLlm::new(OpenAiChat::from_env()?));
//! let orchestrator = BatchOrchestrator::new(
//!     Collaborators::in_memory(llm, store, Arc::new(MemoryLock::new())),
//!     GraphRagConfig::from_env()?,
//! );
//!
//! let summary = orchestrator
//!     .run_batch(BatchRequest::new("kb1").with_resolution(true).with_community(true))
//!     .await?;
//! println!("{} built, {} failed", summary.ok_docs.len(), summary.failed_docs.len());
//! ```
//!
//! # Modules
//!
//! - [`traits`] - Collaborator seams (ChunkSource, ArtifactStore, GraphLlm, DistributedLock, ...)
//! - [`types`] - Graph, batch, community and configuration types
//! - [`codec`] - Artifact keys and graph (de)serialization
//! - [`pipeline`] - Subgraph build, merge, resolution, communities, orchestration
//! - [`llm`] - Chat-model backed `GraphLlm`, OpenAI backend, rate limiting
//! - [`stores`] - Storage implementations (MemoryStore, SqliteStore)
//! - [`testing`] - Mock implementations for testing

pub mod codec;
pub mod error;
pub mod llm;
pub mod pipeline;
pub mod stores;
pub mod testing;
pub mod traits;
pub mod types;

// Re-export core types at crate root
pub use codec::{ArtifactFilter, ArtifactKey, ArtifactKind, GraphCodec};
pub use error::{GraphError, Result};
pub use traits::{
    cache::LlmCache,
    cancel::{CancellationSource, JobContext, NeverCancel},
    llm::GraphLlm,
    lock::DistributedLock,
    store::{ArtifactStore, ChunkSource, DocumentCatalog},
};
pub use types::{
    batch::{
        BatchRequest, BatchSummary, BuildResult, BuildStatus, DocumentState, FailedDocument,
        FailureReason,
    },
    community::{Community, CommunityContext, CommunityRecord, CommunityReport, Finding},
    config::{
        CommunityConfig, DeadlinePolicy, GraphRagConfig, LockConfig, PageRankConfig,
        ResolutionConfig,
    },
    extraction::{DocumentChunk, ExtractionRequest, RawEntity, RawExtraction, RawRelation},
    graph::{EdgeKey, Entity, Fragment, GraphChange, KnowledgeGraph, Relationship},
};

// Re-export pipeline components
pub use pipeline::{
    BatchOrchestrator, Collaborators, CommunityExtractor, EntityResolver, MergeCoordinator,
    ProgressEvent, ProgressReporter, SubgraphBuilder,
};

// Re-export stores
pub use stores::{MemoryCache, MemoryLock, MemoryStore};

#[cfg(feature = "sqlite")]
pub use stores::SqliteStore;

// Re-export testing utilities
pub use testing::MockLlm;
