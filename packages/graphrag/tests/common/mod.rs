//! Shared helpers for integration tests.

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Once};
use std::time::Duration;

use async_trait::async_trait;
use graphrag::{
    ArtifactFilter, ArtifactKey, ArtifactKind, ArtifactStore, BatchOrchestrator, Collaborators,
    GraphError, GraphRagConfig, LockConfig, MemoryLock, MemoryStore, MockLlm, RawEntity,
    RawExtraction, RawRelation, Result,
};

static TRACING: Once = Once::new();

/// Route engine logs to the test writer. Filter with `RUST_LOG`.
pub fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("graphrag=debug")),
            )
            .with_test_writer()
            .try_init();
    });
}

/// Two organizations and the relation between them.
pub fn pair(a: &str, b: &str) -> RawExtraction {
    RawExtraction::new()
        .with_entity(RawEntity::new(a, "organization", format!("{a} desc")))
        .with_entity(RawEntity::new(b, "organization", format!("{b} desc")))
        .with_relation(RawRelation::new(a, b, format!("{a} and {b}")))
}

/// Three organizations related pairwise.
pub fn triangle(a: &str, b: &str, c: &str) -> RawExtraction {
    RawExtraction::new()
        .with_entity(RawEntity::new(a, "organization", format!("{a} desc")))
        .with_entity(RawEntity::new(b, "organization", format!("{b} desc")))
        .with_entity(RawEntity::new(c, "organization", format!("{c} desc")))
        .with_relation(RawRelation::new(a, b, format!("{a} and {b}")))
        .with_relation(RawRelation::new(b, c, format!("{b} and {c}")))
        .with_relation(RawRelation::new(a, c, format!("{a} and {c}")))
}

/// Lock settings that give up quickly.
pub fn short_lock() -> LockConfig {
    LockConfig::default()
        .with_acquire_wait(Duration::from_millis(200))
        .with_poll_interval(Duration::from_millis(5))
}

/// Artifact store whose writes can be made to fail by artifact kind.
pub struct FlakyStore {
    inner: Arc<MemoryStore>,
    fail_graph_writes: AtomicBool,
    fail_community_writes: AtomicBool,
}

impl FlakyStore {
    pub fn new(inner: Arc<MemoryStore>) -> Self {
        Self {
            inner,
            fail_graph_writes: AtomicBool::new(false),
            fail_community_writes: AtomicBool::new(false),
        }
    }

    pub fn fail_graph_writes(&self, fail: bool) {
        self.fail_graph_writes.store(fail, Ordering::SeqCst);
    }

    pub fn fail_community_writes(&self, fail: bool) {
        self.fail_community_writes.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl ArtifactStore for FlakyStore {
    async fn get_artifact(&self, collection_id: &str, key: &ArtifactKey) -> Result<Option<Vec<u8>>> {
        self.inner.get_artifact(collection_id, key).await
    }

    async fn put_artifact(&self, collection_id: &str, key: &ArtifactKey, bytes: Vec<u8>) -> Result<()> {
        let failing = match key.kind() {
            ArtifactKind::Graph => self.fail_graph_writes.load(Ordering::SeqCst),
            ArtifactKind::Community => self.fail_community_writes.load(Ordering::SeqCst),
            ArtifactKind::Subgraph => false,
        };
        if failing {
            return Err(GraphError::storage(format!("simulated write failure for {key}")));
        }
        self.inner.put_artifact(collection_id, key, bytes).await
    }

    async fn delete_artifacts(&self, collection_id: &str, filter: &ArtifactFilter) -> Result<usize> {
        self.inner.delete_artifacts(collection_id, filter).await
    }

    async fn list_artifacts(&self, collection_id: &str, filter: &ArtifactFilter) -> Result<Vec<ArtifactKey>> {
        self.inner.list_artifacts(collection_id, filter).await
    }
}

pub struct Harness {
    pub store: Arc<MemoryStore>,
    /// Every artifact call passes through here on its way to `store`.
    pub artifacts: Arc<FlakyStore>,
    pub lock: Arc<MemoryLock>,
    pub llm: Arc<MockLlm>,
    pub orchestrator: BatchOrchestrator,
}

/// An orchestrator over in-memory collaborators.
pub fn harness(llm: MockLlm, config: GraphRagConfig) -> Harness {
    init_tracing();
    let store = Arc::new(MemoryStore::new());
    let artifacts = Arc::new(FlakyStore::new(store.clone()));
    let lock = Arc::new(MemoryLock::new());
    let llm = Arc::new(llm);
    let collaborators = Collaborators {
        llm: llm.clone(),
        chunks: store.clone(),
        catalog: store.clone(),
        store: artifacts.clone(),
        lock: lock.clone(),
    };
    Harness {
        store,
        artifacts,
        lock,
        llm,
        orchestrator: BatchOrchestrator::new(collaborators, config),
    }
}
