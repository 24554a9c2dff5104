//! Per-document and per-batch outcomes.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::types::graph::GraphChange;

/// How one document's build ended inside a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentState {
    Built,
    /// A fragment already existed; extraction was not repeated
    Skipped,
    Failed,
}

impl fmt::Display for DocumentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Built => "built",
            Self::Skipped => "skipped",
            Self::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Why a document did not make it into the collection graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum FailureReason {
    /// No chunks to extract from
    EmptyInput,
    /// Extraction produced no entities
    EmptyFragment,
    /// Build or merge ran past its deadline
    Timeout(String),
    /// Any other error, rendered
    Error(String),
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EmptyInput => f.write_str("document has no chunks"),
            Self::EmptyFragment => f.write_str("no entities extracted"),
            Self::Timeout(what) => write!(f, "timed out: {what}"),
            Self::Error(msg) => f.write_str(msg),
        }
    }
}

/// Result of building one document's fragment.
#[derive(Debug, Clone, PartialEq)]
pub enum BuildStatus {
    /// A new fragment was extracted and persisted
    Built { nodes: usize, edges: usize },
    /// A fragment was already persisted for this document
    Skipped,
    Failed(FailureReason),
}

impl BuildStatus {
    pub fn state(&self) -> DocumentState {
        match self {
            Self::Built { .. } => DocumentState::Built,
            Self::Skipped => DocumentState::Skipped,
            Self::Failed(_) => DocumentState::Failed,
        }
    }
}

/// `build_fragment` outcome: status plus what the merge touched.
#[derive(Debug, Clone, PartialEq)]
pub struct BuildResult {
    pub document_id: String,
    pub status: BuildStatus,
    /// Empty when nothing was merged
    pub change: GraphChange,
}

/// A document that failed inside a batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailedDocument {
    pub document_id: String,
    pub reason: FailureReason,
}

/// Input to `BatchOrchestrator::run_batch`.
#[derive(Debug, Clone)]
pub struct BatchRequest {
    pub collection_id: String,

    /// Documents to process; an empty list means every document in the
    /// collection.
    pub document_ids: Vec<String>,

    /// Overrides the configured document concurrency
    pub concurrency: Option<usize>,

    pub with_resolution: bool,

    pub with_community: bool,

    /// Identifier used for progress events and cancellation errors
    pub job_id: String,
}

impl BatchRequest {
    pub fn new(collection_id: impl Into<String>) -> Self {
        Self {
            collection_id: collection_id.into(),
            document_ids: Vec::new(),
            concurrency: None,
            with_resolution: false,
            with_community: false,
            job_id: uuid::Uuid::new_v4().to_string(),
        }
    }

    pub fn with_documents(mut self, ids: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.document_ids = ids.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_concurrency(mut self, n: usize) -> Self {
        self.concurrency = Some(n);
        self
    }

    pub fn with_resolution(mut self, enabled: bool) -> Self {
        self.with_resolution = enabled;
        self
    }

    pub fn with_community(mut self, enabled: bool) -> Self {
        self.with_community = enabled;
        self
    }

    pub fn with_job_id(mut self, job_id: impl Into<String>) -> Self {
        self.job_id = job_id.into();
        self
    }
}

/// Aggregate outcome of one batch.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BatchSummary {
    /// Documents whose fragment is now part of the collection graph
    pub ok_docs: Vec<String>,

    /// Documents skipped because their fragment was already merged
    pub skipped_docs: Vec<String>,

    pub failed_docs: Vec<FailedDocument>,

    pub total_docs: usize,

    pub total_chunks: usize,

    /// Everything the batch changed in the collection graph
    pub change: GraphChange,

    /// Community records written, when communities ran
    pub communities: Option<usize>,

    /// Entities merged away, when resolution ran
    pub resolved_entities: Option<usize>,

    #[serde(with = "duration_secs")]
    pub elapsed: Duration,
}

impl BatchSummary {
    pub fn failed_ids(&self) -> impl Iterator<Item = &str> {
        self.failed_docs.iter().map(|f| f.document_id.as_str())
    }
}

mod duration_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_f64(d.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(d)?;
        Ok(Duration::from_secs_f64(secs.max(0.0)))
    }
}
