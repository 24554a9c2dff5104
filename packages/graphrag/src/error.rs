//! Typed errors for the graph construction engine.
//!
//! Uses `thiserror` for library errors (not `anyhow`) to provide
//! strongly-typed, composable error handling.

use std::time::Duration;

use thiserror::Error;

/// Errors that can occur while building, merging, resolving or summarizing
/// a knowledge graph.
#[derive(Debug, Error)]
pub enum GraphError {
    /// LLM client unavailable or failed
    #[error("LLM error: {0}")]
    Llm(#[source] Box<dyn std::error::Error + Send + Sync>),

    /// Document store operation failed
    #[error("storage error: {0}")]
    Storage(#[source] Box<dyn std::error::Error + Send + Sync>),

    /// Graph or community payload could not be encoded/decoded
    #[error("codec error: {0}")]
    Codec(#[from] serde_json::Error),

    /// The collection lock could not be acquired within the wait budget
    #[error("timed out after {waited:?} waiting for lock {key}")]
    LockTimeout { key: String, waited: Duration },

    /// Release was attempted by someone who does not own the lock
    #[error("lock {key} is not held by {owner}")]
    LockNotHeld { key: String, owner: String },

    /// Lock backend failed
    #[error("lock backend error: {0}")]
    Lock(#[source] Box<dyn std::error::Error + Send + Sync>),

    /// An operation ran past its deadline
    #[error("{operation} exceeded its deadline of {deadline:?}")]
    DeadlineExceeded {
        operation: String,
        deadline: Duration,
    },

    /// The job was canceled; checked cooperatively between units of work
    #[error("job {job_id} canceled during {stage}")]
    Cancelled { job_id: String, stage: String },

    /// Resolution/community phases need an existing collection graph
    #[error("no graph stored for collection {collection_id}")]
    MissingGraph { collection_id: String },

    /// Artifact key did not match any known layout
    #[error("invalid artifact key: {key}")]
    InvalidArtifactKey { key: String },

    /// Configuration error
    #[error("config error: {0}")]
    Config(String),
}

impl GraphError {
    /// Wrap any error as an LLM failure.
    pub fn llm(err: impl Into<Box<dyn std::error::Error + Send + Sync>>) -> Self {
        Self::Llm(err.into())
    }

    /// Wrap any error as a storage failure.
    pub fn storage(err: impl Into<Box<dyn std::error::Error + Send + Sync>>) -> Self {
        Self::Storage(err.into())
    }

    /// Whether the caller may retry the whole operation later.
    ///
    /// Nothing inside the engine retries on its own; this only classifies.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::LockTimeout { .. }
                | Self::DeadlineExceeded { .. }
                | Self::Llm(_)
                | Self::Storage(_)
                | Self::Lock(_)
        )
    }

    /// Whether this error means "stopped on request" rather than "broke".
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled { .. })
    }
}

/// Result type alias for engine operations.
pub type Result<T> = std::result::Result<T, GraphError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        let timeout = GraphError::LockTimeout {
            key: "graphrag_task_kb1".into(),
            waited: Duration::from_secs(1),
        };
        assert!(timeout.is_retryable());
        assert!(!timeout.is_cancelled());

        let cancelled = GraphError::Cancelled {
            job_id: "job".into(),
            stage: "merge".into(),
        };
        assert!(cancelled.is_cancelled());
        assert!(!cancelled.is_retryable());

        let missing = GraphError::MissingGraph {
            collection_id: "kb1".into(),
        };
        assert!(!missing.is_retryable());
    }

    #[test]
    fn test_display_mentions_key() {
        let err = GraphError::LockNotHeld {
            key: "graphrag_task_kb1".into(),
            owner: "worker-1".into(),
        };
        assert!(err.to_string().contains("graphrag_task_kb1"));
    }
}
