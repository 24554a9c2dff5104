//! Cooperative cancellation.

use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::error::{GraphError, Result};

/// Answers "has this job been canceled?".
///
/// Polled between units of work; nothing is interrupted mid-call.
#[async_trait]
pub trait CancellationSource: Send + Sync {
    async fn is_canceled(&self, job_id: &str) -> bool;
}

/// An in-process token cancels every job it is handed to.
#[async_trait]
impl CancellationSource for CancellationToken {
    async fn is_canceled(&self, _job_id: &str) -> bool {
        self.is_cancelled()
    }
}

/// Never cancels.
#[derive(Debug, Clone, Copy, Default)]
pub struct NeverCancel;

#[async_trait]
impl CancellationSource for NeverCancel {
    async fn is_canceled(&self, _job_id: &str) -> bool {
        false
    }
}

/// Return `Cancelled` if the job has been canceled.
pub async fn check_cancelled(
    source: &dyn CancellationSource,
    job_id: &str,
    stage: &str,
) -> Result<()> {
    if source.is_canceled(job_id).await {
        return Err(GraphError::Cancelled {
            job_id: job_id.to_string(),
            stage: stage.to_string(),
        });
    }
    Ok(())
}

/// A job id together with the source that may cancel it.
///
/// Handed to long phases so they can stop between units of work.
#[derive(Clone)]
pub struct JobContext {
    job_id: String,
    cancel: Arc<dyn CancellationSource>,
}

impl JobContext {
    pub fn new(job_id: impl Into<String>, cancel: Arc<dyn CancellationSource>) -> Self {
        Self {
            job_id: job_id.into(),
            cancel,
        }
    }

    /// A job nobody can cancel.
    pub fn uncancellable(job_id: impl Into<String>) -> Self {
        Self::new(job_id, Arc::new(NeverCancel))
    }

    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    pub async fn is_canceled(&self) -> bool {
        self.cancel.is_canceled(&self.job_id).await
    }

    /// Return `Cancelled` tagged with `stage` if the job has been canceled.
    pub async fn check(&self, stage: &str) -> Result<()> {
        check_cancelled(self.cancel.as_ref(), &self.job_id, stage).await
    }
}

impl std::fmt::Debug for JobContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobContext").field("job_id", &self.job_id).finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_token_cancels() {
        let token = CancellationToken::new();
        assert!(check_cancelled(&token, "job", "merge").await.is_ok());

        token.cancel();
        let err = check_cancelled(&token, "job", "merge").await.unwrap_err();
        assert!(err.is_cancelled());
    }

    #[tokio::test]
    async fn test_job_context_tags_stage_and_job() {
        let token = CancellationToken::new();
        let job = JobContext::new("job-3", Arc::new(token.clone()));
        assert!(job.check("resolving").await.is_ok());

        token.cancel();
        match job.check("resolving").await.unwrap_err() {
            GraphError::Cancelled { job_id, stage } => {
                assert_eq!(job_id, "job-3");
                assert_eq!(stage, "resolving");
            }
            other => panic!("expected cancellation, got {other}"),
        }
        assert!(!JobContext::uncancellable("job-4").is_canceled().await);
    }
}
