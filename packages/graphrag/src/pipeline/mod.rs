//! Graph construction pipeline.
//!
//! The pipeline runs per collection:
//! - Subgraph: per-document fragment extraction (concurrent)
//! - Merge: fold fragments into the collection graph (locked)
//! - Resolve: merge duplicate entities near what just changed (locked)
//! - Community: cluster, summarize and replace community records (locked)
//! - Orchestrator: drives a batch through all of the above

pub mod centrality;
pub mod chunking;
pub mod clustering;
pub mod community;
pub mod locking;
pub mod merge;
pub mod orchestrator;
pub mod progress;
pub mod resolve;
pub mod similarity;
pub mod subgraph;

use std::future::Future;
use std::time::Duration;

use crate::error::{GraphError, Result};

pub use centrality::{pagerank_scores, refresh_centrality};
pub use chunking::{estimate_tokens, pack_chunks};
pub use clustering::Louvain;
pub use community::{community_context, detect_communities, CommunityExtractor, CommunityOutcome};
pub use locking::{CollectionLocks, LockGuard};
pub use merge::{merge_fragments, MergeCoordinator, MergeOutcome};
pub use orchestrator::{BatchOrchestrator, Collaborators};
pub use progress::{Phase, ProgressEvent, ProgressReporter};
pub use resolve::{candidate_pairs, merge_duplicates, EntityResolver, ResolutionOutcome};
pub use similarity::{is_similar, levenshtein};
pub use subgraph::{FragmentOutcome, FragmentReport, SubgraphBuilder};

/// Run `work` under an optional deadline.
///
/// `None` means unbounded. Expiry drops the future and returns
/// `DeadlineExceeded`.
pub async fn with_deadline<T, F>(operation: &str, deadline: Option<Duration>, work: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    let Some(deadline) = deadline else {
        return work.await;
    };
    match tokio::time::timeout(deadline, work).await {
        Ok(result) => result,
        Err(_) => Err(GraphError::DeadlineExceeded {
            operation: operation.to_string(),
            deadline,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_deadline_expires() {
        let err = with_deadline("slow", Some(Duration::from_secs(1)), async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(())
        })
        .await
        .unwrap_err();
        assert!(matches!(err, GraphError::DeadlineExceeded { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_deadline_waits() {
        let value = with_deadline("slow", None, async {
            tokio::time::sleep(Duration::from_secs(5000)).await;
            Ok(7)
        })
        .await
        .unwrap();
        assert_eq!(value, 7);
    }
}
