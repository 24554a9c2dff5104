//! Rate-limited LLM wrapper.
//!
//! Wraps any [`GraphLlm`] with a `governor` quota. Every call waits for a
//! permit first, including each call a batched default makes.

use std::num::NonZeroU32;
use std::sync::Arc;

use async_trait::async_trait;
use governor::{Quota, RateLimiter};
use nonzero_ext::nonzero;

use crate::error::Result;
use crate::traits::llm::GraphLlm;
use crate::types::community::{CommunityContext, CommunityReport};
use crate::types::extraction::{ExtractionRequest, RawExtraction};
use crate::types::graph::Entity;

type DefaultRateLimiter = RateLimiter<
    governor::state::NotKeyed,
    governor::state::InMemoryState,
    governor::clock::DefaultClock,
>;

pub const DEFAULT_REQUESTS_PER_SECOND: NonZeroU32 = nonzero!(5u32);

/// An LLM wrapper that enforces a request rate.
pub struct RateLimitedLlm<L: GraphLlm> {
    inner: L,
    limiter: Arc<DefaultRateLimiter>,
}

impl<L: GraphLlm> RateLimitedLlm<L> {
    pub fn new(inner: L, requests_per_second: NonZeroU32) -> Self {
        Self::with_quota(inner, Quota::per_second(requests_per_second))
    }

    /// Sustained rate with a larger burst.
    pub fn with_burst(inner: L, requests_per_second: NonZeroU32, burst: NonZeroU32) -> Self {
        Self::with_quota(inner, Quota::per_second(requests_per_second).allow_burst(burst))
    }

    pub fn with_quota(inner: L, quota: Quota) -> Self {
        Self {
            inner,
            limiter: Arc::new(RateLimiter::direct(quota)),
        }
    }

    pub fn inner(&self) -> &L {
        &self.inner
    }

    async fn wait_for_permit(&self) {
        self.limiter.until_ready().await;
    }
}

#[async_trait]
impl<L: GraphLlm> GraphLlm for RateLimitedLlm<L> {
    fn model_id(&self) -> &str {
        self.inner.model_id()
    }

    async fn extract(&self, request: &ExtractionRequest<'_>) -> Result<RawExtraction> {
        self.wait_for_permit().await;
        self.inner.extract(request).await
    }

    async fn judge_same_entity(&self, a: &Entity, b: &Entity) -> Result<bool> {
        self.wait_for_permit().await;
        self.inner.judge_same_entity(a, b).await
    }

    async fn judge_same_entities(&self, pairs: &[(Entity, Entity)]) -> Result<Vec<Option<bool>>> {
        self.wait_for_permit().await;
        self.inner.judge_same_entities(pairs).await
    }

    async fn summarize_community(&self, context: &CommunityContext) -> Result<CommunityReport> {
        self.wait_for_permit().await;
        self.inner.summarize_community(context).await
    }

    async fn summarize_descriptions(&self, name: &str, parts: &[String]) -> Result<String> {
        self.wait_for_permit().await;
        self.inner.summarize_descriptions(name, parts).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockLlm;
    use crate::types::extraction::RawEntity;

    #[tokio::test]
    async fn test_delegates_to_inner() {
        let inner = MockLlm::new().with_extraction(
            "d1",
            RawExtraction::new().with_entity(RawEntity::new("Acme", "organization", "maker")),
        );
        let llm = RateLimitedLlm::with_burst(inner, nonzero!(1u32), nonzero!(10u32));
        let types = vec![];
        let request = ExtractionRequest {
            document_id: "d1",
            text: "Acme",
            language: "English",
            entity_types: &types,
        };

        for _ in 0..3 {
            let raw = llm.extract(&request).await.unwrap();
            assert_eq!(raw.entities.len(), 1);
        }
        assert_eq!(llm.inner().extract_calls(), 3);
        assert_eq!(llm.model_id(), "mock");
    }
}
