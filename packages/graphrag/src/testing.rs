//! Testing utilities including mock implementations.
//!
//! These are useful for testing applications that use the graph engine
//! without making real LLM calls.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use async_trait::async_trait;

use crate::error::{GraphError, Result};
use crate::traits::llm::GraphLlm;
use crate::types::community::{CommunityContext, CommunityReport};
use crate::types::extraction::{ExtractionRequest, RawExtraction};
use crate::types::graph::{normalize_entity_name, Entity};

/// A mock LLM for testing.
///
/// Returns deterministic, configurable responses keyed by document id
/// (extraction) or entity names (judgments, summaries). Unknown documents
/// extract to nothing; unknown pairs are judged different.
#[derive(Default, Clone)]
pub struct MockLlm {
    /// Predefined extractions by document id
    extractions: Arc<RwLock<HashMap<String, RawExtraction>>>,

    /// Documents whose extraction fails
    failures: Arc<RwLock<HashSet<String>>>,

    /// Artificial extraction latency by document id
    delays: Arc<RwLock<HashMap<String, Duration>>>,

    /// Artificial latency of every single-pair judgment
    judge_delay: Arc<RwLock<Option<Duration>>>,

    /// Pairs judged identical (normalized, sorted)
    same_entities: Arc<RwLock<HashSet<(String, String)>>>,

    /// Pairs whose judgment fails
    judge_failures: Arc<RwLock<HashSet<(String, String)>>>,

    /// Community summaries fail when a member has one of these names
    summary_failures: Arc<RwLock<HashSet<String>>>,

    /// Call tracking for assertions
    calls: Arc<RwLock<Vec<MockLlmCall>>>,
}

/// Record of a call made to the mock LLM.
#[derive(Debug, Clone, PartialEq)]
pub enum MockLlmCall {
    Extract { document_id: String },
    Judge { a: String, b: String },
    SummarizeCommunity { members: BTreeSet<String> },
    SummarizeDescriptions { name: String },
}

fn pair_key(a: &str, b: &str) -> (String, String) {
    let a = normalize_entity_name(a);
    let b = normalize_entity_name(b);
    if a <= b {
        (a, b)
    } else {
        (b, a)
    }
}

impl MockLlm {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return `extraction` for every chunk batch of `document_id`.
    pub fn with_extraction(self, document_id: impl Into<String>, extraction: RawExtraction) -> Self {
        self.extractions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(document_id.into(), extraction);
        self
    }

    /// Make extraction of `document_id` fail.
    pub fn with_failure(self, document_id: impl Into<String>) -> Self {
        self.failures
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(document_id.into());
        self
    }

    /// Sleep before answering extraction of `document_id`.
    pub fn with_delay(self, document_id: impl Into<String>, delay: Duration) -> Self {
        self.delays
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(document_id.into(), delay);
        self
    }

    /// Sleep before answering each pair judgment.
    pub fn with_judge_delay(self, delay: Duration) -> Self {
        *self.judge_delay.write().unwrap_or_else(PoisonError::into_inner) = Some(delay);
        self
    }

    /// Judge `a` and `b` to be the same entity.
    pub fn with_same_entities(self, a: &str, b: &str) -> Self {
        self.same_entities
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(pair_key(a, b));
        self
    }

    /// Make the judgment of `a` and `b` fail.
    pub fn with_judge_failure(self, a: &str, b: &str) -> Self {
        self.judge_failures
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(pair_key(a, b));
        self
    }

    /// Fail summaries of communities containing `member`.
    pub fn with_summary_failure(self, member: &str) -> Self {
        self.summary_failures
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(normalize_entity_name(member));
        self
    }

    /// Get all calls made to this mock.
    pub fn calls(&self) -> Vec<MockLlmCall> {
        self.calls.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Clear call history.
    pub fn clear_calls(&self) {
        self.calls.write().unwrap_or_else(PoisonError::into_inner).clear();
    }

    pub fn extract_calls(&self) -> usize {
        self.count(|c| matches!(c, MockLlmCall::Extract { .. }))
    }

    pub fn judge_calls(&self) -> usize {
        self.count(|c| matches!(c, MockLlmCall::Judge { .. }))
    }

    pub fn summary_calls(&self) -> usize {
        self.count(|c| matches!(c, MockLlmCall::SummarizeCommunity { .. }))
    }

    fn count(&self, pred: impl Fn(&MockLlmCall) -> bool) -> usize {
        self.calls
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|c| pred(c))
            .count()
    }

    fn record(&self, call: MockLlmCall) {
        self.calls.write().unwrap_or_else(PoisonError::into_inner).push(call);
    }
}

#[async_trait]
impl GraphLlm for MockLlm {
    fn model_id(&self) -> &str {
        "mock"
    }

    async fn extract(&self, request: &ExtractionRequest<'_>) -> Result<RawExtraction> {
        let document_id = request.document_id.to_string();
        self.record(MockLlmCall::Extract {
            document_id: document_id.clone(),
        });

        let delay = self
            .delays
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&document_id)
            .copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        if self
            .failures
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(&document_id)
        {
            return Err(GraphError::llm(format!(
                "simulated extraction failure for {document_id}"
            )));
        }

        Ok(self
            .extractions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&document_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn judge_same_entity(&self, a: &Entity, b: &Entity) -> Result<bool> {
        self.record(MockLlmCall::Judge {
            a: a.name.clone(),
            b: b.name.clone(),
        });
        let key = pair_key(&a.name, &b.name);

        let delay = *self.judge_delay.read().unwrap_or_else(PoisonError::into_inner);
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        if self
            .judge_failures
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(&key)
        {
            return Err(GraphError::llm(format!(
                "simulated judgment failure for {} / {}",
                a.name, b.name
            )));
        }
        Ok(self
            .same_entities
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(&key))
    }

    async fn summarize_community(&self, context: &CommunityContext) -> Result<CommunityReport> {
        let members: BTreeSet<String> = context.entities.iter().map(|e| e.name.clone()).collect();
        self.record(MockLlmCall::SummarizeCommunity {
            members: members.clone(),
        });

        let failures = self.summary_failures.read().unwrap_or_else(PoisonError::into_inner);
        if let Some(name) = members.iter().find(|m| failures.contains(*m)) {
            return Err(GraphError::llm(format!("simulated summary failure for {name}")));
        }

        let lead = context
            .entities
            .first()
            .map(|e| e.name.as_str())
            .unwrap_or("empty community");
        let mut report = CommunityReport::new(
            format!("{lead} community"),
            format!(
                "{} entities: {}",
                members.len(),
                members.iter().cloned().collect::<Vec<_>>().join(", ")
            ),
        )
        .with_rating(members.len().min(10) as f64, "Size of the community");
        for r in context.relationships.iter().take(3) {
            report = report.with_finding(format!("{} - {}", r.source, r.target), r.description.clone());
        }
        Ok(report)
    }

    async fn summarize_descriptions(&self, name: &str, parts: &[String]) -> Result<String> {
        self.record(MockLlmCall::SummarizeDescriptions {
            name: name.to_string(),
        });
        Ok(format!("{name}: {} descriptions condensed", parts.len()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_judgments_are_symmetric_and_normalized() {
        let llm = MockLlm::new().with_same_entities("Acme Corp", "acme corporation");
        let a = Entity::new("ACME CORPORATION", "organization", "a");
        let b = Entity::new("Acme Corp", "organization", "b");

        assert!(llm.judge_same_entity(&a, &b).await.unwrap());
        assert!(llm.judge_same_entity(&b, &a).await.unwrap());
        assert_eq!(llm.judge_calls(), 2);
    }

    #[tokio::test]
    async fn test_mock_batched_judgment_maps_failures_to_none() {
        let llm = MockLlm::new()
            .with_same_entities("a", "b")
            .with_judge_failure("c", "d");
        let pairs = vec![
            (Entity::new("a", "person", ""), Entity::new("b", "person", "")),
            (Entity::new("c", "person", ""), Entity::new("d", "person", "")),
        ];

        let answers = llm.judge_same_entities(&pairs).await.unwrap();
        assert_eq!(answers, vec![Some(true), None]);
    }
}
