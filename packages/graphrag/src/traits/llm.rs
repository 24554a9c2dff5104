//! LLM trait for the graph construction engine.
//!
//! Abstracts the three judgments the engine needs from a model:
//! - Entity/relation extraction from text
//! - Whether two entities denote the same thing
//! - Community summaries

use async_trait::async_trait;
use tracing::warn;

use crate::error::Result;
use crate::types::{
    community::{CommunityContext, CommunityReport},
    extraction::{ExtractionRequest, RawExtraction},
    graph::{Entity, FIELD_SEP},
};

/// LLM operations used by the engine.
///
/// Implementations own prompting, provider selection and response parsing.
#[async_trait]
pub trait GraphLlm: Send + Sync {
    /// Identifies the model; part of every cache key.
    fn model_id(&self) -> &str;

    /// Extract entity and relation candidates from text.
    async fn extract(&self, request: &ExtractionRequest<'_>) -> Result<RawExtraction>;

    /// Whether two entities denote the same real-world thing.
    async fn judge_same_entity(&self, a: &Entity, b: &Entity) -> Result<bool>;

    /// Judge many pairs at once.
    ///
    /// `None` means the judgment failed or was ambiguous; such pairs are left
    /// unmerged. The default asks pair by pair.
    async fn judge_same_entities(&self, pairs: &[(Entity, Entity)]) -> Result<Vec<Option<bool>>> {
        let mut answers = Vec::with_capacity(pairs.len());
        for (a, b) in pairs {
            match self.judge_same_entity(a, b).await {
                Ok(same) => answers.push(Some(same)),
                Err(e) => {
                    warn!(a = %a.name, b = %b.name, error = %e, "Entity judgment failed");
                    answers.push(None);
                }
            }
        }
        Ok(answers)
    }

    /// Summarize a community into a report with findings.
    async fn summarize_community(&self, context: &CommunityContext) -> Result<CommunityReport>;

    /// Condense an over-long description.
    ///
    /// Default keeps every part.
    async fn summarize_descriptions(&self, _name: &str, parts: &[String]) -> Result<String> {
        Ok(parts.join(FIELD_SEP))
    }
}
