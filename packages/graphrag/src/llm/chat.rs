//! [`GraphLlm`] over a plain chat-completion model.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{GraphError, Result};
use crate::llm::parse::{parse_extraction, parse_judgments, parse_report};
use crate::llm::prompts::{
    community_prompt, extraction_prompt, resolution_prompt, summarize_descriptions_prompt,
    CONTINUE_PROMPT, LOOP_PROMPT,
};
use crate::traits::llm::GraphLlm;
use crate::types::community::{CommunityContext, CommunityReport};
use crate::types::extraction::{ExtractionRequest, RawExtraction};
use crate::types::graph::Entity;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// One chat message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// A chat-completion backend.
#[async_trait]
pub trait ChatModel: Send + Sync {
    fn model_id(&self) -> &str;

    /// Complete the conversation; returns the assistant's reply.
    async fn chat(&self, messages: &[ChatMessage]) -> Result<String>;
}

/// Prompts a [`ChatModel`] for extraction, resolution and reports.
pub struct ChatGraphLlm<C: ChatModel> {
    chat: C,
    max_gleanings: usize,
}

impl<C: ChatModel> ChatGraphLlm<C> {
    /// One gleaning pass by default.
    pub fn new(chat: C) -> Self {
        Self {
            chat,
            max_gleanings: 1,
        }
    }

    /// Set how many "anything missed?" follow-ups extraction may make.
    pub fn with_max_gleanings(mut self, max_gleanings: usize) -> Self {
        self.max_gleanings = max_gleanings;
        self
    }

    pub fn chat_model(&self) -> &C {
        &self.chat
    }
}

#[async_trait]
impl<C: ChatModel> GraphLlm for ChatGraphLlm<C> {
    fn model_id(&self) -> &str {
        self.chat.model_id()
    }

    async fn extract(&self, request: &ExtractionRequest<'_>) -> Result<RawExtraction> {
        let mut history = vec![ChatMessage::user(extraction_prompt(request))];
        let first = self.chat.chat(&history).await?;
        let mut output = first.clone();
        history.push(ChatMessage::assistant(first));

        for round in 0..self.max_gleanings {
            history.push(ChatMessage::user(CONTINUE_PROMPT));
            let more = self.chat.chat(&history).await?;
            output.push_str(&more);
            if round + 1 >= self.max_gleanings {
                break;
            }

            history.push(ChatMessage::assistant(more));
            history.push(ChatMessage::user(LOOP_PROMPT));
            let again = self.chat.chat(&history).await?;
            history.pop();
            if again.trim().to_ascii_uppercase() != "YES" {
                break;
            }
        }

        let raw = parse_extraction(&output);
        debug!(
            document_id = %request.document_id,
            entities = raw.entities.len(),
            relations = raw.relations.len(),
            "Parsed extraction"
        );
        Ok(raw)
    }

    async fn judge_same_entity(&self, a: &Entity, b: &Entity) -> Result<bool> {
        let answers = self.judge_same_entities(&[(a.clone(), b.clone())]).await?;
        answers.into_iter().next().flatten().ok_or_else(|| {
            GraphError::llm(format!("no judgment for {} / {}", a.name, b.name))
        })
    }

    async fn judge_same_entities(&self, pairs: &[(Entity, Entity)]) -> Result<Vec<Option<bool>>> {
        if pairs.is_empty() {
            return Ok(Vec::new());
        }
        let messages = [
            ChatMessage::system(resolution_prompt(pairs)),
            ChatMessage::user("Output:"),
        ];
        let response = self.chat.chat(&messages).await?;
        Ok(parse_judgments(&response, pairs.len()))
    }

    async fn summarize_community(&self, context: &CommunityContext) -> Result<CommunityReport> {
        let messages = [
            ChatMessage::system(community_prompt(context)),
            ChatMessage::user("Output:"),
        ];
        let response = self.chat.chat(&messages).await?;
        parse_report(&response)
    }

    async fn summarize_descriptions(&self, name: &str, parts: &[String]) -> Result<String> {
        let messages = [ChatMessage::user(summarize_descriptions_prompt(name, parts))];
        let summary = self.chat.chat(&messages).await?;
        if summary.trim().is_empty() {
            return Err(GraphError::llm(format!("empty description summary for {name}")));
        }
        Ok(summary.trim().to_string())
    }
}
