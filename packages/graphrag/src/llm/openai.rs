//! OpenAI-compatible chat backend.
//!
//! # Example
//!
//! ```rust,ignore
//! use graphrag::llm::{ChatGraphLlm, OpenAiChat};
//!
//! let llm = ChatGraphLlm::new(OpenAiChat::from_env()?.with_model("gpt-4o-mini"));
//! ```

use async_trait::async_trait;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

use crate::error::{GraphError, Result};
use crate::llm::chat::{ChatMessage, ChatModel};

/// Chat completions against `{base_url}/chat/completions`.
pub struct OpenAiChat {
    client: Client,
    api_key: SecretString,
    model: String,
    base_url: String,
    temperature: f32,
}

impl OpenAiChat {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            api_key: SecretString::new(Box::from(api_key.into().as_str())),
            model: "gpt-4o".to_string(),
            base_url: "https://api.openai.com/v1".to_string(),
            temperature: 0.5,
        }
    }

    /// Create from `OPENAI_API_KEY`, with optional `GRAPHRAG_CHAT_MODEL`
    /// and `OPENAI_BASE_URL`.
    pub fn from_env() -> Result<Self> {
        let _ = dotenvy::dotenv();
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| GraphError::Config("OPENAI_API_KEY not set".into()))?;

        let mut chat = Self::new(api_key);
        if let Ok(model) = std::env::var("GRAPHRAG_CHAT_MODEL") {
            chat = chat.with_model(model);
        }
        if let Ok(url) = std::env::var("OPENAI_BASE_URL") {
            chat = chat.with_base_url(url);
        }
        Ok(chat)
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// Set a custom base URL (Azure, proxies, local servers).
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }
}

impl std::fmt::Debug for OpenAiChat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiChat")
            .field("model", &self.model)
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    temperature: f32,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChoiceMessage,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

#[async_trait]
impl ChatModel for OpenAiChat {
    fn model_id(&self) -> &str {
        &self.model
    }

    async fn chat(&self, messages: &[ChatMessage]) -> Result<String> {
        let request = ChatRequest {
            model: &self.model,
            messages,
            temperature: self.temperature,
        };

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(self.api_key.expose_secret())
            .json(&request)
            .send()
            .await
            .map_err(GraphError::llm)?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(GraphError::llm(format!(
                "chat completion failed ({status}): {error_text}"
            )));
        }

        let body: ChatResponse = response.json().await.map_err(GraphError::llm)?;
        body.choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| GraphError::llm("chat completion returned no choices"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_debug_hides_key() {
        let chat = OpenAiChat::new("sk-secret").with_base_url("http://localhost:8080/v1/");
        let debug = format!("{chat:?}");
        assert!(!debug.contains("sk-secret"));
        assert!(debug.contains("http://localhost:8080/v1\""));
    }

    #[test]
    fn test_request_serializes_roles() {
        let messages = [ChatMessage::system("s"), ChatMessage::user("u")];
        let request = ChatRequest {
            model: "m",
            messages: &messages,
            temperature: 0.0,
        };
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["messages"][0]["role"], "system");
        assert_eq!(json["messages"][1]["content"], "u");
    }
}
