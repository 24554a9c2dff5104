//! LLM-backed implementation of [`GraphLlm`](crate::traits::llm::GraphLlm).
//!
//! `ChatGraphLlm` turns any chat-completion model into the engine's LLM
//! collaborator. `OpenAiChat` is the bundled backend; `RateLimitedLlm`
//! throttles any `GraphLlm`.

pub mod chat;
pub mod openai;
pub mod parse;
pub mod prompts;
pub mod rate_limited;

pub use chat::{ChatGraphLlm, ChatMessage, ChatModel, Role};
pub use openai::OpenAiChat;
pub use parse::{parse_extraction, parse_judgments, parse_report};
pub use rate_limited::{RateLimitedLlm, DEFAULT_REQUESTS_PER_SECOND};
