//! Collaborator seams for the graph construction engine.
//!
//! Applications implement these traits to plug in their chunk source,
//! document store, LLM client, lock service and job-cancellation signal.

pub mod cache;
pub mod cancel;
pub mod llm;
pub mod lock;
pub mod store;
