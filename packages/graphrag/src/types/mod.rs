//! Data types shared across the engine.

pub mod batch;
pub mod community;
pub mod config;
pub mod extraction;
pub mod graph;
