//! Storage backends for the graph engine.
//!
//! Available backends:
//! - `MemoryStore`, `MemoryLock`, `MemoryCache` - In-process (always available)
//! - `SqliteStore` - SQLite store, lease lock and cache (requires `sqlite` feature)

pub mod memory;

#[cfg(feature = "sqlite")]
pub mod sqlite;

pub use memory::{MemoryCache, MemoryLock, MemoryStore};

#[cfg(feature = "sqlite")]
pub use sqlite::SqliteStore;
