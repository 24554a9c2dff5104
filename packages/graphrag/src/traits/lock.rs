//! Distributed advisory lock.

use std::time::Duration;

use async_trait::async_trait;

use crate::error::Result;

/// Owner-checked, lease-bounded lock shared across processes.
///
/// Single-shot and non-reentrant: `try_acquire` never waits and fails while
/// anyone (including the same owner) holds an unexpired lease. Bounded
/// waiting is layered on top by `CollectionLocks`.
#[async_trait]
pub trait DistributedLock: Send + Sync {
    /// Try to take `key` for `owner` with a lease of `lease`.
    async fn try_acquire(&self, key: &str, owner: &str, lease: Duration) -> Result<bool>;

    /// Release `key` if `owner` holds it. `false` means it was not held by
    /// `owner` (expired, stolen, or never taken).
    async fn release(&self, key: &str, owner: &str) -> Result<bool>;
}
