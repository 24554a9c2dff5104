//! Per-collection advisory locking with bounded poll-wait.
//!
//! Every phase that writes the collection graph takes the lock for its own
//! duration only: Merge, Resolve and Community each re-acquire it.

use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, error, warn};
use uuid::Uuid;

use crate::error::{GraphError, Result};
use crate::traits::lock::DistributedLock;
use crate::types::config::LockConfig;

/// Acquires collection locks on a [`DistributedLock`].
#[derive(Clone)]
pub struct CollectionLocks {
    lock: Arc<dyn DistributedLock>,
    config: LockConfig,
}

impl CollectionLocks {
    pub fn new(lock: Arc<dyn DistributedLock>, config: LockConfig) -> Self {
        Self { lock, config }
    }

    pub fn config(&self) -> &LockConfig {
        &self.config
    }

    /// Poll until the collection lock is ours or the wait budget is spent.
    pub async fn acquire(&self, collection_id: &str) -> Result<LockGuard> {
        let key = self.config.key_for(collection_id);
        let owner = Uuid::new_v4().to_string();
        let lease = self.config.lease();
        let wait = self.config.acquire_wait();
        let started = Instant::now();

        loop {
            if self.lock.try_acquire(&key, &owner, lease).await? {
                debug!(
                    key = %key,
                    owner = %owner,
                    waited_ms = started.elapsed().as_millis() as u64,
                    "Acquired collection lock"
                );
                return Ok(LockGuard {
                    lock: self.lock.clone(),
                    key,
                    owner,
                    released: false,
                });
            }

            let waited = started.elapsed();
            if waited >= wait {
                warn!(key = %key, waited_ms = waited.as_millis() as u64, "Timed out waiting for collection lock");
                return Err(GraphError::LockTimeout { key, waited });
            }
            tokio::time::sleep(self.config.poll_interval().min(wait - waited)).await;
        }
    }

    /// Run `work` while holding the collection lock.
    ///
    /// The lock is released whether `work` succeeds or fails. A work error
    /// wins over a release error.
    pub async fn with_lock<T, F, Fut>(&self, collection_id: &str, work: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let guard = self.acquire(collection_id).await?;
        let result = work().await;
        let released = guard.release().await;

        match (result, released) {
            (Ok(value), Ok(())) => Ok(value),
            (Ok(_), Err(e)) => Err(e),
            (Err(e), Ok(())) => Err(e),
            (Err(e), Err(release_err)) => {
                error!(error = %release_err, "Lock release failed after phase error");
                Err(e)
            }
        }
    }
}

/// A held collection lock.
///
/// Release explicitly with [`LockGuard::release`]. A guard dropped without
/// release (its future was dropped mid-phase) spawns a best-effort release.
pub struct LockGuard {
    lock: Arc<dyn DistributedLock>,
    key: String,
    owner: String,
    released: bool,
}

impl LockGuard {
    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn owner(&self) -> &str {
        &self.owner
    }

    /// Release the lock. Errors with `LockNotHeld` if the lease was lost.
    pub async fn release(mut self) -> Result<()> {
        self.released = true;
        if self.lock.release(&self.key, &self.owner).await? {
            debug!(key = %self.key, "Released collection lock");
            Ok(())
        } else {
            Err(GraphError::LockNotHeld {
                key: self.key.clone(),
                owner: self.owner.clone(),
            })
        }
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            warn!(key = %self.key, "Lock guard dropped outside a runtime; lease will expire");
            return;
        };
        warn!(key = %self.key, "Lock guard dropped without release");
        let lock = self.lock.clone();
        let key = std::mem::take(&mut self.key);
        let owner = std::mem::take(&mut self.owner);
        handle.spawn(async move {
            if let Err(e) = lock.release(&key, &owner).await {
                warn!(key = %key, error = %e, "Best-effort lock release failed");
            }
        });
    }
}
