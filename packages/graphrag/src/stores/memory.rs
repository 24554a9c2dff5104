//! In-memory backends for testing and development.

use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::{Duration, Instant};

use crate::codec::{ArtifactFilter, ArtifactKey};
use crate::error::{GraphError, Result};
use crate::traits::cache::LlmCache;
use crate::traits::lock::DistributedLock;
use crate::traits::store::{ArtifactStore, ChunkSource, DocumentCatalog};
use crate::types::extraction::DocumentChunk;

fn read<T>(lock: &RwLock<T>) -> Result<RwLockReadGuard<'_, T>> {
    lock.read()
        .map_err(|_| GraphError::storage("memory store lock poisoned"))
}

fn write<T>(lock: &RwLock<T>) -> Result<RwLockWriteGuard<'_, T>> {
    lock.write()
        .map_err(|_| GraphError::storage("memory store lock poisoned"))
}

/// In-memory chunks, document listings and artifacts.
///
/// Useful for testing and development. Not suitable for production
/// as data is lost on restart.
pub struct MemoryStore {
    documents: RwLock<HashMap<String, Vec<String>>>,
    chunks: RwLock<HashMap<(String, String), Vec<DocumentChunk>>>,
    artifacts: RwLock<HashMap<String, BTreeMap<ArtifactKey, Vec<u8>>>>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    /// Create a new empty memory store.
    pub fn new() -> Self {
        Self {
            documents: RwLock::new(HashMap::new()),
            chunks: RwLock::new(HashMap::new()),
            artifacts: RwLock::new(HashMap::new()),
        }
    }

    /// Register a document and its chunk texts (in position order).
    pub fn add_document<S: Into<String>>(
        &self,
        collection_id: &str,
        document_id: &str,
        chunks: impl IntoIterator<Item = S>,
    ) -> Result<()> {
        let chunks: Vec<DocumentChunk> = chunks
            .into_iter()
            .enumerate()
            .map(|(position, text)| DocumentChunk::new(document_id, position, text))
            .collect();

        let mut docs = write(&self.documents)?;
        let listed = docs.entry(collection_id.to_string()).or_default();
        if !listed.iter().any(|d| d == document_id) {
            listed.push(document_id.to_string());
        }
        write(&self.chunks)?.insert((collection_id.to_string(), document_id.to_string()), chunks);
        Ok(())
    }

    /// Number of artifacts stored for a collection.
    pub fn artifact_count(&self, collection_id: &str) -> usize {
        read(&self.artifacts)
            .map(|a| a.get(collection_id).map_or(0, BTreeMap::len))
            .unwrap_or(0)
    }

    /// Clear all stored data.
    pub fn clear(&self) -> Result<()> {
        write(&self.documents)?.clear();
        write(&self.chunks)?.clear();
        write(&self.artifacts)?.clear();
        Ok(())
    }
}

#[async_trait]
impl ChunkSource for MemoryStore {
    async fn list_chunks(&self, collection_id: &str, document_id: &str) -> Result<Vec<DocumentChunk>> {
        let mut chunks = read(&self.chunks)?
            .get(&(collection_id.to_string(), document_id.to_string()))
            .cloned()
            .unwrap_or_default();
        chunks.sort_by_key(|c| c.position);
        Ok(chunks)
    }
}

#[async_trait]
impl DocumentCatalog for MemoryStore {
    async fn list_documents(&self, collection_id: &str) -> Result<Vec<String>> {
        Ok(read(&self.documents)?
            .get(collection_id)
            .cloned()
            .unwrap_or_default())
    }
}

#[async_trait]
impl ArtifactStore for MemoryStore {
    async fn get_artifact(&self, collection_id: &str, key: &ArtifactKey) -> Result<Option<Vec<u8>>> {
        Ok(read(&self.artifacts)?
            .get(collection_id)
            .and_then(|a| a.get(key))
            .cloned())
    }

    async fn put_artifact(&self, collection_id: &str, key: &ArtifactKey, bytes: Vec<u8>) -> Result<()> {
        write(&self.artifacts)?
            .entry(collection_id.to_string())
            .or_default()
            .insert(key.clone(), bytes);
        Ok(())
    }

    async fn delete_artifacts(&self, collection_id: &str, filter: &ArtifactFilter) -> Result<usize> {
        let mut artifacts = write(&self.artifacts)?;
        let Some(collection) = artifacts.get_mut(collection_id) else {
            return Ok(0);
        };
        let before = collection.len();
        collection.retain(|key, _| !filter.matches(key));
        Ok(before - collection.len())
    }

    async fn list_artifacts(&self, collection_id: &str, filter: &ArtifactFilter) -> Result<Vec<ArtifactKey>> {
        Ok(read(&self.artifacts)?
            .get(collection_id)
            .map(|a| a.keys().filter(|k| filter.matches(k)).cloned().collect())
            .unwrap_or_default())
    }
}

/// In-process lease lock.
///
/// Behaves like the shared lock service for a single process: leases
/// expire, release is owner-checked.
#[derive(Default)]
pub struct MemoryLock {
    leases: Mutex<HashMap<String, (String, Instant)>>,
}

impl MemoryLock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current holder of `key`, if its lease has not expired.
    pub fn holder(&self, key: &str) -> Option<String> {
        let leases = self.leases.lock().ok()?;
        leases
            .get(key)
            .filter(|(_, expires)| *expires > Instant::now())
            .map(|(owner, _)| owner.clone())
    }
}

#[async_trait]
impl DistributedLock for MemoryLock {
    async fn try_acquire(&self, key: &str, owner: &str, lease: Duration) -> Result<bool> {
        let mut leases = self
            .leases
            .lock()
            .map_err(|_| GraphError::Lock("memory lock poisoned".into()))?;
        let now = Instant::now();
        if let Some((_, expires)) = leases.get(key) {
            if *expires > now {
                return Ok(false);
            }
        }
        leases.insert(key.to_string(), (owner.to_string(), now + lease));
        Ok(true)
    }

    async fn release(&self, key: &str, owner: &str) -> Result<bool> {
        let mut leases = self
            .leases
            .lock()
            .map_err(|_| GraphError::Lock("memory lock poisoned".into()))?;
        match leases.get(key) {
            Some((holder, expires)) if holder == owner && *expires > Instant::now() => {
                leases.remove(key);
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

/// In-memory LLM response cache.
#[derive(Default)]
pub struct MemoryCache {
    entries: RwLock<HashMap<String, String>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        read(&self.entries).map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl LlmCache for MemoryCache {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(read(&self.entries)?.get(key).cloned())
    }

    async fn put(&self, key: &str, value: &str) -> Result<()> {
        write(&self.entries)?.insert(key.to_string(), value.to_string());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::ArtifactKind;

    #[tokio::test]
    async fn test_artifact_crud_and_filters() {
        let store = MemoryStore::new();
        store
            .put_artifact("kb1", &ArtifactKey::subgraph("d1"), b"one".to_vec())
            .await
            .unwrap();
        store
            .put_artifact("kb1", &ArtifactKey::community("kb1", 0), b"c0".to_vec())
            .await
            .unwrap();
        store
            .put_artifact("kb2", &ArtifactKey::community("kb2", 0), b"other".to_vec())
            .await
            .unwrap();

        let got = store
            .get_artifact("kb1", &ArtifactKey::subgraph("d1"))
            .await
            .unwrap();
        assert_eq!(got.as_deref(), Some(&b"one"[..]));

        let deleted = store
            .delete_artifacts("kb1", &ArtifactFilter::Kind(ArtifactKind::Community))
            .await
            .unwrap();
        assert_eq!(deleted, 1);
        assert_eq!(store.artifact_count("kb1"), 1);
        assert_eq!(store.artifact_count("kb2"), 1);
    }

    #[tokio::test]
    async fn test_chunks_sorted_and_documents_listed_once() {
        let store = MemoryStore::new();
        store.add_document("kb1", "d1", ["first", "second"]).unwrap();
        store.add_document("kb1", "d1", ["first", "second"]).unwrap();
        store.add_document("kb1", "d2", ["only"]).unwrap();

        let chunks = store.list_chunks("kb1", "d1").await.unwrap();
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].content, "first");
        assert_eq!(store.list_documents("kb1").await.unwrap(), vec!["d1", "d2"]);
        assert!(store.list_chunks("kb1", "missing").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_lock_is_exclusive_and_owner_checked() {
        let lock = MemoryLock::new();
        let lease = Duration::from_secs(60);

        assert!(lock.try_acquire("k", "a", lease).await.unwrap());
        assert!(!lock.try_acquire("k", "b", lease).await.unwrap());
        // non-reentrant
        assert!(!lock.try_acquire("k", "a", lease).await.unwrap());

        assert!(!lock.release("k", "b").await.unwrap());
        assert!(lock.release("k", "a").await.unwrap());
        assert!(!lock.release("k", "a").await.unwrap());
        assert!(lock.try_acquire("k", "b", lease).await.unwrap());
    }

    #[tokio::test]
    async fn test_expired_lease_can_be_taken() {
        let lock = MemoryLock::new();
        assert!(lock
            .try_acquire("k", "a", Duration::from_millis(10))
            .await
            .unwrap());
        tokio::time::sleep(Duration::from_millis(30)).await;

        assert_eq!(lock.holder("k"), None);
        assert!(lock.try_acquire("k", "b", Duration::from_secs(60)).await.unwrap());
        assert!(!lock.release("k", "a").await.unwrap());
    }
}
