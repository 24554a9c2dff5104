//! Storage traits for chunks, document listings, and graph artifacts.
//!
//! The storage layer is split into focused traits:
//! - `ChunkSource`: ordered text chunks of a document
//! - `DocumentCatalog`: which documents a collection holds
//! - `ArtifactStore`: fragments, collection graphs and community records

use async_trait::async_trait;

use crate::codec::{ArtifactFilter, ArtifactKey};
use crate::error::Result;
use crate::types::extraction::DocumentChunk;

/// Source of document text chunks.
#[async_trait]
pub trait ChunkSource: Send + Sync {
    /// List every chunk of a document, sorted by position.
    ///
    /// Paging against the backing store is the implementation's concern.
    async fn list_chunks(&self, collection_id: &str, document_id: &str)
        -> Result<Vec<DocumentChunk>>;
}

/// Listing of the documents in a collection.
#[async_trait]
pub trait DocumentCatalog: Send + Sync {
    /// Document ids in creation order.
    async fn list_documents(&self, collection_id: &str) -> Result<Vec<String>>;
}

/// Durable store for typed graph artifacts.
///
/// Artifacts are opaque bytes addressed by collection id + key. The engine
/// never assumes multi-key atomicity.
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    /// Get an artifact, `None` when absent.
    async fn get_artifact(&self, collection_id: &str, key: &ArtifactKey)
        -> Result<Option<Vec<u8>>>;

    /// Insert or overwrite an artifact.
    async fn put_artifact(&self, collection_id: &str, key: &ArtifactKey, bytes: Vec<u8>)
        -> Result<()>;

    /// Delete matching artifacts. Returns how many were deleted.
    async fn delete_artifacts(&self, collection_id: &str, filter: &ArtifactFilter)
        -> Result<usize>;

    /// Keys of matching artifacts, sorted.
    async fn list_artifacts(&self, collection_id: &str, filter: &ArtifactFilter)
        -> Result<Vec<ArtifactKey>>;

    /// Whether an artifact exists.
    async fn has_artifact(&self, collection_id: &str, key: &ArtifactKey) -> Result<bool> {
        Ok(self.get_artifact(collection_id, key).await?.is_some())
    }
}
