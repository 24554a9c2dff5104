//! SQLite storage implementation.
//!
//! A file-based backend for chunks, artifacts, the collection lock and the
//! LLM cache. Good for:
//! - Local development
//! - Single-server deployments where several worker processes share a file
//! - Testing with persistent data

use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};

use crate::codec::{ArtifactFilter, ArtifactKey};
use crate::error::{GraphError, Result};
use crate::traits::cache::LlmCache;
use crate::traits::lock::DistributedLock;
use crate::traits::store::{ArtifactStore, ChunkSource, DocumentCatalog};
use crate::types::extraction::DocumentChunk;

/// SQLite-backed store, lock and cache.
#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Create a new SQLite store with the given connection URL.
    ///
    /// # Example URLs
    /// - `sqlite://./graphrag.db?mode=rwc` - File-based, create if missing
    /// - `sqlite::memory:` - Use [`SqliteStore::in_memory`] instead
    pub async fn new(database_url: &str) -> Result<Self> {
        Self::connect(database_url, 5).await
    }

    /// Create an in-memory SQLite store (for testing).
    ///
    /// Uses a single connection; every connection to `:memory:` would
    /// otherwise see its own empty database.
    pub async fn in_memory() -> Result<Self> {
        Self::connect("sqlite::memory:", 1).await
    }

    async fn connect(database_url: &str, max_connections: u32) -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await
            .map_err(GraphError::storage)?;

        let store = Self { pool };
        store.run_migrations().await?;
        Ok(store)
    }

    async fn run_migrations(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS documents (
                seq INTEGER PRIMARY KEY AUTOINCREMENT,
                collection_id TEXT NOT NULL,
                document_id TEXT NOT NULL,
                UNIQUE (collection_id, document_id)
            );

            CREATE TABLE IF NOT EXISTS chunks (
                collection_id TEXT NOT NULL,
                document_id TEXT NOT NULL,
                position INTEGER NOT NULL,
                content TEXT NOT NULL,
                PRIMARY KEY (collection_id, document_id, position)
            );
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(GraphError::storage)?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS artifacts (
                collection_id TEXT NOT NULL,
                key TEXT NOT NULL,
                kind TEXT NOT NULL,
                bytes BLOB NOT NULL,
                updated_at TEXT NOT NULL,
                PRIMARY KEY (collection_id, key)
            );

            CREATE INDEX IF NOT EXISTS idx_artifacts_kind ON artifacts(collection_id, kind);
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(GraphError::storage)?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS locks (
                key TEXT PRIMARY KEY,
                owner TEXT NOT NULL,
                expires_at_ms INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS llm_cache (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                created_at TEXT NOT NULL
            );
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(GraphError::storage)?;

        Ok(())
    }

    /// Get the underlying connection pool.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Register a document and replace its chunk texts (in position order).
    pub async fn add_document<S: Into<String>>(
        &self,
        collection_id: &str,
        document_id: &str,
        chunks: impl IntoIterator<Item = S>,
    ) -> Result<()> {
        let mut tx = self.pool.begin().await.map_err(GraphError::storage)?;

        sqlx::query("INSERT OR IGNORE INTO documents (collection_id, document_id) VALUES (?, ?)")
            .bind(collection_id)
            .bind(document_id)
            .execute(&mut *tx)
            .await
            .map_err(GraphError::storage)?;
        sqlx::query("DELETE FROM chunks WHERE collection_id = ? AND document_id = ?")
            .bind(collection_id)
            .bind(document_id)
            .execute(&mut *tx)
            .await
            .map_err(GraphError::storage)?;

        for (position, content) in chunks.into_iter().enumerate() {
            let content: String = content.into();
            sqlx::query(
                "INSERT INTO chunks (collection_id, document_id, position, content) VALUES (?, ?, ?, ?)",
            )
            .bind(collection_id)
            .bind(document_id)
            .bind(position as i64)
            .bind(content)
            .execute(&mut *tx)
            .await
            .map_err(GraphError::storage)?;
        }

        tx.commit().await.map_err(GraphError::storage)
    }
}

/// `WHERE` fragment and its bind value for an artifact filter.
fn filter_clause(filter: &ArtifactFilter) -> (&'static str, Option<String>) {
    match filter {
        ArtifactFilter::All => ("", None),
        ArtifactFilter::Kind(kind) => (" AND kind = ?", Some(kind.as_str().to_string())),
        ArtifactFilter::Fragment(document_id) => (
            " AND key = ?",
            Some(ArtifactKey::subgraph(document_id.as_str()).to_string()),
        ),
    }
}

#[async_trait]
impl ChunkSource for SqliteStore {
    async fn list_chunks(&self, collection_id: &str, document_id: &str) -> Result<Vec<DocumentChunk>> {
        let rows: Vec<(i64, String)> = sqlx::query_as(
            "SELECT position, content FROM chunks \
             WHERE collection_id = ? AND document_id = ? ORDER BY position",
        )
        .bind(collection_id)
        .bind(document_id)
        .fetch_all(&self.pool)
        .await
        .map_err(GraphError::storage)?;

        Ok(rows
            .into_iter()
            .map(|(position, content)| DocumentChunk::new(document_id, position.max(0) as usize, content))
            .collect())
    }
}

#[async_trait]
impl DocumentCatalog for SqliteStore {
    async fn list_documents(&self, collection_id: &str) -> Result<Vec<String>> {
        let rows: Vec<(String,)> =
            sqlx::query_as("SELECT document_id FROM documents WHERE collection_id = ? ORDER BY seq")
                .bind(collection_id)
                .fetch_all(&self.pool)
                .await
                .map_err(GraphError::storage)?;
        Ok(rows.into_iter().map(|(id,)| id).collect())
    }
}

#[async_trait]
impl ArtifactStore for SqliteStore {
    async fn get_artifact(&self, collection_id: &str, key: &ArtifactKey) -> Result<Option<Vec<u8>>> {
        let row: Option<(Vec<u8>,)> =
            sqlx::query_as("SELECT bytes FROM artifacts WHERE collection_id = ? AND key = ?")
                .bind(collection_id)
                .bind(key.to_string())
                .fetch_optional(&self.pool)
                .await
                .map_err(GraphError::storage)?;
        Ok(row.map(|(bytes,)| bytes))
    }

    async fn put_artifact(&self, collection_id: &str, key: &ArtifactKey, bytes: Vec<u8>) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO artifacts (collection_id, key, kind, bytes, updated_at)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(collection_id, key) DO UPDATE SET
                bytes = excluded.bytes,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(collection_id)
        .bind(key.to_string())
        .bind(key.kind().as_str())
        .bind(bytes)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(GraphError::storage)?;
        Ok(())
    }

    async fn delete_artifacts(&self, collection_id: &str, filter: &ArtifactFilter) -> Result<usize> {
        let (clause, value) = filter_clause(filter);
        let sql = format!("DELETE FROM artifacts WHERE collection_id = ?{clause}");
        let mut query = sqlx::query(&sql).bind(collection_id);
        if let Some(value) = value {
            query = query.bind(value);
        }
        let result = query.execute(&self.pool).await.map_err(GraphError::storage)?;
        Ok(result.rows_affected() as usize)
    }

    async fn list_artifacts(&self, collection_id: &str, filter: &ArtifactFilter) -> Result<Vec<ArtifactKey>> {
        let (clause, value) = filter_clause(filter);
        let sql = format!("SELECT key FROM artifacts WHERE collection_id = ?{clause}");
        let mut query = sqlx::query_as::<_, (String,)>(&sql).bind(collection_id);
        if let Some(value) = value {
            query = query.bind(value);
        }
        let rows = query.fetch_all(&self.pool).await.map_err(GraphError::storage)?;

        let mut keys = rows
            .into_iter()
            .map(|(key,)| key.parse::<ArtifactKey>())
            .collect::<Result<Vec<_>>>()?;
        keys.sort();
        Ok(keys)
    }
}

#[async_trait]
impl DistributedLock for SqliteStore {
    async fn try_acquire(&self, key: &str, owner: &str, lease: Duration) -> Result<bool> {
        let now = Utc::now().timestamp_millis();
        let expires = now.saturating_add(i64::try_from(lease.as_millis()).unwrap_or(i64::MAX));

        // takes the row only when it is free or its lease ran out
        let result = sqlx::query(
            r#"
            INSERT INTO locks (key, owner, expires_at_ms) VALUES (?, ?, ?)
            ON CONFLICT(key) DO UPDATE SET
                owner = excluded.owner,
                expires_at_ms = excluded.expires_at_ms
            WHERE locks.expires_at_ms <= ?
            "#,
        )
        .bind(key)
        .bind(owner)
        .bind(expires)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(|e| GraphError::Lock(Box::new(e)))?;

        Ok(result.rows_affected() == 1)
    }

    async fn release(&self, key: &str, owner: &str) -> Result<bool> {
        // an expired lease is no longer held, even by its last owner
        let result = sqlx::query("DELETE FROM locks WHERE key = ? AND owner = ? AND expires_at_ms > ?")
            .bind(key)
            .bind(owner)
            .bind(Utc::now().timestamp_millis())
            .execute(&self.pool)
            .await
            .map_err(|e| GraphError::Lock(Box::new(e)))?;
        Ok(result.rows_affected() == 1)
    }
}

#[async_trait]
impl LlmCache for SqliteStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let row: Option<(String,)> = sqlx::query_as("SELECT value FROM llm_cache WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await
            .map_err(GraphError::storage)?;
        Ok(row.map(|(value,)| value))
    }

    async fn put(&self, key: &str, value: &str) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO llm_cache (key, value, created_at) VALUES (?, ?, ?)
            ON CONFLICT(key) DO UPDATE SET value = excluded.value
            "#,
        )
        .bind(key)
        .bind(value)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(GraphError::storage)?;
        Ok(())
    }
}
