//! Explicit LLM response cache.
//!
//! Owned and injected by the caller; the engine never keeps a process-wide
//! cache of its own.

use async_trait::async_trait;
use serde::{de::DeserializeOwned, Serialize};
use sha2::{Digest, Sha256};

use crate::error::Result;

/// Key/value cache for LLM responses.
#[async_trait]
pub trait LlmCache: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>>;

    async fn put(&self, key: &str, value: &str) -> Result<()>;
}

/// Cache key for one LLM call: sha256 over call kind, model and input.
pub fn cache_key<T: Serialize + ?Sized>(kind: &str, model_id: &str, input: &T) -> Result<String> {
    let payload = serde_json::to_vec(input)?;
    let mut hasher = Sha256::new();
    hasher.update(kind.as_bytes());
    hasher.update([0u8]);
    hasher.update(model_id.as_bytes());
    hasher.update([0u8]);
    hasher.update(&payload);
    Ok(format!("{kind}:{:x}", hasher.finalize()))
}

/// Look up a typed value. Undecodable entries count as misses.
pub async fn cached<T: DeserializeOwned>(cache: &dyn LlmCache, key: &str) -> Result<Option<T>> {
    Ok(cache
        .get(key)
        .await?
        .and_then(|raw| serde_json::from_str(&raw).ok()))
}

/// Store a typed value.
pub async fn remember<T: Serialize + ?Sized>(cache: &dyn LlmCache, key: &str, value: &T) -> Result<()> {
    let raw = serde_json::to_string(value)?;
    cache.put(key, &raw).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cache_key_depends_on_model() {
        let a = cache_key("extract", "model-a", "some text").unwrap();
        let b = cache_key("extract", "model-b", "some text").unwrap();
        assert_ne!(a, b);
        assert!(a.starts_with("extract:"));
        assert_eq!(a, cache_key("extract", "model-a", "some text").unwrap());
    }
}
