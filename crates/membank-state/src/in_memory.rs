//! In-process backends
//!
//! Provides `MemoryVectorStore` and `HashEmbedder`, which satisfy the trait
//! contracts without any external service. They back the default
//! `memory_store = "memory"` configuration and the test suites.

use std::collections::HashMap;

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use tokio::sync::RwLock;

use crate::error::StorageError;
use crate::storage_traits::*;

// ---------------------------------------------------------------------------
// MemoryVectorStore
// ---------------------------------------------------------------------------

/// In-memory vector store backed by `HashMap<scope, HashMap<record id, record>>`.
#[derive(Debug, Default)]
pub struct MemoryVectorStore {
    scopes: RwLock<HashMap<String, HashMap<String, LongTermRecord>>>,
}

impl MemoryVectorStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of records stored under `scope`.
    pub async fn len(&self, scope: &str) -> usize {
        self.scopes
            .read()
            .await
            .get(scope)
            .map(HashMap::len)
            .unwrap_or(0)
    }
}

#[async_trait]
impl VectorStore for MemoryVectorStore {
    async fn put(&self, record: LongTermRecord) -> StorageResult<LongTermRecord> {
        let mut scopes = self.scopes.write().await;
        scopes
            .entry(record.scope.clone())
            .or_default()
            .insert(record.id.as_str().to_string(), record.clone());
        Ok(record)
    }

    async fn search(
        &self,
        scope: &str,
        query: &[f32],
        limit: usize,
    ) -> StorageResult<Vec<ScoredRecord>> {
        let scopes = self.scopes.read().await;
        let Some(records) = scopes.get(scope) else {
            return Ok(Vec::new());
        };
        Ok(rank_records(records.values().cloned(), query, limit))
    }

    fn kind(&self) -> &'static str {
        "memory"
    }
}

// ---------------------------------------------------------------------------
// HashEmbedder
// ---------------------------------------------------------------------------

/// Deterministic signed feature-hashing embedder.
///
/// Each lowercase alphanumeric token is hashed into one of `dimension`
/// buckets with a hash-derived sign; the result is L2-normalised. Texts that
/// share words land close together. This is a lexical stand-in, not a
/// semantic model.
#[derive(Debug, Clone)]
pub struct HashEmbedder {
    dimension: usize,
}

impl HashEmbedder {
    pub const DEFAULT_DIMENSION: usize = 256;

    pub fn new(dimension: usize) -> Self {
        Self {
            dimension: dimension.max(1),
        }
    }

    fn embed_sync(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dimension];
        for token in text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
        {
            let digest = Sha256::digest(token.to_lowercase().as_bytes());
            let mut bucket = [0u8; 8];
            bucket.copy_from_slice(&digest[..8]);
            let index = (u64::from_le_bytes(bucket) % self.dimension as u64) as usize;
            let sign = if digest[8] & 1 == 0 { 1.0 } else { -1.0 };
            vector[index] += sign;
        }

        let norm: f32 = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            for x in &mut vector {
                *x /= norm;
            }
        }
        vector
    }
}

impl Default for HashEmbedder {
    fn default() -> Self {
        Self::new(Self::DEFAULT_DIMENSION)
    }
}

#[async_trait]
impl Embedder for HashEmbedder {
    async fn embed(&self, text: &str) -> StorageResult<Vec<f32>> {
        if text.trim().is_empty() {
            return Err(StorageError::Embedding("cannot embed empty text".to_string()));
        }
        Ok(self.embed_sync(text))
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn embedder_is_deterministic_and_normalised() {
        let e = HashEmbedder::new(64);
        let a = e.embed("Deploy the canary").await.unwrap();
        let b = e.embed("deploy THE canary").await.unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
        let norm: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }

    #[tokio::test]
    async fn embedder_rejects_blank_text() {
        let e = HashEmbedder::default();
        let err = e.embed("   ").await.unwrap_err();
        assert!(matches!(err, StorageError::Embedding(_)));
    }

    #[tokio::test]
    async fn shared_words_score_higher_than_disjoint_words() {
        let e = HashEmbedder::default();
        let q = e.embed("rollback canary").await.unwrap();
        let related = e.embed("canary rollback after health check").await.unwrap();
        let unrelated = e.embed("lunch menu tuesday").await.unwrap();
        assert!(cosine_similarity(&q, &related) > cosine_similarity(&q, &unrelated));
    }

    #[tokio::test]
    async fn store_put_replaces_same_content() {
        let store = MemoryVectorStore::new();
        let r = LongTermRecord::new("alice", "note", Metadata::new(), vec![1.0, 0.0]);
        store.put(r.clone()).await.unwrap();
        store.put(r).await.unwrap();
        assert_eq!(store.len("alice").await, 1);
    }

    #[tokio::test]
    async fn store_search_is_scoped() {
        let store = MemoryVectorStore::new();
        store
            .put(LongTermRecord::new("alice", "a", Metadata::new(), vec![1.0, 0.0]))
            .await
            .unwrap();
        store
            .put(LongTermRecord::new("bob", "b", Metadata::new(), vec![1.0, 0.0]))
            .await
            .unwrap();

        let hits = store.search("alice", &[1.0, 0.0], 10).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].record.content, "a");
        assert!(store.search("nobody", &[1.0, 0.0], 10).await.unwrap().is_empty());
    }
}
