//! Storage trait definitions for Memory Bank
//!
//! These traits define the external collaborators the coordination core
//! consumes but never implements itself:
//! - `Embedder`: text → embedding vector
//! - `VectorStore`: long-term record persistence and ranked lookup by scope
//! - `RetrievalEngine`: the facade the core talks to (embed, store, query,
//!   similarity, metrics)
//!
//! All traits are async and backend-agnostic. In-memory implementations live
//! in the `in_memory` module.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::Sha256;

use crate::error::StorageError;

/// Result type for storage operations
pub type StorageResult<T> = std::result::Result<T, StorageError>;

/// Schema-less metadata attached to messages and records.
///
/// Values are restricted to what JSON can express (string, number, bool,
/// nested map/list, null).
pub type Metadata = serde_json::Map<String, serde_json::Value>;

// ---------------------------------------------------------------------------
// ContentDigest
// ---------------------------------------------------------------------------

/// Content digest (SHA-256 hex string).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContentDigest(String);

impl ContentDigest {
    /// Digest identifying `content` within `scope`.
    pub fn of_scoped(scope: &str, content: &str) -> Self {
        use sha2::Digest;
        let mut hasher = Sha256::new();
        hasher.update(scope.as_bytes());
        hasher.update([0u8]);
        hasher.update(content.as_bytes());
        ContentDigest(hex::encode(hasher.finalize()))
    }

    /// Return the full hex string.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Short form (first 12 hex chars).
    pub fn short(&self) -> &str {
        &self.0[..12.min(self.0.len())]
    }
}

impl std::fmt::Display for ContentDigest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// Records
// ---------------------------------------------------------------------------

/// A persisted long-term memory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LongTermRecord {
    /// Digest of (scope, content); identical content in a scope maps to one record
    pub id: ContentDigest,
    /// Session or space scope the record belongs to
    pub scope: String,
    pub content: String,
    pub metadata: Metadata,
    pub embedding: Vec<f32>,
    pub created_at: DateTime<Utc>,
}

impl LongTermRecord {
    pub fn new(
        scope: impl Into<String>,
        content: impl Into<String>,
        metadata: Metadata,
        embedding: Vec<f32>,
    ) -> Self {
        let scope = scope.into();
        let content = content.into();
        Self {
            id: ContentDigest::of_scoped(&scope, &content),
            scope,
            content,
            metadata,
            embedding,
            created_at: Utc::now(),
        }
    }
}

/// A long-term record paired with its similarity to a query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredRecord {
    pub record: LongTermRecord,
    pub score: f32,
}

/// Point-in-time engine counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineMetrics {
    pub embeddings: u64,
    pub stored: u64,
    pub queries: u64,
    pub failures: u64,
}

// ---------------------------------------------------------------------------
// Traits
// ---------------------------------------------------------------------------

/// Text embedding provider.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Generate an embedding for a single text.
    async fn embed(&self, text: &str) -> StorageResult<Vec<f32>>;

    /// Length of every vector this embedder produces.
    fn dimension(&self) -> usize;
}

/// Long-term vector store.
///
/// Guarantees:
/// - `put` with an existing record id replaces the stored record.
/// - `search` only returns records from the requested scope, best match
///   first, at most `limit` of them.
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Persist (or replace) a record.
    async fn put(&self, record: LongTermRecord) -> StorageResult<LongTermRecord>;

    /// Rank the records of `scope` against `query`.
    async fn search(
        &self,
        scope: &str,
        query: &[f32],
        limit: usize,
    ) -> StorageResult<Vec<ScoredRecord>>;

    /// Short backend label ("memory", "surrealdb", ...).
    fn kind(&self) -> &'static str;
}

/// The retrieval facade consumed by the coordination core.
#[async_trait]
pub trait RetrievalEngine: Send + Sync {
    /// Embed a text.
    async fn embed(&self, text: &str) -> StorageResult<Vec<f32>>;

    /// Embed and persist `content` under `scope`.
    async fn store(
        &self,
        scope: &str,
        content: &str,
        metadata: Metadata,
    ) -> StorageResult<LongTermRecord>;

    /// Ranked long-term records of `scope` for a query vector.
    async fn query(
        &self,
        scope: &str,
        query: &[f32],
        limit: usize,
    ) -> StorageResult<Vec<ScoredRecord>>;

    /// Similarity between two vectors. Cosine unless overridden.
    fn similarity(&self, a: &[f32], b: &[f32]) -> f32 {
        cosine_similarity(a, b)
    }

    /// Counter snapshot.
    fn metrics(&self) -> EngineMetrics;

    /// Label of the underlying vector store.
    fn backend_kind(&self) -> &'static str;
}

/// Cosine similarity; 0.0 for mismatched lengths or zero vectors.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }

    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a < 1e-8 || norm_b < 1e-8 {
        return 0.0;
    }

    dot / (norm_a * norm_b)
}

/// Rank `records` against `query`, best first, keeping at most `limit`.
pub fn rank_records(
    records: impl IntoIterator<Item = LongTermRecord>,
    query: &[f32],
    limit: usize,
) -> Vec<ScoredRecord> {
    let mut scored: Vec<ScoredRecord> = records
        .into_iter()
        .map(|record| {
            let score = cosine_similarity(&record.embedding, query);
            ScoredRecord { record, score }
        })
        .collect();

    scored.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| b.record.created_at.cmp(&a.record.created_at))
    });
    scored.truncate(limit);
    scored
}
