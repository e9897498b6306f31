//! Retrieval engine composing an [`Embedder`] with a [`VectorStore`].

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, instrument, warn};

use crate::error::StorageError;
use crate::storage_traits::*;

/// Tuning knobs for [`Engine`].
#[derive(Debug, Clone)]
pub struct EngineOptions {
    /// Query hits scoring below this are dropped.
    pub min_score: f32,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self { min_score: 0.0 }
    }
}

#[derive(Debug, Default)]
struct Counters {
    embeddings: AtomicU64,
    stored: AtomicU64,
    queries: AtomicU64,
    failures: AtomicU64,
}

/// Default [`RetrievalEngine`]: embeds with one collaborator, persists and
/// ranks with another, and counts what it does.
pub struct Engine {
    embedder: Arc<dyn Embedder>,
    store: Arc<dyn VectorStore>,
    options: EngineOptions,
    counters: Counters,
}

impl Engine {
    pub fn new(embedder: Arc<dyn Embedder>, store: Arc<dyn VectorStore>) -> Self {
        Self {
            embedder,
            store,
            options: EngineOptions::default(),
            counters: Counters::default(),
        }
    }

    pub fn with_options(mut self, options: EngineOptions) -> Self {
        self.options = options;
        self
    }

    fn record_failure<T>(&self, result: StorageResult<T>) -> StorageResult<T> {
        if let Err(e) = &result {
            self.counters.failures.fetch_add(1, Ordering::Relaxed);
            warn!(error = %e, "engine call failed");
        }
        result
    }
}

#[async_trait]
impl RetrievalEngine for Engine {
    async fn embed(&self, text: &str) -> StorageResult<Vec<f32>> {
        self.counters.embeddings.fetch_add(1, Ordering::Relaxed);
        let result = self.embedder.embed(text).await;
        self.record_failure(result)
    }

    #[instrument(skip(self, content, metadata), fields(scope = %scope))]
    async fn store(
        &self,
        scope: &str,
        content: &str,
        metadata: Metadata,
    ) -> StorageResult<LongTermRecord> {
        let embedding = self.embed(content).await?;
        let record = LongTermRecord::new(scope, content, metadata, embedding);
        let result = self.store.put(record).await;
        let stored = self.record_failure(result)?;
        self.counters.stored.fetch_add(1, Ordering::Relaxed);
        debug!(id = %stored.id.short(), "long-term record stored");
        Ok(stored)
    }

    #[instrument(skip(self, query), fields(scope = %scope, limit = limit))]
    async fn query(
        &self,
        scope: &str,
        query: &[f32],
        limit: usize,
    ) -> StorageResult<Vec<ScoredRecord>> {
        self.counters.queries.fetch_add(1, Ordering::Relaxed);
        let expected = self.embedder.dimension();
        if query.len() != expected {
            return self.record_failure(Err(StorageError::DimensionMismatch {
                expected,
                actual: query.len(),
            }));
        }

        let result = self.store.search(scope, query, limit).await;
        let hits = self.record_failure(result)?;
        Ok(hits
            .into_iter()
            .filter(|hit| hit.score >= self.options.min_score)
            .collect())
    }

    fn metrics(&self) -> EngineMetrics {
        EngineMetrics {
            embeddings: self.counters.embeddings.load(Ordering::Relaxed),
            stored: self.counters.stored.load(Ordering::Relaxed),
            queries: self.counters.queries.load(Ordering::Relaxed),
            failures: self.counters.failures.load(Ordering::Relaxed),
        }
    }

    fn backend_kind(&self) -> &'static str {
        self.store.kind()
    }
}
