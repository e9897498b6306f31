//! Trait contract tests for VectorStore and RetrievalEngine.
//!
//! These tests verify the behavioral contracts of the storage traits
//! against every bundled backend. Any conforming implementation must pass.

use std::sync::Arc;

use membank_state::storage_traits::*;
use membank_state::{
    Engine, HashEmbedder, MemoryVectorStore, StorageError, SurrealVectorStore,
};
use serde_json::json;

fn meta(value: serde_json::Value) -> Metadata {
    value.as_object().cloned().unwrap_or_default()
}

async fn backends() -> Vec<Arc<dyn VectorStore>> {
    vec![
        Arc::new(MemoryVectorStore::new()),
        Arc::new(SurrealVectorStore::in_memory().await.unwrap()),
    ]
}

// ===========================================================================
// VectorStore contract tests
// ===========================================================================

#[tokio::test]
async fn store_search_returns_best_match_first() {
    for store in backends().await {
        store
            .put(LongTermRecord::new("alice", "east", Metadata::new(), vec![1.0, 0.0]))
            .await
            .unwrap();
        store
            .put(LongTermRecord::new("alice", "north", Metadata::new(), vec![0.0, 1.0]))
            .await
            .unwrap();

        let hits = store.search("alice", &[0.9, 0.1], 10).await.unwrap();
        assert_eq!(hits.len(), 2, "backend {}", store.kind());
        assert_eq!(hits[0].record.content, "east", "backend {}", store.kind());
        assert!(hits[0].score >= hits[1].score);
    }
}

#[tokio::test]
async fn store_search_respects_limit() {
    for store in backends().await {
        for i in 0..5 {
            store
                .put(LongTermRecord::new(
                    "alice",
                    format!("note {i}"),
                    Metadata::new(),
                    vec![1.0, i as f32],
                ))
                .await
                .unwrap();
        }
        let hits = store.search("alice", &[1.0, 0.0], 3).await.unwrap();
        assert_eq!(hits.len(), 3, "backend {}", store.kind());
    }
}

#[tokio::test]
async fn store_search_never_crosses_scopes() {
    for store in backends().await {
        store
            .put(LongTermRecord::new("space:team", "shared", Metadata::new(), vec![1.0]))
            .await
            .unwrap();
        let hits = store.search("alice", &[1.0], 10).await.unwrap();
        assert!(hits.is_empty(), "backend {}", store.kind());
    }
}

#[tokio::test]
async fn store_put_is_idempotent_per_scope_and_content() {
    for store in backends().await {
        let record = LongTermRecord::new("alice", "same", Metadata::new(), vec![1.0, 0.0]);
        store.put(record.clone()).await.unwrap();
        store.put(record).await.unwrap();
        let hits = store.search("alice", &[1.0, 0.0], 10).await.unwrap();
        assert_eq!(hits.len(), 1, "backend {}", store.kind());
    }
}

#[tokio::test]
async fn store_round_trips_metadata() {
    for store in backends().await {
        let record = LongTermRecord::new(
            "alice",
            "with metadata",
            meta(json!({"source": "chat", "turn": 3, "pinned": true})),
            vec![1.0, 0.0],
        );
        store.put(record).await.unwrap();
        let hits = store.search("alice", &[1.0, 0.0], 1).await.unwrap();
        let m = &hits[0].record.metadata;
        assert_eq!(m.get("source"), Some(&json!("chat")), "backend {}", store.kind());
        assert_eq!(m.get("pinned"), Some(&json!(true)));
    }
}

// ===========================================================================
// RetrievalEngine contract tests
// ===========================================================================

#[tokio::test]
async fn engine_store_then_query_over_surreal() {
    let store = Arc::new(SurrealVectorStore::in_memory().await.unwrap());
    let engine = Engine::new(Arc::new(HashEmbedder::default()), store);

    engine
        .store("bob", "rollback triggered by failing health check", Metadata::new())
        .await
        .unwrap();
    engine
        .store("bob", "lunch order for friday", Metadata::new())
        .await
        .unwrap();

    let q = engine.embed("health check rollback").await.unwrap();
    let hits = engine.query("bob", &q, 1).await.unwrap();
    assert_eq!(hits.len(), 1);
    assert!(hits[0].record.content.contains("rollback"));
    assert_eq!(engine.backend_kind(), "surrealdb");
}

#[tokio::test]
async fn engine_surfaces_embedding_failure() {
    let engine = Engine::new(
        Arc::new(HashEmbedder::default()),
        Arc::new(MemoryVectorStore::new()),
    );
    let err = engine.store("bob", "  ", Metadata::new()).await.unwrap_err();
    assert!(matches!(err, StorageError::Embedding(_)));
    assert_eq!(engine.metrics().failures, 1);
    assert_eq!(engine.metrics().stored, 0);
}
