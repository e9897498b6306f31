//! Shared fixtures for integration tests.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use membank_core::{
    BufferRegistry, ManualClock, MemoryResult, RequestContext, SessionHub, SpaceRegistry,
};
use membank_state::{
    Engine, EngineMetrics, HashEmbedder, LongTermRecord, MemoryVectorStore, Metadata,
    RetrievalEngine, ScoredRecord, StorageError, StorageResult,
};

/// Engine over the in-memory backends that can be told to fail or stall.
pub struct ScriptedEngine {
    inner: Engine,
    failing_scopes: HashSet<String>,
    fail_embed: bool,
    query_delay: Option<Duration>,
}

impl ScriptedEngine {
    pub fn new() -> Self {
        Self {
            inner: Engine::new(
                Arc::new(HashEmbedder::new(64)),
                Arc::new(MemoryVectorStore::new()),
            ),
            failing_scopes: HashSet::new(),
            fail_embed: false,
            query_delay: None,
        }
    }

    pub fn failing_scope(mut self, scope: &str) -> Self {
        self.failing_scopes.insert(scope.to_string());
        self
    }

    pub fn failing_embed(mut self) -> Self {
        self.fail_embed = true;
        self
    }

    pub fn slow_queries(mut self, delay: Duration) -> Self {
        self.query_delay = Some(delay);
        self
    }
}

#[async_trait]
impl RetrievalEngine for ScriptedEngine {
    async fn embed(&self, text: &str) -> StorageResult<Vec<f32>> {
        if self.fail_embed {
            return Err(StorageError::Embedding("embedder offline".to_string()));
        }
        self.inner.embed(text).await
    }

    async fn store(
        &self,
        scope: &str,
        content: &str,
        metadata: Metadata,
    ) -> StorageResult<LongTermRecord> {
        self.inner.store(scope, content, metadata).await
    }

    async fn query(
        &self,
        scope: &str,
        query: &[f32],
        limit: usize,
    ) -> StorageResult<Vec<ScoredRecord>> {
        if let Some(delay) = self.query_delay {
            tokio::time::sleep(delay).await;
        }
        if self.failing_scopes.contains(scope) {
            return Err(StorageError::Backend(format!("{scope} unreachable")));
        }
        self.inner.query(scope, query, limit).await
    }

    fn metrics(&self) -> EngineMetrics {
        self.inner.metrics()
    }

    fn backend_kind(&self) -> &'static str {
        "scripted"
    }
}

pub struct Fixture {
    pub clock: Arc<ManualClock>,
    pub buffers: Arc<BufferRegistry>,
    pub spaces: Arc<SpaceRegistry>,
    pub hub: SessionHub,
}

pub fn fixture(engine: Option<Arc<dyn RetrievalEngine>>) -> Fixture {
    let clock = Arc::new(ManualClock::new(Utc::now()));
    let buffers = Arc::new(BufferRegistry::new(64));
    let spaces = Arc::new(SpaceRegistry::with_clock(
        Duration::from_secs(86_400),
        clock.clone(),
    ));
    let hub = SessionHub::new(buffers.clone(), spaces.clone(), engine);
    Fixture {
        clock,
        buffers,
        spaces,
        hub,
    }
}

pub fn ctx() -> RequestContext {
    RequestContext::background()
}

pub fn acl(entries: &[(&str, &str)]) -> HashMap<String, String> {
    entries
        .iter()
        .map(|(p, r)| (p.to_string(), r.to_string()))
        .collect()
}

/// `team` space: alice writer, bob reader.
pub async fn team(fx: &Fixture) -> MemoryResult<()> {
    fx.spaces
        .upsert(
            &ctx(),
            "team",
            Duration::from_secs(3600),
            &acl(&[("alice", "writer"), ("bob", "reader")]),
        )
        .await
}
