//! Top-level wiring: buffers, spaces, the session hub and the optional
//! retrieval engine, plus the operations that span them.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use membank_state::{
    Engine, EngineMetrics, HashEmbedder, LongTermRecord, MemoryVectorStore, Metadata,
    RetrievalEngine, SurrealVectorStore, VectorStore,
};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument};

use crate::buffer::{BufferKey, BufferRegistry, PRIVATE_SPACE};
use crate::clock::{Clock, SystemClock};
use crate::config::{Settings, StoreKind};
use crate::context::RequestContext;
use crate::error::{MemoryError, MemoryResult};
use crate::message::{Message, Role};
use crate::metrics::METRICS;
use crate::obs;
use crate::retrieval::{MemoryRecord, AGENT_MODE_PROMPT};
use crate::shared::SessionHub;
use crate::spaces::SpaceRegistry;

/// Name reported by `health`.
pub const SERVER_NAME: &str = "memory-bank";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Health {
    pub name: String,
    pub version: String,
    pub engine_wired: bool,
    pub backend: String,
    pub time: DateTime<Utc>,
}

/// Outcome of promoting buffered messages to long-term storage.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlushReport {
    pub buffers: usize,
    pub stored: usize,
}

/// Outcome of [`MemoryBank::chain`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChainReport {
    pub session: String,
    pub query: String,
    pub embedded: bool,
    pub flushed: usize,
    pub memories: Vec<MemoryRecord>,
}

pub struct MemoryBank {
    settings: Settings,
    buffers: Arc<BufferRegistry>,
    spaces: Arc<SpaceRegistry>,
    hub: SessionHub,
    engine: Option<Arc<dyn RetrievalEngine>>,
}

impl MemoryBank {
    pub fn new(settings: Settings, engine: Option<Arc<dyn RetrievalEngine>>) -> Self {
        Self::with_clock(settings, engine, Arc::new(SystemClock))
    }

    pub fn with_clock(
        settings: Settings,
        engine: Option<Arc<dyn RetrievalEngine>>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let buffers = Arc::new(BufferRegistry::new(settings.short_term_size));
        let spaces = Arc::new(SpaceRegistry::with_clock(
            settings.default_space_ttl(),
            clock,
        ));
        let hub = SessionHub::new(Arc::clone(&buffers), Arc::clone(&spaces), engine.clone());
        Self {
            settings,
            buffers,
            spaces,
            hub,
            engine,
        }
    }

    /// Build the engine the settings ask for and wire everything to it.
    pub async fn from_settings(settings: Settings) -> MemoryResult<Self> {
        let store: Arc<dyn VectorStore> = match settings.memory_store {
            StoreKind::Memory => Arc::new(MemoryVectorStore::new()),
            StoreKind::Surreal => Arc::new(
                SurrealVectorStore::from_env(settings.surreal_url.as_deref()).await?,
            ),
        };
        let embedder = Arc::new(HashEmbedder::new(settings.embedding_dimension));
        let engine: Arc<dyn RetrievalEngine> = Arc::new(Engine::new(embedder, store));
        info!(
            backend = engine.backend_kind(),
            capacity = settings.short_term_size,
            "memory bank ready"
        );
        Ok(Self::new(settings, Some(engine)))
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn buffers(&self) -> &Arc<BufferRegistry> {
        &self.buffers
    }

    pub fn spaces(&self) -> &Arc<SpaceRegistry> {
        &self.spaces
    }

    pub fn hub(&self) -> &SessionHub {
        &self.hub
    }

    pub fn engine(&self) -> Option<&Arc<dyn RetrievalEngine>> {
        self.engine.as_ref()
    }

    fn require_engine(&self) -> MemoryResult<&Arc<dyn RetrievalEngine>> {
        self.engine
            .as_ref()
            .ok_or_else(|| MemoryError::Upstream("no retrieval engine configured".to_string()))
    }

    /// Buffer a message. Private writes go through the session hub so they
    /// pick up an embedding.
    pub async fn store(
        &self,
        ctx: &RequestContext,
        session: &str,
        space: &str,
        role: Role,
        content: &str,
        metadata: Metadata,
    ) -> MemoryResult<Message> {
        if content.trim().is_empty() {
            return Err(MemoryError::missing("content"));
        }
        if space == PRIVATE_SPACE && !session.trim().is_empty() {
            let session = self.hub.get_or_create(session).await?;
            return session.add_short(ctx, role, content, metadata).await;
        }
        self.buffers
            .append(ctx, session, space, role, content, metadata)
            .await
    }

    pub async fn embed(&self, ctx: &RequestContext, text: &str) -> MemoryResult<Vec<f32>> {
        if text.trim().is_empty() {
            return Err(MemoryError::missing("text"));
        }
        let engine = self.require_engine()?;
        ctx.run(engine.embed(text)).await
    }

    /// Store straight into a session's long-term scope.
    pub async fn store_long(
        &self,
        ctx: &RequestContext,
        session: &str,
        content: &str,
        metadata: Metadata,
    ) -> MemoryResult<LongTermRecord> {
        if session.trim().is_empty() {
            return Err(MemoryError::missing("session_id"));
        }
        if content.trim().is_empty() {
            return Err(MemoryError::missing("content"));
        }
        let engine = self.require_engine()?;
        let scope = BufferKey::private(session).long_term_scope();
        ctx.run(engine.store(&scope, content, metadata)).await
    }

    /// Promote unflushed messages of `session` (one space, or every buffer
    /// the session owns) to long-term storage. Buffers keep their contents.
    #[instrument(skip(self, ctx))]
    pub async fn flush(
        &self,
        ctx: &RequestContext,
        session: &str,
        space: Option<&str>,
    ) -> MemoryResult<FlushReport> {
        ctx.ensure_active()?;
        if session.trim().is_empty() {
            return Err(MemoryError::missing("session_id"));
        }
        let engine = self.require_engine()?;

        let keys = match space {
            Some(space) if !space.trim().is_empty() => vec![BufferKey::new(session, space)],
            _ => self.buffers.keys_for_session(session).await,
        };

        let mut report = FlushReport::default();
        for key in keys {
            let pending = self.buffers.pending_flush(&key).await;
            if pending.is_empty() {
                continue;
            }
            let scope = key.long_term_scope();
            let mut stored = 0;
            for message in pending {
                let mut metadata = message.metadata.clone();
                metadata.insert("role".to_string(), message.role.as_str().into());
                metadata.insert(
                    "timestamp".to_string(),
                    message.timestamp.to_rfc3339().into(),
                );
                ctx.run(engine.store(&scope, &message.content, metadata))
                    .await?;
                self.buffers.mark_flushed(&key, message.seq).await;
                stored += 1;
            }
            METRICS.inc_flushes();
            obs::emit_buffer_flushed(&key.session, &key.space, stored);
            report.buffers += 1;
            report.stored += stored;
        }
        Ok(report)
    }

    /// Keep the agent-mode system prompt in the session's long-term scope.
    pub async fn store_agent_prompt(
        &self,
        ctx: &RequestContext,
        session: &str,
    ) -> MemoryResult<LongTermRecord> {
        let mut metadata = Metadata::new();
        metadata.insert("type".to_string(), "agent_mode_prompt".into());
        metadata.insert("scope".to_string(), "system".into());
        self.store_long(ctx, session, AGENT_MODE_PROMPT, metadata)
            .await
    }

    /// Semantic search over a session's private memory, buffered and
    /// long-term.
    pub async fn query(
        &self,
        ctx: &RequestContext,
        session: &str,
        query: &str,
        limit: usize,
    ) -> MemoryResult<Vec<MemoryRecord>> {
        if query.trim().is_empty() {
            return Err(MemoryError::missing("query"));
        }
        self.hub
            .get_or_create(session)
            .await?
            .retrieve_private(ctx, query, limit)
            .await
    }

    /// Buffer `content` privately, flush the private buffer, then retrieve
    /// against `query`.
    #[instrument(skip(self, ctx, content))]
    pub async fn chain(
        &self,
        ctx: &RequestContext,
        session: &str,
        content: &str,
        query: &str,
        limit: usize,
    ) -> MemoryResult<ChainReport> {
        if query.trim().is_empty() {
            return Err(MemoryError::missing("query"));
        }
        self.require_engine()?;
        let message = self
            .store(ctx, session, PRIVATE_SPACE, Role::User, content, Metadata::new())
            .await?;
        let flushed = self.flush(ctx, session, Some(PRIVATE_SPACE)).await?;
        let memories = self.query(ctx, session, query, limit).await?;
        Ok(ChainReport {
            session: session.to_string(),
            query: query.to_string(),
            embedded: message.embedding.as_ref().is_some_and(|e| !e.is_empty()),
            flushed: flushed.stored,
            memories,
        })
    }

    pub fn engine_metrics(&self) -> Option<EngineMetrics> {
        self.engine.as_ref().map(|e| e.metrics())
    }

    pub fn health(&self) -> Health {
        Health {
            name: SERVER_NAME.to_string(),
            version: crate::VERSION.to_string(),
            engine_wired: self.engine.is_some(),
            backend: self
                .engine
                .as_ref()
                .map(|e| e.backend_kind())
                .unwrap_or("none")
                .to_string(),
            time: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small() -> Settings {
        Settings {
            short_term_size: 4,
            embedding_dimension: 64,
            ..Settings::default()
        }
    }

    #[tokio::test]
    async fn health_reports_engine_and_backend() {
        let bank = MemoryBank::from_settings(small()).await.unwrap();
        let h = bank.health();
        assert_eq!(h.name, SERVER_NAME);
        assert!(h.engine_wired);
        assert_eq!(h.backend, "memory");

        let bare = MemoryBank::new(small(), None);
        assert!(!bare.health().engine_wired);
        assert_eq!(bare.health().backend, "none");
    }

    #[tokio::test]
    async fn private_store_attaches_embedding() {
        let bank = MemoryBank::from_settings(small()).await.unwrap();
        let ctx = RequestContext::background();
        let msg = bank
            .store(&ctx, "s1", PRIVATE_SPACE, Role::User, "hello", Metadata::new())
            .await
            .unwrap();
        assert_eq!(msg.embedding.as_ref().map(Vec::len), Some(64));

        let other = bank
            .store(&ctx, "s1", "notes", Role::User, "raw", Metadata::new())
            .await
            .unwrap();
        assert!(other.embedding.is_none());
    }

    #[tokio::test]
    async fn flush_is_incremental_and_keeps_buffer() {
        let bank = MemoryBank::from_settings(small()).await.unwrap();
        let ctx = RequestContext::background();
        for c in ["one", "two"] {
            bank.store(&ctx, "s1", PRIVATE_SPACE, Role::User, c, Metadata::new())
                .await
                .unwrap();
        }

        let first = bank.flush(&ctx, "s1", None).await.unwrap();
        assert_eq!(first, FlushReport { buffers: 1, stored: 2 });
        let again = bank.flush(&ctx, "s1", None).await.unwrap();
        assert_eq!(again.stored, 0);

        let recent = bank
            .buffers()
            .recent(&ctx, "s1", PRIVATE_SPACE, 0)
            .await
            .unwrap();
        assert_eq!(recent.len(), 2);
        assert_eq!(bank.engine_metrics().unwrap().stored, 2);
    }

    #[tokio::test]
    async fn flushed_message_is_retrieved_once() {
        let bank = MemoryBank::from_settings(small()).await.unwrap();
        let ctx = RequestContext::background();
        bank.store(&ctx, "s1", PRIVATE_SPACE, Role::User, "deploy friday", Metadata::new())
            .await
            .unwrap();
        bank.flush(&ctx, "s1", None).await.unwrap();

        let hits = bank
            .hub()
            .get_or_create("s1")
            .await
            .unwrap()
            .retrieve_private(&ctx, "deploy friday", 10)
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].content, "deploy friday");
    }

    #[tokio::test]
    async fn chain_stores_flushes_and_retrieves() {
        let bank = MemoryBank::from_settings(small()).await.unwrap();
        let ctx = RequestContext::background();
        let report = bank
            .chain(&ctx, "s1", "user prefers dark mode", "dark mode", 0)
            .await
            .unwrap();
        assert!(report.embedded);
        assert_eq!(report.flushed, 1);
        assert_eq!(report.memories.len(), 1);
        assert_eq!(report.memories[0].content, "user prefers dark mode");
        assert_eq!(bank.engine_metrics().unwrap().stored, 1);

        let again = bank
            .chain(&ctx, "s1", "and large fonts", "fonts", 5)
            .await
            .unwrap();
        assert_eq!(again.flushed, 1);
    }

    #[tokio::test]
    async fn agent_prompt_lands_in_session_scope() {
        let bank = MemoryBank::from_settings(small()).await.unwrap();
        let ctx = RequestContext::background();
        let record = bank.store_agent_prompt(&ctx, "s1").await.unwrap();
        assert_eq!(record.scope, "s1");
        assert_eq!(record.content, AGENT_MODE_PROMPT);
        assert_eq!(record.metadata.get("type"), Some(&"agent_mode_prompt".into()));
    }

    #[tokio::test]
    async fn long_term_ops_need_an_engine() {
        let bank = MemoryBank::new(small(), None);
        let ctx = RequestContext::background();
        assert!(matches!(
            bank.store_long(&ctx, "s1", "x", Metadata::new()).await,
            Err(MemoryError::Upstream(_))
        ));
        assert!(matches!(
            bank.embed(&ctx, "x").await,
            Err(MemoryError::Upstream(_))
        ));
        assert!(matches!(
            bank.chain(&ctx, "s1", "x", "x", 0).await,
            Err(MemoryError::Upstream(_))
        ));
        assert!(bank.buffers().is_empty().await);
    }
}
