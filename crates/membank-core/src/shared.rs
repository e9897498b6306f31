//! Per-principal views over the private buffer and joined spaces.
//!
//! A [`SharedSession`] authorizes every space access against the
//! [`SpaceRegistry`] at call time; nothing granted at `join` is cached.
//! Retrieval fans out over every source concurrently and merges the
//! results.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use membank_state::{Metadata, RetrievalEngine};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, instrument};

use crate::buffer::{space_scope, BufferKey, BufferRegistry, PRIVATE_SPACE};
use crate::context::RequestContext;
use crate::error::{MemoryError, MemoryResult, SourceFailure};
use crate::message::{Message, Role};
use crate::metrics::METRICS;
use crate::obs;
use crate::retrieval::{self, MemoryRecord, DEFAULT_RETRIEVE_LIMIT};
use crate::spaces::{SpaceRegistry, SpaceRole};

/// One place retrieval reads from.
#[derive(Debug, Clone)]
struct Source {
    /// `"private"` or the space name.
    label: String,
    key: BufferKey,
    scope: String,
}

impl Source {
    fn private(principal: &str) -> Self {
        let key = BufferKey::private(principal);
        Self {
            label: PRIVATE_SPACE.to_string(),
            scope: key.long_term_scope(),
            key,
        }
    }

    fn space(name: &str) -> Self {
        Self {
            label: name.to_string(),
            key: BufferKey::shared(name),
            scope: space_scope(name),
        }
    }
}

/// Which sources a retrieval call may read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Reach {
    All,
    SharedOnly,
    PrivateOnly,
}

/// A principal's private session plus the set of spaces it has joined.
pub struct SharedSession {
    principal: String,
    joined: Mutex<BTreeSet<String>>,
    buffers: Arc<BufferRegistry>,
    spaces: Arc<SpaceRegistry>,
    engine: Option<Arc<dyn RetrievalEngine>>,
}

impl SharedSession {
    pub fn new(
        principal: impl Into<String>,
        buffers: Arc<BufferRegistry>,
        spaces: Arc<SpaceRegistry>,
        engine: Option<Arc<dyn RetrievalEngine>>,
    ) -> Self {
        Self {
            principal: principal.into(),
            joined: Mutex::new(BTreeSet::new()),
            buffers,
            spaces,
            engine,
        }
    }

    pub fn principal(&self) -> &str {
        &self.principal
    }

    /// Joined spaces, sorted. Includes spaces whose grant has since lapsed.
    pub async fn joined(&self) -> Vec<String> {
        self.joined.lock().await.iter().cloned().collect()
    }

    async fn require(&self, space: &str, needed: SpaceRole) -> MemoryResult<SpaceRole> {
        match self.spaces.authorized_role(space, &self.principal).await {
            Some(role) if role >= needed => Ok(role),
            held => {
                METRICS.inc_permission_denials();
                obs::emit_permission_denied(&self.principal, space, needed.as_str());
                let detail = match held {
                    Some(role) => format!("holds {role}"),
                    None => "holds no valid grant".to_string(),
                };
                Err(MemoryError::Permission(format!(
                    "'{}' needs {needed} on space '{space}' but {detail}",
                    self.principal
                )))
            }
        }
    }

    /// Join a space the principal can at least read. Re-joining is a no-op.
    #[instrument(skip(self, ctx), fields(principal = %self.principal))]
    pub async fn join(&self, ctx: &RequestContext, space: &str) -> MemoryResult<()> {
        ctx.ensure_active()?;
        self.require(space, SpaceRole::Reader).await?;
        if self.joined.lock().await.insert(space.to_string()) {
            obs::emit_shared_joined(&self.principal, space);
        }
        Ok(())
    }

    /// Never fails on a space that was not joined.
    #[instrument(skip(self, ctx), fields(principal = %self.principal))]
    pub async fn leave(&self, ctx: &RequestContext, space: &str) -> MemoryResult<()> {
        ctx.ensure_active()?;
        let was_joined = self.joined.lock().await.remove(space);
        obs::emit_shared_left(&self.principal, space, was_joined);
        Ok(())
    }

    async fn embed_for_write(
        &self,
        ctx: &RequestContext,
        content: &str,
    ) -> MemoryResult<Option<Vec<f32>>> {
        match &self.engine {
            Some(engine) => Ok(Some(ctx.run(engine.embed(content)).await?)),
            None => Ok(None),
        }
    }

    /// Write to the principal's private buffer.
    pub async fn add_short(
        &self,
        ctx: &RequestContext,
        role: Role,
        content: &str,
        metadata: Metadata,
    ) -> MemoryResult<Message> {
        ctx.ensure_active()?;
        let embedding = self.embed_for_write(ctx, content).await?;
        let message = Message::new(role, content, metadata).with_embedding(embedding);
        self.buffers
            .append_message(ctx, &self.principal, PRIVATE_SPACE, message)
            .await
    }

    /// Write into a space's buffer. Needs writer at the time of the call.
    #[instrument(skip(self, ctx, content, metadata), fields(principal = %self.principal))]
    pub async fn add_short_to(
        &self,
        ctx: &RequestContext,
        space: &str,
        content: &str,
        mut metadata: Metadata,
    ) -> MemoryResult<Message> {
        ctx.ensure_active()?;
        if content.trim().is_empty() {
            return Err(MemoryError::missing("content"));
        }
        self.require(space, SpaceRole::Writer).await?;

        let embedding = self.embed_for_write(ctx, content).await?;
        metadata
            .entry("principal")
            .or_insert_with(|| self.principal.clone().into());
        let message = Message::new(Role::User, content, metadata).with_embedding(embedding);

        self.buffers.append_shared(ctx, space, message).await
    }

    /// Private session plus every joined space still readable.
    pub async fn retrieve(
        &self,
        ctx: &RequestContext,
        query: &str,
        limit: usize,
    ) -> MemoryResult<Vec<MemoryRecord>> {
        self.retrieve_from(ctx, query, limit, Reach::All).await
    }

    /// Joined, still-readable spaces only.
    pub async fn retrieve_shared(
        &self,
        ctx: &RequestContext,
        query: &str,
        limit: usize,
    ) -> MemoryResult<Vec<MemoryRecord>> {
        self.retrieve_from(ctx, query, limit, Reach::SharedOnly).await
    }

    /// The principal's private session only.
    pub async fn retrieve_private(
        &self,
        ctx: &RequestContext,
        query: &str,
        limit: usize,
    ) -> MemoryResult<Vec<MemoryRecord>> {
        self.retrieve_from(ctx, query, limit, Reach::PrivateOnly).await
    }

    async fn sources(&self, reach: Reach) -> Vec<Source> {
        let mut sources = Vec::new();
        if reach != Reach::SharedOnly {
            sources.push(Source::private(&self.principal));
        }
        if reach == Reach::PrivateOnly {
            return sources;
        }

        let joined = self.joined().await;
        for space in joined {
            // Lapsed grants drop the space silently.
            if self
                .spaces
                .authorized_role(&space, &self.principal)
                .await
                .is_some()
            {
                sources.push(Source::space(&space));
            } else {
                debug!(space = %space, "skipping joined space without a valid grant");
            }
        }
        sources
    }

    #[instrument(skip_all, fields(principal = %self.principal, reach = ?reach, limit = limit))]
    async fn retrieve_from(
        &self,
        ctx: &RequestContext,
        query: &str,
        limit: usize,
        reach: Reach,
    ) -> MemoryResult<Vec<MemoryRecord>> {
        ctx.ensure_active()?;
        let limit = if limit == 0 { DEFAULT_RETRIEVE_LIMIT } else { limit };
        METRICS.inc_retrievals();

        let sources = self.sources(reach).await;
        if sources.is_empty() {
            obs::emit_retrieve_finished(&self.principal, 0, 0, 0);
            return Ok(Vec::new());
        }

        // Embed once; a failure here fails every source that needs the engine.
        let query_vector: Result<Option<Arc<Vec<f32>>>, String> = match &self.engine {
            Some(engine) => match ctx.run(engine.embed(query)).await {
                Ok(v) => Ok(Some(Arc::new(v))),
                Err(e @ MemoryError::Cancelled(_)) => return Err(e),
                Err(e) => Err(e.to_string()),
            },
            None => Ok(None),
        };

        let mut tasks = Vec::with_capacity(sources.len());
        for source in sources {
            let buffers = Arc::clone(&self.buffers);
            let engine = self.engine.clone();
            let ctx = ctx.child();
            let query = query.to_string();
            let query_vector = query_vector.clone();
            let label = source.label.clone();

            let task = tokio::spawn(async move {
                query_source(&buffers, engine, &ctx, &source, &query, query_vector, limit).await
            });
            tasks.push((label, task));
        }

        let total = tasks.len();
        let mut collected = Vec::new();
        let mut failures = Vec::new();
        for (label, task) in tasks {
            let outcome = match task.await {
                Ok(result) => result,
                Err(join_err) => Err(MemoryError::Upstream(format!(
                    "source task aborted: {join_err}"
                ))),
            };
            match outcome {
                Ok(records) => collected.extend(records),
                Err(e @ MemoryError::Cancelled(_)) => return Err(e),
                Err(e) => {
                    METRICS.inc_source_failures();
                    obs::emit_retrieve_source_failed(&self.principal, &label, &e);
                    failures.push(SourceFailure {
                        source: label,
                        message: e.to_string(),
                    });
                }
            }
        }

        if failures.len() == total {
            obs::emit_retrieve_finished(&self.principal, total, failures.len(), 0);
            return Err(MemoryError::AllSourcesFailed { failures });
        }

        let merged = retrieval::merge(collected, limit);
        obs::emit_retrieve_finished(&self.principal, total, failures.len(), merged.len());
        Ok(merged)
    }
}

/// Short-term hits from the source's buffer plus long-term hits from the
/// engine. Any engine failure fails the whole source.
async fn query_source(
    buffers: &BufferRegistry,
    engine: Option<Arc<dyn RetrievalEngine>>,
    ctx: &RequestContext,
    source: &Source,
    query: &str,
    query_vector: Result<Option<Arc<Vec<f32>>>, String>,
    limit: usize,
) -> MemoryResult<Vec<MemoryRecord>> {
    ctx.ensure_active()?;
    let query_vector = query_vector.map_err(MemoryError::Upstream)?;

    let messages = buffers.snapshot(&source.key).await;
    let mut records = retrieval::score_messages(
        messages,
        query,
        query_vector.as_deref().map(Vec::as_slice),
        engine.as_deref(),
        &source.label,
    );

    if let (Some(engine), Some(q)) = (engine, query_vector) {
        let hits = ctx.run(engine.query(&source.scope, &q, limit)).await?;
        records.extend(
            hits.into_iter()
                .filter(|hit| hit.score > 0.0)
                .map(|hit| MemoryRecord::from_long_term(hit, &source.label)),
        );
    }
    Ok(records)
}

/// Principal → [`SharedSession`] map. Sessions are created on first use and
/// live until removed.
pub struct SessionHub {
    buffers: Arc<BufferRegistry>,
    spaces: Arc<SpaceRegistry>,
    engine: Option<Arc<dyn RetrievalEngine>>,
    sessions: RwLock<HashMap<String, Arc<SharedSession>>>,
}

impl SessionHub {
    pub fn new(
        buffers: Arc<BufferRegistry>,
        spaces: Arc<SpaceRegistry>,
        engine: Option<Arc<dyn RetrievalEngine>>,
    ) -> Self {
        Self {
            buffers,
            spaces,
            engine,
            sessions: RwLock::new(HashMap::new()),
        }
    }

    /// The principal's session, creating it on first reference.
    pub async fn get_or_create(&self, principal: &str) -> MemoryResult<Arc<SharedSession>> {
        if principal.trim().is_empty() {
            return Err(MemoryError::missing("principal"));
        }
        if let Some(session) = self.sessions.read().await.get(principal) {
            return Ok(Arc::clone(session));
        }

        let mut sessions = self.sessions.write().await;
        let session = sessions.entry(principal.to_string()).or_insert_with(|| {
            debug!(principal = %principal, "creating shared session");
            Arc::new(SharedSession::new(
                principal,
                Arc::clone(&self.buffers),
                Arc::clone(&self.spaces),
                self.engine.clone(),
            ))
        });
        Ok(Arc::clone(session))
    }

    pub async fn get(&self, principal: &str) -> Option<Arc<SharedSession>> {
        self.sessions.read().await.get(principal).cloned()
    }

    /// Drop a principal's view. Returns whether one existed.
    pub async fn remove(&self, principal: &str) -> bool {
        self.sessions.write().await.remove(principal).is_some()
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}
