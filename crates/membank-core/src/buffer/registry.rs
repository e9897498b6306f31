//! Lazily-populated map of ring buffers.

use std::collections::HashMap;
use std::sync::Arc;

use membank_state::Metadata;
use tokio::sync::{Mutex, RwLock};
use tracing::instrument;

use super::{BufferKey, RingBuffer, SHARED_SESSION};
use crate::context::RequestContext;
use crate::error::{MemoryError, MemoryResult};
use crate::message::{Message, Role};
use crate::metrics::METRICS;
use crate::obs;

type Slot = Arc<Mutex<RingBuffer>>;

/// Concurrency-safe (session, space) → [`RingBuffer`] map.
///
/// The map lock is held only to find or create a buffer; each buffer has its
/// own lock, so keys never contend with each other.
pub struct BufferRegistry {
    capacity: usize,
    buffers: RwLock<HashMap<BufferKey, Slot>>,
}

impl BufferRegistry {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            buffers: RwLock::new(HashMap::new()),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    fn validate(session: &str, space: &str) -> MemoryResult<BufferKey> {
        if session.trim().is_empty() {
            return Err(MemoryError::missing("session"));
        }
        if space.trim().is_empty() {
            return Err(MemoryError::missing("space"));
        }
        if session == SHARED_SESSION {
            return Err(MemoryError::Validation(format!(
                "session '{SHARED_SESSION}' is reserved for space buffers"
            )));
        }
        Ok(BufferKey::new(session, space))
    }

    async fn existing(&self, key: &BufferKey) -> Option<Slot> {
        self.buffers.read().await.get(key).cloned()
    }

    async fn get_or_create(&self, key: BufferKey) -> Slot {
        if let Some(slot) = self.existing(&key).await {
            return slot;
        }
        let mut buffers = self.buffers.write().await;
        buffers
            .entry(key)
            .or_insert_with(|| Arc::new(Mutex::new(RingBuffer::new(self.capacity))))
            .clone()
    }

    /// Append a new message stamped with the current UTC time.
    pub async fn append(
        &self,
        ctx: &RequestContext,
        session: &str,
        space: &str,
        role: Role,
        content: &str,
        metadata: Metadata,
    ) -> MemoryResult<Message> {
        self.append_message(ctx, session, space, Message::new(role, content, metadata))
            .await
    }

    /// Append a pre-built message (for example one carrying an embedding).
    pub async fn append_message(
        &self,
        ctx: &RequestContext,
        session: &str,
        space: &str,
        message: Message,
    ) -> MemoryResult<Message> {
        ctx.ensure_active()?;
        let key = Self::validate(session, space)?;
        self.push(key, message).await
    }

    /// Append to a space's buffer. Callers authorize the write first.
    pub(crate) async fn append_shared(
        &self,
        ctx: &RequestContext,
        space: &str,
        message: Message,
    ) -> MemoryResult<Message> {
        ctx.ensure_active()?;
        if space.trim().is_empty() {
            return Err(MemoryError::missing("space"));
        }
        self.push(BufferKey::shared(space), message).await
    }

    #[instrument(skip_all, fields(session = %key.session, space = %key.space))]
    async fn push(&self, key: BufferKey, message: Message) -> MemoryResult<Message> {
        let slot = self.get_or_create(key.clone()).await;
        let stored = slot.lock().await.append(message);

        METRICS.inc_appends();
        obs::emit_buffer_appended(&key.session, &key.space, stored.seq);
        Ok(stored)
    }

    /// Newest-first; empty for a key that was never written.
    pub async fn recent(
        &self,
        ctx: &RequestContext,
        session: &str,
        space: &str,
        limit: usize,
    ) -> MemoryResult<Vec<Message>> {
        ctx.ensure_active()?;
        let key = Self::validate(session, space)?;
        match self.existing(&key).await {
            Some(slot) => Ok(slot.lock().await.recent(limit)),
            None => Ok(Vec::new()),
        }
    }

    pub async fn search(
        &self,
        ctx: &RequestContext,
        session: &str,
        space: &str,
        query: &str,
        limit: usize,
    ) -> MemoryResult<Vec<Message>> {
        ctx.ensure_active()?;
        let key = Self::validate(session, space)?;
        match self.existing(&key).await {
            Some(slot) => Ok(slot.lock().await.search(query, limit)),
            None => Ok(Vec::new()),
        }
    }

    /// Everything currently stored under `key`, newest first.
    pub(crate) async fn snapshot(&self, key: &BufferKey) -> Vec<Message> {
        match self.existing(key).await {
            Some(slot) => slot.lock().await.recent(0),
            None => Vec::new(),
        }
    }

    /// Messages under `key` not yet promoted to long-term storage.
    pub async fn pending_flush(&self, key: &BufferKey) -> Vec<Message> {
        match self.existing(key).await {
            Some(slot) => slot.lock().await.pending_flush(),
            None => Vec::new(),
        }
    }

    pub async fn mark_flushed(&self, key: &BufferKey, through_seq: u64) {
        if let Some(slot) = self.existing(key).await {
            slot.lock().await.mark_flushed(through_seq);
        }
    }

    /// Keys belonging to `session`, sorted.
    pub async fn keys_for_session(&self, session: &str) -> Vec<BufferKey> {
        let mut keys: Vec<BufferKey> = self
            .buffers
            .read()
            .await
            .keys()
            .filter(|k| k.session == session)
            .cloned()
            .collect();
        keys.sort();
        keys
    }

    pub async fn len(&self) -> usize {
        self.buffers.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}
