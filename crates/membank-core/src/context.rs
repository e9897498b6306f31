//! Per-request cancellation and deadline.
//!
//! Every core operation takes a [`RequestContext`]. In-memory work checks it
//! once up front; calls into the retrieval engine race against it.

use std::future::Future;
use std::time::Duration;

use membank_state::StorageResult;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::error::{MemoryError, MemoryResult};

#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    token: CancellationToken,
    deadline: Option<Instant>,
}

impl RequestContext {
    /// A context that never expires and is never cancelled unless asked.
    pub fn background() -> Self {
        Self::default()
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            token: CancellationToken::new(),
            deadline: Some(Instant::now() + timeout),
        }
    }

    /// Child context; cancelling the parent cancels the child.
    pub fn child(&self) -> Self {
        Self {
            token: self.token.child_token(),
            deadline: self.deadline,
        }
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// Fail fast when the context is already done.
    pub fn ensure_active(&self) -> MemoryResult<()> {
        if self.token.is_cancelled() {
            return Err(MemoryError::Cancelled("request cancelled".to_string()));
        }
        if self.deadline.is_some_and(|d| Instant::now() >= d) {
            return Err(MemoryError::Cancelled("deadline exceeded".to_string()));
        }
        Ok(())
    }

    /// Drive an engine call, aborting it on cancellation or deadline.
    pub async fn run<T, F>(&self, fut: F) -> MemoryResult<T>
    where
        F: Future<Output = StorageResult<T>>,
    {
        self.ensure_active()?;
        let deadline = async {
            match self.deadline {
                Some(d) => tokio::time::sleep_until(d).await,
                None => std::future::pending::<()>().await,
            }
        };

        tokio::select! {
            _ = self.token.cancelled() => {
                Err(MemoryError::Cancelled("request cancelled".to_string()))
            }
            _ = deadline => Err(MemoryError::Cancelled("deadline exceeded".to_string())),
            out = fut => out.map_err(MemoryError::from),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use membank_state::StorageError;

    #[tokio::test]
    async fn cancelled_context_fails_fast() {
        let ctx = RequestContext::background();
        ctx.cancel();
        assert!(matches!(ctx.ensure_active(), Err(MemoryError::Cancelled(_))));
        let out = ctx.run(async { Ok::<_, StorageError>(1) }).await;
        assert!(matches!(out, Err(MemoryError::Cancelled(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_aborts_slow_call() {
        let ctx = RequestContext::with_timeout(Duration::from_millis(50));
        let out = ctx
            .run(async {
                tokio::time::sleep(Duration::from_secs(60)).await;
                Ok::<_, StorageError>(())
            })
            .await;
        match out {
            Err(MemoryError::Cancelled(msg)) => assert!(msg.contains("deadline")),
            other => panic!("expected deadline error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn storage_failures_map_to_upstream() {
        let ctx = RequestContext::background();
        let out = ctx
            .run(async { Err::<(), _>(StorageError::Backend("boom".to_string())) })
            .await;
        assert!(matches!(out, Err(MemoryError::Upstream(m)) if m.contains("boom")));
    }

    #[tokio::test]
    async fn parent_cancel_reaches_child() {
        let parent = RequestContext::background();
        let child = parent.child();
        parent.cancel();
        assert!(matches!(child.ensure_active(), Err(MemoryError::Cancelled(_))));
    }
}
