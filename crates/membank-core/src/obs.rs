//! Structured lifecycle events for spaces, shared sessions and buffers.
//!
//! Every event carries an `event` field so log pipelines can filter on it.

use tracing::{info, warn};

/// Span tagging everything under it with the acting principal.
///
/// ```ignore
/// fut.instrument(principal_span("alice")).await
/// ```
pub fn principal_span(principal: &str) -> tracing::Span {
    tracing::info_span!("membank.principal", principal = %principal)
}

pub fn emit_space_upserted(space: &str, grants: usize, ttl_secs: u64) {
    info!(event = "space.upserted", space = %space, grants = grants, ttl_secs = ttl_secs);
}

pub fn emit_space_granted(space: &str, principal: &str, role: &str, ttl_secs: u64) {
    info!(
        event = "space.granted",
        space = %space,
        principal = %principal,
        role = %role,
        ttl_secs = ttl_secs,
    );
}

/// `existed` is false when the revoke was a no-op.
pub fn emit_space_revoked(space: &str, principal: &str, existed: bool) {
    info!(event = "space.revoked", space = %space, principal = %principal, existed = existed);
}

pub fn emit_shared_joined(principal: &str, space: &str) {
    info!(event = "shared.joined", principal = %principal, space = %space);
}

pub fn emit_shared_left(principal: &str, space: &str, was_joined: bool) {
    info!(
        event = "shared.left",
        principal = %principal,
        space = %space,
        was_joined = was_joined,
    );
}

pub fn emit_permission_denied(principal: &str, space: &str, needed: &str) {
    warn!(
        event = "permission.denied",
        principal = %principal,
        space = %space,
        needed = %needed,
    );
}

pub fn emit_buffer_appended(session: &str, space: &str, seq: u64) {
    tracing::debug!(event = "buffer.appended", session = %session, space = %space, seq = seq);
}

pub fn emit_retrieve_finished(principal: &str, sources: usize, failed: usize, returned: usize) {
    info!(
        event = "retrieve.finished",
        principal = %principal,
        sources = sources,
        failed = failed,
        returned = returned,
    );
}

pub fn emit_retrieve_source_failed(principal: &str, source: &str, error: &dyn std::fmt::Display) {
    warn!(
        event = "retrieve.source_failed",
        principal = %principal,
        source = %source,
        error = %error,
    );
}

pub fn emit_buffer_flushed(session: &str, space: &str, stored: usize) {
    info!(event = "buffer.flushed", session = %session, space = %space, stored = stored);
}
