//! Scoring and merging of retrieval results.

use std::cmp::Ordering;
use std::collections::HashSet;

use chrono::{DateTime, Utc};
use membank_state::{Metadata, RetrievalEngine, ScoredRecord};
use serde::{Deserialize, Serialize};

use crate::buffer::PRIVATE_SPACE;
use crate::message::Message;

/// Limit used when a caller passes zero.
pub const DEFAULT_RETRIEVE_LIMIT: usize = 8;

/// Where a record was found.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Origin {
    ShortTerm,
    LongTerm,
}

/// One retrieval hit. Built fresh per call, never persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryRecord {
    pub content: String,
    pub score: f32,
    pub metadata: Metadata,
    /// `"private"` or the space name.
    pub source: String,
    pub origin: Origin,
    pub created_at: DateTime<Utc>,
}

impl MemoryRecord {
    pub fn is_private(&self) -> bool {
        self.source == PRIVATE_SPACE
    }

    pub(crate) fn from_long_term(hit: ScoredRecord, source: &str) -> Self {
        Self {
            content: hit.record.content,
            score: hit.score,
            metadata: hit.record.metadata,
            source: source.to_string(),
            origin: Origin::LongTerm,
            created_at: hit.record.created_at,
        }
    }
}

/// Fraction of the query's words that occur in `content`, case-insensitive.
pub fn keyword_score(query: &str, content: &str) -> f32 {
    let words: Vec<&str> = query.split_whitespace().collect();
    if words.is_empty() {
        return 0.0;
    }
    let haystack = content.to_lowercase();
    let matched = words
        .iter()
        .filter(|w| haystack.contains(&w.to_lowercase()))
        .count();
    matched as f32 / words.len() as f32
}

/// Score buffered messages against a query.
///
/// Uses engine similarity when both the query and the message carry a
/// vector, keyword overlap otherwise. Non-positive scores are dropped.
pub fn score_messages(
    messages: Vec<Message>,
    query: &str,
    query_vector: Option<&[f32]>,
    engine: Option<&dyn RetrievalEngine>,
    source: &str,
) -> Vec<MemoryRecord> {
    messages
        .into_iter()
        .filter_map(|m| {
            let score = match (engine, query_vector, m.embedding.as_deref()) {
                (Some(engine), Some(q), Some(v)) => engine.similarity(q, v),
                _ => keyword_score(query, &m.content),
            };
            (score > 0.0).then(|| MemoryRecord {
                content: m.content,
                score,
                metadata: m.metadata,
                source: source.to_string(),
                origin: Origin::ShortTerm,
                created_at: m.timestamp,
            })
        })
        .collect()
}

fn merge_order(a: &MemoryRecord, b: &MemoryRecord) -> Ordering {
    b.score
        .partial_cmp(&a.score)
        .unwrap_or(Ordering::Equal)
        .then_with(|| b.is_private().cmp(&a.is_private()))
        .then_with(|| b.created_at.cmp(&a.created_at))
}

/// Identity of the message a record came from. A flushed long-term copy
/// carries its message's timestamp in metadata, so it shares the identity of
/// the buffered original.
fn message_identity(r: &MemoryRecord) -> (String, String, String) {
    let stamp = match (r.origin, r.metadata.get("timestamp").and_then(|v| v.as_str())) {
        (Origin::LongTerm, Some(stamp)) => stamp.to_string(),
        _ => r.created_at.to_rfc3339(),
    };
    (r.source.clone(), r.content.clone(), stamp)
}

/// Order by score descending; ties go to private records, then to the
/// newest. A buffered message and its own flushed copy are kept once.
/// Truncated to `limit`.
pub fn merge(mut records: Vec<MemoryRecord>, limit: usize) -> Vec<MemoryRecord> {
    records.sort_by(merge_order);
    let mut seen = HashSet::new();
    records.retain(|r| seen.insert(message_identity(r)));
    records.truncate(limit);
    records
}

/// System prompt for agents that receive [`render_prompt`] output.
pub const AGENT_MODE_PROMPT: &str = "\
Every request arrives as an augmented prompt holding the user's query, the memory records \
retrieved for it, and their metadata.

Answer the user's query directly. While doing so:

1. Read the memory block before interpreting the request.
2. Let retrieved context shape how you read intent, preferences, past decisions and ongoing tasks.
3. Fold relevant memories into your reasoning and your answer.
4. Respond to the user next; call another tool only when the query explicitly asks for a \
tool-backed action such as searching, saving or modifying content.
5. When memory conflicts with the new request, follow the request and use memory to refine it.
6. Never describe how memories were retrieved or stored.
7. Treat memory as incomplete and infer intent conservatively.
8. Reuse the active session id; never request a new one while one exists.

Treat the memory block as authoritative context for every answer.
";

/// Render memories above a query for prompt augmentation.
pub fn render_prompt(memories: &[MemoryRecord], query: &str) -> String {
    let mut out = String::new();
    if !memories.is_empty() {
        out.push_str("# Relevant Context from Memory\n\n");
        for (i, m) in memories.iter().enumerate() {
            out.push_str(&format!("## Memory {} (Score: {:.3})\n{}\n\n", i + 1, m.score, m.content));
            if !m.metadata.is_empty() {
                let meta = serde_json::to_string_pretty(&m.metadata).unwrap_or_default();
                out.push_str(&format!("Metadata: {meta}\n\n"));
            }
        }
        out.push_str("---\n\n");
    }
    out.push_str("# User Query\n\n");
    out.push_str(query);
    out
}
