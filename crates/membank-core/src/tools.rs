//! Tool-style operation surface.
//!
//! Every tool takes a JSON object of arguments and answers with either
//! `{"ok": true, ...}` or `{"ok": false, "error": {"kind", "message"}}`.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use membank_state::Metadata;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tracing::{debug, instrument, Instrument};

use crate::bank::MemoryBank;
use crate::context::RequestContext;
use crate::error::{MemoryError, MemoryResult};
use crate::message::Role;
use crate::obs;
use crate::retrieval::{render_prompt, AGENT_MODE_PROMPT, DEFAULT_RETRIEVE_LIMIT};
use crate::session_file::{new_session_id, SessionFile};
use crate::spaces::SpaceRole;

const DEFAULT_RECENT_LIMIT: usize = 20;
const DEFAULT_SEARCH_LIMIT: usize = 10;
const DEFAULT_CONTEXT_LIMIT: usize = 3;
const DEFAULT_PROMPT_LIMIT: usize = 5;
const DEFAULT_QUERY_LIMIT: usize = 10;
const DEFAULT_CHAIN_LIMIT: usize = 5;
const DEFAULT_GRANT_TTL_SECS: u64 = 3600;

/// Every tool name the router answers to.
pub const TOOL_NAMES: &[&str] = &[
    "store",
    "add_short",
    "recent",
    "search",
    "health",
    "health.ping",
    "embed",
    "initialize",
    "get_or_create_session",
    "store_long",
    "flush",
    "memory.retrieve_context",
    "prompt_with_memories",
    "agent_mode.set_prompt",
    "memory.query",
    "chain_prompt",
    "engine.metrics",
    "spaces.upsert",
    "spaces.grant",
    "spaces.revoke",
    "spaces.list",
    "shared.join",
    "shared.leave",
    "shared.add_short_to",
    "shared.retrieve",
];

/// One line of the `serve` protocol.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolRequest {
    pub tool: String,
    #[serde(default)]
    pub args: Value,
}

/// Dispatches named tools onto a [`MemoryBank`].
pub struct ToolRouter {
    bank: Arc<MemoryBank>,
    session_file: Option<SessionFile>,
}

impl ToolRouter {
    pub fn new(bank: Arc<MemoryBank>) -> Self {
        Self {
            bank,
            session_file: None,
        }
    }

    /// Enable the session-id tools, backed by `file`.
    pub fn with_session_file(mut self, file: SessionFile) -> Self {
        self.session_file = Some(file);
        self
    }

    pub fn bank(&self) -> &Arc<MemoryBank> {
        &self.bank
    }

    /// Run a tool and wrap the outcome in the response envelope.
    pub async fn call(&self, ctx: &RequestContext, tool: &str, args: Value) -> Value {
        let span = match args.get("principal").and_then(Value::as_str) {
            Some(principal) => obs::principal_span(principal),
            None => tracing::Span::none(),
        };
        match self.dispatch(ctx, tool, args).instrument(span).await {
            Ok(mut body) => {
                if let Value::Object(map) = &mut body {
                    map.insert("ok".to_string(), Value::Bool(true));
                }
                body
            }
            Err(e) => {
                debug!(tool = %tool, error = %e, "tool call failed");
                error_envelope(&e)
            }
        }
    }

    /// Parse and run one `serve` line.
    pub async fn call_line(&self, ctx: &RequestContext, line: &str) -> Value {
        match serde_json::from_str::<ToolRequest>(line) {
            Ok(req) => self.call(ctx, &req.tool, req.args).await,
            Err(e) => error_envelope(&MemoryError::Validation(format!("invalid request: {e}"))),
        }
    }

    #[instrument(skip(self, ctx, args))]
    async fn dispatch(&self, ctx: &RequestContext, tool: &str, args: Value) -> MemoryResult<Value> {
        ctx.ensure_active()?;
        let args = Args::new(args)?;
        let bank = &self.bank;

        match tool {
            "store" => {
                let role: Role = args.opt_str("role").unwrap_or("user").parse()?;
                let msg = bank
                    .store(
                        ctx,
                        args.str("session")?,
                        args.str("space")?,
                        role,
                        args.str("content")?,
                        args.metadata()?,
                    )
                    .await?;
                Ok(json!({"stored": true, "timestamp": msg.timestamp, "seq": msg.seq}))
            }
            "add_short" => {
                let msg = bank
                    .store(
                        ctx,
                        args.str("session_id")?,
                        crate::buffer::PRIVATE_SPACE,
                        Role::User,
                        args.str("content")?,
                        args.metadata()?,
                    )
                    .await?;
                Ok(json!({"stored": true, "timestamp": msg.timestamp, "seq": msg.seq}))
            }
            "recent" => {
                let limit = args.limit("limit")?.unwrap_or(DEFAULT_RECENT_LIMIT);
                let messages = bank
                    .buffers()
                    .recent(ctx, args.str("session")?, args.str("space")?, limit)
                    .await?;
                Ok(json!({"count": messages.len(), "messages": messages}))
            }
            "search" => {
                let limit = args.limit("limit")?.unwrap_or(DEFAULT_SEARCH_LIMIT);
                let matches = bank
                    .buffers()
                    .search(
                        ctx,
                        args.str("session")?,
                        args.str("space")?,
                        args.str("query")?,
                        limit,
                    )
                    .await?;
                Ok(json!({"count": matches.len(), "matches": matches}))
            }
            "health" | "health.ping" => {
                let mut body = serde_json::to_value(bank.health())?;
                if tool == "health.ping" {
                    body["pong"] = Value::Bool(true);
                }
                Ok(body)
            }
            "embed" => {
                let embedding = bank.embed(ctx, args.str("text")?).await?;
                Ok(json!({"dimension": embedding.len(), "embedding": embedding}))
            }
            "initialize" => {
                let id = new_session_id();
                self.session_file()?.save(&id)?;
                Ok(json!({"session_id": id, "saved": true}))
            }
            "get_or_create_session" => {
                let (id, created) = self.session_file()?.get_or_create()?;
                Ok(json!({"session_id": id, "created": created}))
            }
            "store_long" => {
                let record = bank
                    .store_long(ctx, args.str("session_id")?, args.str("content")?, args.metadata()?)
                    .await?;
                Ok(json!({"id": record.id, "scope": record.scope, "created_at": record.created_at}))
            }
            "flush" => {
                let report = bank
                    .flush(ctx, args.str("session_id")?, args.opt_str("space"))
                    .await?;
                Ok(serde_json::to_value(report)?)
            }
            "memory.retrieve_context" => {
                let session_id = args.str("session_id")?;
                let limit = args.limit("limit")?.filter(|n| *n > 0);
                let records = bank
                    .hub()
                    .get_or_create(session_id)
                    .await?
                    .retrieve_private(ctx, args.str("query")?, limit.unwrap_or(DEFAULT_CONTEXT_LIMIT))
                    .await?;
                Ok(json!({"count": records.len(), "records": records}))
            }
            "prompt_with_memories" => {
                let session_id = match args.opt_str("session_id") {
                    Some(id) => id.to_string(),
                    None => self.session_file()?.load()?.ok_or_else(|| {
                        MemoryError::NotFound(
                            "no session_id given and no saved session; call initialize first"
                                .to_string(),
                        )
                    })?,
                };
                let query = args.str("query")?;
                let limit = args.limit("limit")?.filter(|n| *n > 0);
                let memories = bank
                    .hub()
                    .get_or_create(&session_id)
                    .await?
                    .retrieve_private(ctx, query, limit.unwrap_or(DEFAULT_PROMPT_LIMIT))
                    .await?;
                Ok(json!({
                    "session_id": session_id,
                    "query": query,
                    "memories_found": memories.len(),
                    "augmented_prompt": render_prompt(&memories, query),
                    "memories": memories,
                }))
            }
            "agent_mode.set_prompt" => {
                let session_id = args.str("session_id")?;
                if !args.flag("store") {
                    return Ok(json!({"prompt": AGENT_MODE_PROMPT, "stored": false}));
                }
                let record = bank.store_agent_prompt(ctx, session_id).await?;
                Ok(json!({
                    "status": "stored",
                    "session": session_id,
                    "record": {"id": record.id, "scope": record.scope, "created_at": record.created_at},
                }))
            }
            "memory.query" => {
                let session_id = args.str("session_id")?;
                let query = args.str("query")?;
                let limit = args
                    .limit("limit")?
                    .filter(|n| *n > 0)
                    .unwrap_or(DEFAULT_QUERY_LIMIT);
                let results = bank.query(ctx, session_id, query, limit).await?;
                Ok(json!({
                    "session_id": session_id,
                    "query": query,
                    "limit": limit,
                    "results": results,
                }))
            }
            "chain_prompt" => {
                let limit = args
                    .limit("limit")?
                    .filter(|n| *n > 0)
                    .unwrap_or(DEFAULT_CHAIN_LIMIT);
                let report = bank
                    .chain(
                        ctx,
                        args.str("session_id")?,
                        args.str("content")?,
                        args.str("query")?,
                        limit,
                    )
                    .await?;
                Ok(json!({
                    "status": "completed",
                    "session": report.session,
                    "query": report.query,
                    "embedded": report.embedded,
                    "flushed": report.flushed,
                    "memories_found": report.memories.len(),
                }))
            }
            "engine.metrics" => Ok(json!({
                "engine": bank.engine_metrics(),
                "core": crate::metrics::METRICS.snapshot(),
            })),
            "spaces.upsert" => {
                let ttl = Duration::from_secs(args.u64("ttl_seconds")?.unwrap_or(0));
                bank.spaces()
                    .upsert(ctx, args.str("name")?, ttl, &args.acl()?)
                    .await?;
                Ok(json!({}))
            }
            "spaces.grant" => {
                let ttl = args.u64("ttl_seconds")?.unwrap_or(DEFAULT_GRANT_TTL_SECS);
                bank.spaces()
                    .grant(
                        ctx,
                        args.str("name")?,
                        args.str("principal")?,
                        SpaceRole::parse(args.str("role")?),
                        Duration::from_secs(ttl),
                    )
                    .await?;
                Ok(json!({}))
            }
            "spaces.revoke" => {
                bank.spaces()
                    .revoke(ctx, args.str("name")?, args.str("principal")?)
                    .await?;
                Ok(json!({}))
            }
            "spaces.list" => {
                let spaces = bank.spaces().list(ctx, args.str("principal")?).await?;
                Ok(json!({"spaces": spaces}))
            }
            "shared.join" => {
                let session = bank.hub().get_or_create(args.str("principal")?).await?;
                session.join(ctx, args.str("space")?).await?;
                Ok(json!({}))
            }
            "shared.leave" => {
                let session = bank.hub().get_or_create(args.str("principal")?).await?;
                session.leave(ctx, args.str("space")?).await?;
                Ok(json!({}))
            }
            "shared.add_short_to" => {
                let session = bank.hub().get_or_create(args.str("principal")?).await?;
                let msg = session
                    .add_short_to(ctx, args.str("space")?, args.str("content")?, args.metadata()?)
                    .await?;
                Ok(json!({"timestamp": msg.timestamp, "seq": msg.seq}))
            }
            "shared.retrieve" => {
                let session = bank.hub().get_or_create(args.str("principal")?).await?;
                let query = args.str("query")?;
                let limit = args
                    .limit("limit")?
                    .filter(|n| *n > 0)
                    .unwrap_or(DEFAULT_RETRIEVE_LIMIT);
                let records = if args.flag("only_shared") {
                    session.retrieve_shared(ctx, query, limit).await?
                } else {
                    session.retrieve(ctx, query, limit).await?
                };
                Ok(json!({"count": records.len(), "records": records}))
            }
            other => Err(MemoryError::Validation(format!("unknown tool '{other}'"))),
        }
    }

    fn session_file(&self) -> MemoryResult<&SessionFile> {
        self.session_file
            .as_ref()
            .ok_or_else(|| MemoryError::NotFound("no session file configured".to_string()))
    }
}

fn error_envelope(e: &MemoryError) -> Value {
    json!({"ok": false, "error": {"kind": e.kind(), "message": e.to_string()}})
}

/// Typed access to a tool's argument object.
struct Args(Map<String, Value>);

impl Args {
    fn new(value: Value) -> MemoryResult<Self> {
        match value {
            Value::Object(map) => Ok(Self(map)),
            Value::Null => Ok(Self(Map::new())),
            other => Err(MemoryError::Validation(format!(
                "arguments must be an object, got {other}"
            ))),
        }
    }

    /// Required, non-blank string.
    fn str(&self, key: &str) -> MemoryResult<&str> {
        self.opt_str(key).ok_or_else(|| MemoryError::missing(key))
    }

    /// Absent, null and blank strings all read as `None`.
    fn opt_str(&self, key: &str) -> Option<&str> {
        self.0
            .get(key)
            .and_then(Value::as_str)
            .filter(|s| !s.trim().is_empty())
    }

    /// Accepts a JSON number or a numeric string.
    fn number(&self, key: &str) -> MemoryResult<Option<f64>> {
        match self.0.get(key) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::Number(n)) => Ok(n.as_f64()),
            Some(Value::String(s)) if s.trim().is_empty() => Ok(None),
            Some(Value::String(s)) => s.trim().parse().map(Some).map_err(|_| {
                MemoryError::Validation(format!("'{key}' must be a number, got '{s}'"))
            }),
            Some(other) => Err(MemoryError::Validation(format!(
                "'{key}' must be a number, got {other}"
            ))),
        }
    }

    /// Negative limits read as zero.
    fn limit(&self, key: &str) -> MemoryResult<Option<usize>> {
        Ok(self.number(key)?.map(|n| if n <= 0.0 { 0 } else { n as usize }))
    }

    fn u64(&self, key: &str) -> MemoryResult<Option<u64>> {
        Ok(self.number(key)?.map(|n| if n <= 0.0 { 0 } else { n as u64 }))
    }

    /// `true` or `"true"` (any case).
    fn flag(&self, key: &str) -> bool {
        match self.0.get(key) {
            Some(Value::Bool(b)) => *b,
            Some(Value::String(s)) => s.trim().eq_ignore_ascii_case("true"),
            _ => false,
        }
    }

    /// An object under `key`, a JSON string under `key`, or a JSON string
    /// under `<key>_json`.
    fn object(&self, key: &str) -> MemoryResult<Option<Map<String, Value>>> {
        let json_key = format!("{key}_json");
        let raw = match (self.0.get(key), self.0.get(&json_key)) {
            (Some(Value::Object(map)), _) | (None | Some(Value::Null), Some(Value::Object(map))) => {
                return Ok(Some(map.clone()))
            }
            (Some(Value::String(s)), _) | (None | Some(Value::Null), Some(Value::String(s))) => {
                s.as_str()
            }
            (None | Some(Value::Null), None | Some(Value::Null)) => return Ok(None),
            (Some(other), _) | (_, Some(other)) => {
                return Err(MemoryError::Validation(format!(
                    "'{key}' must be an object, got {other}"
                )))
            }
        };
        if raw.trim().is_empty() {
            return Ok(None);
        }
        match serde_json::from_str::<Value>(raw) {
            Ok(Value::Object(map)) => Ok(Some(map)),
            Ok(other) => Err(MemoryError::Validation(format!(
                "'{key}' must be a JSON object, got {other}"
            ))),
            Err(e) => Err(MemoryError::Validation(format!("invalid {json_key}: {e}"))),
        }
    }

    fn metadata(&self) -> MemoryResult<Metadata> {
        Ok(self.object("metadata")?.unwrap_or_default())
    }

    /// principal → role string. Non-string roles are rendered as JSON and
    /// then parsed leniently like any other unknown role.
    fn acl(&self) -> MemoryResult<HashMap<String, String>> {
        Ok(self
            .object("acl")?
            .unwrap_or_default()
            .into_iter()
            .map(|(principal, role)| {
                let role = match role {
                    Value::String(s) => s,
                    other => other.to_string(),
                };
                (principal, role)
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Settings;

    fn router() -> ToolRouter {
        let settings = Settings {
            short_term_size: 8,
            ..Settings::default()
        };
        ToolRouter::new(Arc::new(MemoryBank::new(settings, None)))
    }

    async fn engine_router() -> ToolRouter {
        let settings = Settings {
            short_term_size: 8,
            embedding_dimension: 64,
            ..Settings::default()
        };
        ToolRouter::new(Arc::new(MemoryBank::from_settings(settings).await.unwrap()))
    }

    async fn call(router: &ToolRouter, tool: &str, args: Value) -> Value {
        router.call(&RequestContext::background(), tool, args).await
    }

    #[tokio::test]
    async fn store_then_recent_round_trip() {
        let r = router();
        let out = call(
            &r,
            "store",
            json!({"session": "s1", "space": "notes", "content": "hello", "metadata_json": "{\"k\":\"v\"}"}),
        )
        .await;
        assert_eq!(out["ok"], true);
        assert_eq!(out["stored"], true);

        let out = call(&r, "recent", json!({"session": "s1", "space": "notes"})).await;
        assert_eq!(out["count"], 1);
        assert_eq!(out["messages"][0]["content"], "hello");
        assert_eq!(out["messages"][0]["metadata"]["k"], "v");
        assert_eq!(out["messages"][0]["role"], "user");
    }

    #[tokio::test]
    async fn missing_field_is_structured_validation_error() {
        let r = router();
        let out = call(&r, "store", json!({"session": "s1", "content": "x"})).await;
        assert_eq!(out["ok"], false);
        assert_eq!(out["error"]["kind"], "validation");
        assert!(out["error"]["message"].as_str().unwrap().contains("space"));
    }

    #[tokio::test]
    async fn unknown_tool_and_bad_args() {
        let r = router();
        let out = call(&r, "teleport", json!({})).await;
        assert_eq!(out["error"]["kind"], "validation");

        let out = call(&r, "recent", json!(["not", "an", "object"])).await;
        assert_eq!(out["error"]["kind"], "validation");

        let out = call(&r, "store", json!({"session": "s", "space": "p", "content": "c", "role": "robot"})).await;
        assert_eq!(out["error"]["kind"], "validation");
    }

    #[tokio::test]
    async fn spaces_flow_through_tools() {
        let r = router();
        let out = call(
            &r,
            "spaces.upsert",
            json!({"name": "team", "ttl_seconds": 3600, "acl_json": "{\"alice\":\"writer\",\"bob\":\"reader\"}"}),
        )
        .await;
        assert_eq!(out["ok"], true, "{out}");

        let out = call(&r, "spaces.list", json!({"principal": "bob"})).await;
        assert_eq!(out["spaces"], json!(["team"]));

        let out = call(
            &r,
            "shared.add_short_to",
            json!({"principal": "bob", "space": "team", "content": "hi"}),
        )
        .await;
        assert_eq!(out["error"]["kind"], "permission");

        let out = call(
            &r,
            "shared.add_short_to",
            json!({"principal": "alice", "space": "team", "content": "deploy friday"}),
        )
        .await;
        assert_eq!(out["ok"], true);

        call(&r, "shared.join", json!({"principal": "bob", "space": "team"})).await;
        let out = call(
            &r,
            "shared.retrieve",
            json!({"principal": "bob", "query": "deploy", "only_shared": "true"}),
        )
        .await;
        assert_eq!(out["count"], 1);
        assert_eq!(out["records"][0]["source"], "team");
    }

    #[tokio::test]
    async fn raw_tools_cannot_reach_space_buffers() {
        let r = router();
        call(
            &r,
            "spaces.upsert",
            json!({"name": "team", "acl": {"bob": "reader"}}),
        )
        .await;

        let out = call(
            &r,
            "store",
            json!({"session": "~shared", "space": "team", "content": "forged deploy note"}),
        )
        .await;
        assert_eq!(out["ok"], false);
        assert_eq!(out["error"]["kind"], "validation");

        for tool in ["recent", "search"] {
            let out = call(
                &r,
                tool,
                json!({"session": "~shared", "space": "team", "query": "deploy"}),
            )
            .await;
            assert_eq!(out["error"]["kind"], "validation", "{tool}");
        }

        call(&r, "shared.join", json!({"principal": "bob", "space": "team"})).await;
        let out = call(
            &r,
            "shared.retrieve",
            json!({"principal": "bob", "query": "deploy", "only_shared": true}),
        )
        .await;
        assert_eq!(out["ok"], true, "{out}");
        assert_eq!(out["count"], 0);
    }

    #[tokio::test]
    async fn grant_on_unknown_space_reports_not_found() {
        let r = router();
        let out = call(
            &r,
            "spaces.grant",
            json!({"name": "ghost", "principal": "bob", "role": "reader"}),
        )
        .await;
        assert_eq!(out["error"]["kind"], "not_found");
    }

    #[tokio::test]
    async fn session_tools_use_the_session_file() {
        let dir = tempfile::tempdir().unwrap();
        let r = router().with_session_file(SessionFile::at(dir.path().join("session_id")));

        let out = call(&r, "get_or_create_session", Value::Null).await;
        assert_eq!(out["created"], true);
        let id = out["session_id"].as_str().unwrap().to_string();

        let out = call(&r, "get_or_create_session", Value::Null).await;
        assert_eq!(out["created"], false);
        assert_eq!(out["session_id"], id.as_str());

        call(&r, "add_short", json!({"session_id": id, "content": "prefers rust"})).await;
        let out = call(&r, "prompt_with_memories", json!({"query": "rust"})).await;
        assert_eq!(out["ok"], true, "{out}");
        assert_eq!(out["memories_found"], 1);
        assert!(out["augmented_prompt"].as_str().unwrap().contains("prefers rust"));
    }

    #[tokio::test]
    async fn agent_mode_prompt_is_returned_or_stored() {
        let r = engine_router().await;
        let out = call(&r, "agent_mode.set_prompt", json!({"session_id": "s1"})).await;
        assert_eq!(out["stored"], false);
        assert_eq!(out["prompt"], AGENT_MODE_PROMPT);

        let out = call(
            &r,
            "agent_mode.set_prompt",
            json!({"session_id": "s1", "store": true}),
        )
        .await;
        assert_eq!(out["ok"], true, "{out}");
        assert_eq!(out["status"], "stored");
        assert_eq!(out["record"]["scope"], "s1");

        let out = call(&r, "agent_mode.set_prompt", json!({"store": true})).await;
        assert_eq!(out["error"]["kind"], "validation");
    }

    #[tokio::test]
    async fn memory_query_defaults_to_ten() {
        let r = engine_router().await;
        for i in 0..12 {
            call(
                &r,
                "add_short",
                json!({"session_id": "s1", "content": format!("release note {i}")}),
            )
            .await;
        }
        let out = call(
            &r,
            "memory.query",
            json!({"session_id": "s1", "query": "release note"}),
        )
        .await;
        assert_eq!(out["ok"], true, "{out}");
        assert_eq!(out["limit"], 10);
        // the buffer holds eight
        assert_eq!(out["results"].as_array().map(Vec::len), Some(8));

        let out = call(
            &r,
            "memory.query",
            json!({"session_id": "s1", "query": "release note", "limit": 3}),
        )
        .await;
        assert_eq!(out["results"].as_array().map(Vec::len), Some(3));
    }

    #[tokio::test]
    async fn chain_prompt_reports_completion() {
        let r = engine_router().await;
        let out = call(
            &r,
            "chain_prompt",
            json!({"session_id": "s1", "content": "prefers terse replies", "query": "terse replies"}),
        )
        .await;
        assert_eq!(out["ok"], true, "{out}");
        assert_eq!(out["status"], "completed");
        assert_eq!(out["embedded"], true);
        assert_eq!(out["flushed"], 1);
        assert_eq!(out["memories_found"], 1);

        let out = call(&router(), "chain_prompt", json!({"session_id": "s1", "content": "x", "query": "x"})).await;
        assert_eq!(out["error"]["kind"], "upstream");
    }

    #[tokio::test]
    async fn session_tools_without_file_are_not_found() {
        let out = call(&router(), "initialize", json!({})).await;
        assert_eq!(out["error"]["kind"], "not_found");
    }

    #[tokio::test]
    async fn call_line_parses_requests() {
        let r = router();
        let ctx = RequestContext::background();
        let out = r.call_line(&ctx, r#"{"tool":"health"}"#).await;
        assert_eq!(out["ok"], true);
        assert_eq!(out["engine_wired"], false);

        let out = r.call_line(&ctx, "garbage").await;
        assert_eq!(out["ok"], false);
    }

    #[test]
    fn every_tool_name_is_unique() {
        let mut names = TOOL_NAMES.to_vec();
        names.sort_unstable();
        names.dedup();
        assert_eq!(names.len(), TOOL_NAMES.len());
    }
}
