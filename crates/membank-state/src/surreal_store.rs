//! SurrealDB-backed VectorStore
//!
//! Persists long-term records in a `memories` table keyed by content digest
//! and ranks a scope's records in-process.
//!
//! Supports in-memory (`mem://`), URL and cloud (WebSocket) connections.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use surrealdb::engine::any::Any;
use surrealdb::opt::auth::{Database, Root};
use surrealdb::sql::Datetime as SurrealDatetime;
use surrealdb::Surreal;
use tracing::{debug, info, instrument};

use crate::error::StorageError;
use crate::storage_traits::{
    rank_records, ContentDigest, LongTermRecord, Metadata, ScoredRecord, StorageResult,
    VectorStore,
};

const DEFAULT_NAMESPACE: &str = "membank";
const DEFAULT_DATABASE: &str = "main";
const TABLE: &str = "memories";

/// Configuration for SurrealDB Cloud connection
#[derive(Debug, Clone)]
pub struct CloudConfig {
    /// WebSocket endpoint URL (e.g., "wss://xxx.aws-use1.surrealdb.cloud")
    pub endpoint: String,
    pub username: String,
    pub password: String,
    /// Namespace (default: "membank")
    pub namespace: String,
    /// Database name (default: "main")
    pub database: String,
    /// Whether this is a root user (true) or database user (false)
    pub is_root: bool,
}

impl CloudConfig {
    /// Create from environment variables
    ///
    /// Reads:
    /// - SURREALDB_ENDPOINT (required)
    /// - SURREALDB_USERNAME (required)
    /// - SURREALDB_PASSWORD (required)
    /// - SURREALDB_NAMESPACE (optional, default: "membank")
    /// - SURREALDB_DATABASE (optional, default: "main")
    /// - SURREALDB_ROOT (optional, default: "false")
    pub fn from_env() -> std::result::Result<Self, String> {
        let endpoint =
            std::env::var("SURREALDB_ENDPOINT").map_err(|_| "SURREALDB_ENDPOINT not set")?;
        let username =
            std::env::var("SURREALDB_USERNAME").map_err(|_| "SURREALDB_USERNAME not set")?;
        let password =
            std::env::var("SURREALDB_PASSWORD").map_err(|_| "SURREALDB_PASSWORD not set")?;
        let namespace = std::env::var("SURREALDB_NAMESPACE")
            .unwrap_or_else(|_| DEFAULT_NAMESPACE.to_string());
        let database =
            std::env::var("SURREALDB_DATABASE").unwrap_or_else(|_| DEFAULT_DATABASE.to_string());
        let is_root = std::env::var("SURREALDB_ROOT")
            .map(|v| v.to_lowercase() == "true")
            .unwrap_or(false);

        Ok(Self {
            endpoint,
            username,
            password,
            namespace,
            database,
            is_root,
        })
    }
}

/// Row layout of the `memories` table.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct MemoryRow {
    digest: String,
    scope: String,
    content: String,
    metadata: Metadata,
    embedding: Vec<f32>,
    created_at: SurrealDatetime,
}

impl MemoryRow {
    fn from_record(record: &LongTermRecord) -> Self {
        Self {
            digest: record.id.as_str().to_string(),
            scope: record.scope.clone(),
            content: record.content.clone(),
            metadata: record.metadata.clone(),
            embedding: record.embedding.clone(),
            created_at: SurrealDatetime::from(record.created_at),
        }
    }

    fn into_record(self) -> LongTermRecord {
        LongTermRecord {
            id: ContentDigest::of_scoped(&self.scope, &self.content),
            scope: self.scope,
            content: self.content,
            metadata: self.metadata,
            embedding: self.embedding,
            created_at: DateTime::<Utc>::from(self.created_at),
        }
    }
}

/// SurrealDB-backed implementation of [`VectorStore`].
#[derive(Clone)]
pub struct SurrealVectorStore {
    db: Surreal<Any>,
}

impl SurrealVectorStore {
    /// Connect to an in-memory instance (`mem://`).
    pub async fn in_memory() -> StorageResult<Self> {
        Self::connect("mem://").await
    }

    /// Connect to `url` using the default namespace/database.
    #[instrument]
    pub async fn connect(url: &str) -> StorageResult<Self> {
        let db = surrealdb::engine::any::connect(url)
            .await
            .map_err(|e| StorageError::Connection(format!("Failed to connect to {url}: {e}")))?;

        db.use_ns(DEFAULT_NAMESPACE)
            .use_db(DEFAULT_DATABASE)
            .await
            .map_err(|e| StorageError::Connection(e.to_string()))?;

        let store = Self { db };
        store.init_schema().await?;
        info!("SurrealVectorStore connected ({})", url);
        Ok(store)
    }

    /// Connect to SurrealDB Cloud.
    #[instrument(skip(config), fields(endpoint = %config.endpoint, namespace = %config.namespace))]
    pub async fn connect_cloud(config: CloudConfig) -> StorageResult<Self> {
        let db = surrealdb::engine::any::connect(&config.endpoint)
            .await
            .map_err(|e| {
                StorageError::Connection(format!("Failed to connect to {}: {}", config.endpoint, e))
            })?;

        if config.is_root {
            db.signin(Root {
                username: &config.username,
                password: &config.password,
            })
            .await
            .map_err(|e| StorageError::Connection(format!("Root auth failed: {e}")))?;
        } else {
            db.signin(Database {
                namespace: &config.namespace,
                database: &config.database,
                username: &config.username,
                password: &config.password,
            })
            .await
            .map_err(|e| StorageError::Connection(format!("DB auth failed: {e}")))?;
        }

        db.use_ns(&config.namespace)
            .use_db(&config.database)
            .await
            .map_err(|e| StorageError::Connection(e.to_string()))?;

        let store = Self { db };
        store.init_schema().await?;
        info!("SurrealVectorStore connected (cloud)");
        Ok(store)
    }

    /// Connect using environment variables, falling back to `fallback_url`.
    ///
    /// If SURREALDB_ENDPOINT is set, connects to cloud.
    /// If SURREALDB_URL is set, connects to that URL.
    /// Otherwise connects to `fallback_url` (or `mem://` when `None`).
    pub async fn from_env(fallback_url: Option<&str>) -> StorageResult<Self> {
        if let Ok(config) = CloudConfig::from_env() {
            return Self::connect_cloud(config).await;
        }
        if let Ok(url) = std::env::var("SURREALDB_URL") {
            return Self::connect(&url).await;
        }
        Self::connect(fallback_url.unwrap_or("mem://")).await
    }

    async fn init_schema(&self) -> StorageResult<()> {
        debug!("Initializing memories table");

        let sql = r#"
            DEFINE TABLE IF NOT EXISTS memories SCHEMALESS;
            DEFINE INDEX IF NOT EXISTS idx_memory_scope ON TABLE memories COLUMNS scope;
            DEFINE INDEX IF NOT EXISTS idx_memory_digest ON TABLE memories COLUMNS digest UNIQUE;
        "#;

        self.db
            .query(sql)
            .await
            .and_then(|response| response.check())
            .map_err(|e| StorageError::Backend(format!("schema setup failed: {e}")))?;
        Ok(())
    }
}

#[async_trait]
impl VectorStore for SurrealVectorStore {
    #[instrument(skip(self, record), fields(scope = %record.scope, id = %record.id.short()))]
    async fn put(&self, record: LongTermRecord) -> StorageResult<LongTermRecord> {
        let row = MemoryRow::from_record(&record);

        let _stored: Option<MemoryRow> = self
            .db
            .upsert((TABLE, row.digest.clone()))
            .content(row)
            .await?;

        Ok(record)
    }

    #[instrument(skip(self, query), fields(scope = %scope, limit = limit))]
    async fn search(
        &self,
        scope: &str,
        query: &[f32],
        limit: usize,
    ) -> StorageResult<Vec<ScoredRecord>> {
        let scope_owned = scope.to_string();

        let mut result = self
            .db
            .query("SELECT digest, scope, content, metadata, embedding, created_at FROM memories WHERE scope = $scope")
            .bind(("scope", scope_owned))
            .await?;

        let rows: Vec<MemoryRow> = result.take(0)?;
        debug!(candidates = rows.len(), "ranking scope records");
        Ok(rank_records(
            rows.into_iter().map(MemoryRow::into_record),
            query,
            limit,
        ))
    }

    fn kind(&self) -> &'static str {
        "surrealdb"
    }
}
