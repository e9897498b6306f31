//! Process settings: `<home>/.memory-bank/settings.json` plus environment
//! overrides.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{MemoryError, MemoryResult};

/// Directory under the user's home that holds Memory Bank state.
pub const STATE_DIR: &str = ".memory-bank";
const SETTINGS_FILE: &str = "settings.json";

/// Which long-term store backs the retrieval engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreKind {
    #[default]
    Memory,
    Surreal,
}

impl StoreKind {
    /// Unrecognised names fall back to `Memory`.
    pub fn parse(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "surreal" | "surrealdb" => Self::Surreal,
            _ => Self::Memory,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub memory_store: StoreKind,
    pub surreal_url: Option<String>,
    /// Ring buffer capacity per (session, space).
    pub short_term_size: usize,
    pub default_space_ttl_sec: u64,
    pub embedding_dimension: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            memory_store: StoreKind::Memory,
            surreal_url: None,
            short_term_size: 500_000,
            default_space_ttl_sec: 86_400,
            embedding_dimension: 256,
        }
    }
}

/// `<home>/.memory-bank`, if a home directory can be found.
pub fn state_dir() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(STATE_DIR))
}

impl Settings {
    /// Settings file in the default state directory, then the environment.
    pub fn load() -> MemoryResult<Self> {
        let settings = match state_dir() {
            Some(dir) => Self::from_file(&dir.join(SETTINGS_FILE))?,
            None => Self::default(),
        };
        Ok(settings.with_env())
    }

    /// A missing file yields defaults; malformed JSON is an error.
    pub fn from_file(path: &Path) -> MemoryResult<Self> {
        let raw = match std::fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "no settings file, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(e.into()),
        };
        serde_json::from_str(&raw).map_err(|e| {
            MemoryError::Validation(format!("invalid settings file {}: {e}", path.display()))
        })
    }

    /// Apply environment overrides.
    pub fn with_env(self) -> Self {
        self.with_overrides(|key| std::env::var(key).ok())
    }

    fn with_overrides(mut self, var: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(v) = var("MEMORY_STORE") {
            self.memory_store = StoreKind::parse(&v);
        }
        if let Some(v) = var("SURREALDB_URL").filter(|v| !v.trim().is_empty()) {
            self.surreal_url = Some(v);
        }
        if let Some(n) = var("SHORT_TERM_SIZE").and_then(|v| v.trim().parse().ok()) {
            self.short_term_size = n;
        }
        if let Some(n) = var("DEFAULT_SPACE_TTL_SEC").and_then(|v| v.trim().parse().ok()) {
            self.default_space_ttl_sec = n;
        }
        if let Some(n) = var("EMBEDDING_DIMENSION").and_then(|v| v.trim().parse().ok()) {
            self.embedding_dimension = n;
        }
        self
    }

    pub fn default_space_ttl(&self) -> Duration {
        Duration::from_secs(self.default_space_ttl_sec)
    }
}
