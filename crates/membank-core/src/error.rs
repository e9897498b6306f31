//! Error taxonomy for the coordination core.

use membank_state::StorageError;

/// A retrieval source that failed while others were being merged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceFailure {
    pub source: String,
    pub message: String,
}

impl std::fmt::Display for SourceFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.source, self.message)
    }
}

/// Errors produced by buffer, space and shared-session operations.
#[derive(Debug, thiserror::Error)]
pub enum MemoryError {
    /// A required field is missing or blank.
    #[error("validation error: {0}")]
    Validation(String),

    /// Grant absent, expired or below the role the action needs.
    #[error("permission denied: {0}")]
    Permission(String),

    #[error("not found: {0}")]
    NotFound(String),

    /// Failure reported by the retrieval engine or a backing store.
    #[error("upstream error: {0}")]
    Upstream(String),

    /// The request context was cancelled or its deadline passed.
    #[error("cancelled: {0}")]
    Cancelled(String),

    /// Every retrieval source failed.
    #[error("all {} retrieval sources failed: {}", .failures.len(), join_failures(.failures))]
    AllSourcesFailed { failures: Vec<SourceFailure> },

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl MemoryError {
    /// Stable machine-readable kind, used by the tool surface.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation",
            Self::Permission(_) => "permission",
            Self::NotFound(_) => "not_found",
            Self::Upstream(_) => "upstream",
            Self::Cancelled(_) => "cancelled",
            Self::AllSourcesFailed { .. } => "upstream",
            Self::Serialization(_) => "validation",
            Self::Io(_) => "io",
        }
    }

    pub(crate) fn missing(field: &str) -> Self {
        Self::Validation(format!("missing required field '{field}'"))
    }
}

impl From<StorageError> for MemoryError {
    fn from(err: StorageError) -> Self {
        MemoryError::Upstream(err.to_string())
    }
}

fn join_failures(failures: &[SourceFailure]) -> String {
    failures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Result type for memory operations.
pub type MemoryResult<T> = std::result::Result<T, MemoryError>;
