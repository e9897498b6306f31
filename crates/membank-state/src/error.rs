//! Error types for membank-state

use thiserror::Error;

/// Errors raised by embedders, vector stores and the retrieval engine.
#[derive(Error, Debug)]
pub enum StorageError {
    /// Backend connection error
    #[error("Database connection failed: {0}")]
    Connection(String),

    /// Backend query or write error
    #[error("Backend operation failed: {0}")]
    Backend(String),

    /// Embedding generation failed
    #[error("Embedding failed: {0}")]
    Embedding(String),

    /// Query vector does not match the store's dimension
    #[error("Embedding dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    /// Serialization error
    #[error("Serialization failed: {0}")]
    Serialization(String),
}

impl From<surrealdb::Error> for StorageError {
    fn from(err: surrealdb::Error) -> Self {
        StorageError::Backend(err.to_string())
    }
}

impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        StorageError::Serialization(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dimension_mismatch_names_both_sizes() {
        let err = StorageError::DimensionMismatch {
            expected: 256,
            actual: 3,
        };
        let msg = err.to_string();
        assert!(msg.contains("256"));
        assert!(msg.contains('3'));
    }

    #[test]
    fn serde_error_converts_to_serialization() {
        let bad = serde_json::from_str::<serde_json::Value>("{not json").unwrap_err();
        let err: StorageError = bad.into();
        assert!(matches!(err, StorageError::Serialization(_)));
    }
}
