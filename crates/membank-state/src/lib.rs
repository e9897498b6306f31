//! Membank-State: Retrieval Backends for Memory Bank
//!
//! This crate provides the collaborators that sit behind the coordination
//! core: embedding generation, long-term vector storage and the retrieval
//! engine that ties them together.
//!
//! ## Layer 0 - Data/Persistence
//!
//! Focus: embeddings, persistence and ranked lookup by scope.
//!
//! ## Key Components
//!
//! - `Engine`: `RetrievalEngine` over an `Embedder` and a `VectorStore`
//! - `MemoryVectorStore` / `HashEmbedder`: in-process backends
//! - `SurrealVectorStore`: SurrealDB persistence

pub mod engine;
mod error;
pub mod in_memory;
pub mod storage_traits;
pub mod surreal_store;

pub use engine::{Engine, EngineOptions};
pub use error::StorageError;
pub use in_memory::{HashEmbedder, MemoryVectorStore};
pub use storage_traits::{
    cosine_similarity, ContentDigest, Embedder, EngineMetrics, LongTermRecord, Metadata,
    RetrievalEngine, ScoredRecord, StorageResult, VectorStore,
};
pub use surreal_store::{CloudConfig, SurrealVectorStore};
