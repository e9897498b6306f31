//! Memory Bank Core Library
//!
//! Short-term and shared memory coordination for multi-agent assistants:
//! bounded per-session buffers, named spaces with expiring role grants, and
//! merged retrieval across a principal's private session and the spaces it
//! has joined.

pub mod bank;
pub mod buffer;
pub mod clock;
pub mod config;
pub mod context;
pub mod error;
pub mod message;
pub mod metrics;
pub mod obs;
pub mod retrieval;
pub mod session_file;
pub mod shared;
pub mod spaces;
pub mod telemetry;
pub mod tools;

pub use bank::{ChainReport, FlushReport, Health, MemoryBank, SERVER_NAME};
pub use buffer::{BufferKey, BufferRegistry, RingBuffer, PRIVATE_SPACE, SHARED_SESSION};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{Settings, StoreKind};
pub use context::RequestContext;
pub use error::{MemoryError, MemoryResult, SourceFailure};
pub use message::{Message, Role};
pub use retrieval::{
    keyword_score, MemoryRecord, Origin, AGENT_MODE_PROMPT, DEFAULT_RETRIEVE_LIMIT,
};
pub use session_file::{new_session_id, SessionFile};
pub use shared::{SessionHub, SharedSession};
pub use spaces::{Grant, Space, SpaceRegistry, SpaceRole, DEFAULT_GRANT_TTL};
pub use tools::{ToolRequest, ToolRouter, TOOL_NAMES};

pub use membank_state::Metadata;

pub use metrics::METRICS;
pub use obs::principal_span;
pub use telemetry::init_tracing;

/// Memory Bank version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
