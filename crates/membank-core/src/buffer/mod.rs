//! Short-term buffers keyed by (session, space).

mod registry;
mod ring;

pub use registry::BufferRegistry;
pub use ring::RingBuffer;

use serde::{Deserialize, Serialize};

/// Space name denoting a principal's private buffer. Reserved: spaces may
/// not be registered under it.
pub const PRIVATE_SPACE: &str = "private";

/// Session half of the key for buffers owned by a space rather than by any
/// one principal.
pub const SHARED_SESSION: &str = "~shared";

/// Registry key for one ring buffer.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BufferKey {
    pub session: String,
    pub space: String,
}

impl BufferKey {
    pub fn new(session: impl Into<String>, space: impl Into<String>) -> Self {
        Self {
            session: session.into(),
            space: space.into(),
        }
    }

    pub fn private(session: impl Into<String>) -> Self {
        Self::new(session, PRIVATE_SPACE)
    }

    pub fn shared(space: impl Into<String>) -> Self {
        Self::new(SHARED_SESSION, space)
    }

    pub fn is_private(&self) -> bool {
        self.space == PRIVATE_SPACE
    }

    /// Scope under which this buffer's content is stored long-term.
    pub fn long_term_scope(&self) -> String {
        if self.is_private() {
            self.session.clone()
        } else if self.session == SHARED_SESSION {
            space_scope(&self.space)
        } else {
            format!("{}/{}", self.session, self.space)
        }
    }
}

impl std::fmt::Display for BufferKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.session, self.space)
    }
}

/// Long-term scope of a shared space.
pub fn space_scope(space: &str) -> String {
    format!("space:{space}")
}
