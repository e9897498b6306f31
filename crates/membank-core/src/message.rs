//! Buffered interaction messages.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use membank_state::Metadata;
use serde::{Deserialize, Serialize};

use crate::error::MemoryError;

/// Who produced a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Agent,
    System,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Agent => "agent",
            Role::System => "system",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = MemoryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "user" => Ok(Role::User),
            "agent" | "assistant" => Ok(Role::Agent),
            "system" => Ok(Role::System),
            other => Err(MemoryError::Validation(format!(
                "unknown message role '{other}' (expected user, agent or system)"
            ))),
        }
    }
}

/// One buffered message. Never mutated after it is appended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Position in the owning buffer's append order, starting at 1.
    pub seq: u64,
    pub timestamp: DateTime<Utc>,
    pub role: Role,
    pub content: String,
    #[serde(default)]
    pub metadata: Metadata,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    /// Populated only on copies handed out by retrieval.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<f32>,
}

impl Message {
    /// Build a message stamped with the current UTC time.
    ///
    /// Tags are lifted from a `"tags"` array of strings in `metadata`.
    pub fn new(role: Role, content: impl Into<String>, metadata: Metadata) -> Self {
        let tags = metadata
            .get("tags")
            .and_then(|v| v.as_array())
            .map(|items| {
                items
                    .iter()
                    .filter_map(|t| t.as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default();

        Self {
            seq: 0,
            timestamp: Utc::now(),
            role,
            content: content.into(),
            metadata,
            embedding: None,
            tags,
            score: None,
        }
    }

    pub fn with_embedding(mut self, embedding: Option<Vec<f32>>) -> Self {
        self.embedding = embedding;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn role_parse_is_case_insensitive() {
        assert_eq!("USER".parse::<Role>().unwrap(), Role::User);
        assert_eq!(" Agent ".parse::<Role>().unwrap(), Role::Agent);
        assert_eq!("assistant".parse::<Role>().unwrap(), Role::Agent);
        assert_eq!("system".parse::<Role>().unwrap(), Role::System);
    }

    #[test]
    fn unknown_role_is_rejected() {
        let err = "robot".parse::<Role>().unwrap_err();
        assert_eq!(err.kind(), "validation");
    }

    #[test]
    fn tags_come_from_metadata() {
        let meta = json!({"tags": ["deploy", 7, "urgent"], "turn": 2});
        let msg = Message::new(Role::User, "ship it", meta.as_object().cloned().unwrap());
        assert_eq!(msg.tags, vec!["deploy".to_string(), "urgent".to_string()]);
        assert!(msg.score.is_none());
    }

    #[test]
    fn serializes_role_lowercase_and_skips_empty_fields() {
        let msg = Message::new(Role::System, "boot", Metadata::new());
        let v = serde_json::to_value(&msg).unwrap();
        assert_eq!(v["role"], "system");
        assert!(v.get("embedding").is_none());
        assert!(v.get("score").is_none());
    }
}
