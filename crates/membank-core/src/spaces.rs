//! Named shared spaces with role grants that expire.
//!
//! Expiry is evaluated lazily on every read: an expired grant stays in the
//! map until it is overwritten or revoked, but authorization and listing
//! treat it as absent.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::instrument;

use crate::buffer::PRIVATE_SPACE;
use crate::clock::{Clock, SystemClock};
use crate::context::RequestContext;
use crate::error::{MemoryError, MemoryResult};
use crate::obs;

/// TTL applied by [`SpaceRegistry::grant`] when given zero.
pub const DEFAULT_GRANT_TTL: Duration = Duration::from_secs(3600);

/// Access level within a space. Ordered `Reader < Writer < Admin`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SpaceRole {
    Reader,
    Writer,
    Admin,
}

impl SpaceRole {
    /// Case-insensitive. Anything unrecognised becomes `Reader`.
    pub fn parse(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "admin" => Self::Admin,
            "writer" => Self::Writer,
            _ => Self::Reader,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Reader => "reader",
            Self::Writer => "writer",
            Self::Admin => "admin",
        }
    }
}

impl fmt::Display for SpaceRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Grant {
    pub role: SpaceRole,
    pub granted_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl Grant {
    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        now < self.expires_at
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Space {
    pub name: String,
    pub default_ttl: Duration,
    pub grants: HashMap<String, Grant>,
}

fn expiry(now: DateTime<Utc>, ttl: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(ttl)
        .ok()
        .and_then(|d| now.checked_add_signed(d))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

fn validate_space_name(name: &str) -> MemoryResult<()> {
    if name.trim().is_empty() {
        return Err(MemoryError::missing("name"));
    }
    if name == PRIVATE_SPACE {
        return Err(MemoryError::Validation(format!(
            "space name '{PRIVATE_SPACE}' is reserved"
        )));
    }
    Ok(())
}

fn validate_principal(principal: &str) -> MemoryResult<()> {
    if principal.trim().is_empty() {
        return Err(MemoryError::missing("principal"));
    }
    Ok(())
}

/// Catalog of spaces. Writers take the map exclusively, readers share it.
pub struct SpaceRegistry {
    spaces: RwLock<HashMap<String, Space>>,
    default_ttl: Duration,
    clock: Arc<dyn Clock>,
}

impl SpaceRegistry {
    /// `default_ttl` applies when `upsert` is given a zero TTL.
    pub fn new(default_ttl: Duration) -> Self {
        Self::with_clock(default_ttl, Arc::new(SystemClock))
    }

    pub fn with_clock(default_ttl: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            spaces: RwLock::new(HashMap::new()),
            default_ttl,
            clock,
        }
    }

    /// Create or fully replace a space. Every ACL entry expires at
    /// `now + ttl`.
    #[instrument(skip(self, ctx, acl), fields(grants = acl.len()))]
    pub async fn upsert(
        &self,
        ctx: &RequestContext,
        name: &str,
        ttl: Duration,
        acl: &HashMap<String, String>,
    ) -> MemoryResult<()> {
        ctx.ensure_active()?;
        validate_space_name(name)?;
        for principal in acl.keys() {
            validate_principal(principal)?;
        }

        let ttl = if ttl.is_zero() { self.default_ttl } else { ttl };
        let now = self.clock.now();
        let expires_at = expiry(now, ttl);
        let grants = acl
            .iter()
            .map(|(principal, role)| {
                (
                    principal.clone(),
                    Grant {
                        role: SpaceRole::parse(role),
                        granted_at: now,
                        expires_at,
                    },
                )
            })
            .collect::<HashMap<_, _>>();

        let count = grants.len();
        self.spaces.write().await.insert(
            name.to_string(),
            Space {
                name: name.to_string(),
                default_ttl: ttl,
                grants,
            },
        );
        obs::emit_space_upserted(name, count, ttl.as_secs());
        Ok(())
    }

    /// Insert or overwrite one principal's grant with its own expiry.
    #[instrument(skip(self, ctx))]
    pub async fn grant(
        &self,
        ctx: &RequestContext,
        name: &str,
        principal: &str,
        role: SpaceRole,
        ttl: Duration,
    ) -> MemoryResult<()> {
        ctx.ensure_active()?;
        validate_principal(principal)?;
        let ttl = if ttl.is_zero() { DEFAULT_GRANT_TTL } else { ttl };

        let mut spaces = self.spaces.write().await;
        let space = spaces
            .get_mut(name)
            .ok_or_else(|| MemoryError::NotFound(format!("space '{name}'")))?;

        let now = self.clock.now();
        space.grants.insert(
            principal.to_string(),
            Grant {
                role,
                granted_at: now,
                expires_at: expiry(now, ttl),
            },
        );
        obs::emit_space_granted(name, principal, role.as_str(), ttl.as_secs());
        Ok(())
    }

    /// Remove a grant. Unknown spaces and principals are no-ops.
    #[instrument(skip(self, ctx))]
    pub async fn revoke(&self, ctx: &RequestContext, name: &str, principal: &str) -> MemoryResult<()> {
        ctx.ensure_active()?;
        let existed = self
            .spaces
            .write()
            .await
            .get_mut(name)
            .and_then(|space| space.grants.remove(principal))
            .is_some();
        obs::emit_space_revoked(name, principal, existed);
        Ok(())
    }

    /// Sorted names of spaces where `principal` holds an unexpired grant.
    pub async fn list(&self, ctx: &RequestContext, principal: &str) -> MemoryResult<Vec<String>> {
        ctx.ensure_active()?;
        let now = self.clock.now();
        let mut names: Vec<String> = self
            .spaces
            .read()
            .await
            .values()
            .filter(|space| {
                space
                    .grants
                    .get(principal)
                    .is_some_and(|g| g.is_valid_at(now))
            })
            .map(|space| space.name.clone())
            .collect();
        names.sort();
        Ok(names)
    }

    /// The principal's current role, or `None` when the space is unknown or
    /// the grant is absent or expired.
    pub async fn authorized_role(&self, name: &str, principal: &str) -> Option<SpaceRole> {
        let now = self.clock.now();
        self.spaces
            .read()
            .await
            .get(name)
            .and_then(|space| space.grants.get(principal))
            .filter(|g| g.is_valid_at(now))
            .map(|g| g.role)
    }

    pub async fn exists(&self, name: &str) -> bool {
        self.spaces.read().await.contains_key(name)
    }

    /// Copy of a space, including expired grants.
    pub async fn get(&self, name: &str) -> Option<Space> {
        self.spaces.read().await.get(name).cloned()
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }
}
