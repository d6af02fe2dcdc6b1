//! Claim store trait and agent identity.

use conduit_types::StageKey;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error;

/// Opaque container agent identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AgentId(String);

impl AgentId {
    /// Create an identifier from an existing name.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Create a fresh random identifier (`agent-<8 hex>`).
    #[must_use]
    pub fn generate() -> Self {
        let id = Uuid::new_v4().simple().to_string();
        Self(format!("agent-{}", &id[..8]))
    }

    /// Borrow the inner string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for AgentId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl<S: Into<String>> From<S> for AgentId {
    fn from(value: S) -> Self {
        Self(value.into())
    }
}

/// Ownership registry for deployed stages.
///
/// At most one agent owns a given `(group, index)` at any time. Every
/// agent receiving a deployment request races on [`claim`](Self::claim);
/// exactly one wins. Implementations must be `Send + Sync` for use behind
/// `Arc<dyn ClaimStore>`. Calls may block, so async callers run them on the
/// blocking pool.
pub trait ClaimStore: Send + Sync {
    /// Try to take ownership of `key` for `owner`.
    ///
    /// Returns `true` when `owner` now holds the claim, including when it
    /// already held it. Returns `false` when another agent owns the key.
    ///
    /// # Errors
    ///
    /// Returns [`StateError`](crate::StateError) on storage failure.
    fn claim(&self, key: &StageKey, owner: &AgentId) -> error::Result<bool>;

    /// Drop any claim on `key`. Releasing an unclaimed key is a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`StateError`](crate::StateError) on storage failure.
    fn release(&self, key: &StageKey) -> error::Result<()>;

    /// Current owner of `key`, if claimed.
    ///
    /// # Errors
    ///
    /// Returns [`StateError`](crate::StateError) on storage failure.
    fn owner(&self, key: &StageKey) -> error::Result<Option<AgentId>>;
}
