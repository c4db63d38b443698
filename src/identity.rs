//! Identity lookup for the streaming user
//!
//! The analysis service only needs an opaque, stable user identifier. When no
//! identity system is reachable the session runs as the `"anonymous"` user,
//! which is a valid state rather than an error.

use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{info, warn};

/// Opaque user identifier sent in the `auth` message
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(String);

impl UserId {
    pub const ANONYMOUS: &'static str = "anonymous";

    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn anonymous() -> Self {
        Self(Self::ANONYMOUS.to_string())
    }

    pub fn is_anonymous(&self) -> bool {
        self.0 == Self::ANONYMOUS
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identity/session lookup collaborator
#[async_trait::async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Current user's identifier, or `None` when signed out or unreachable
    async fn current_user(&self) -> anyhow::Result<Option<String>>;
}

/// Identity fixed at startup (from config or the command line)
#[derive(Debug, Clone, Default)]
pub struct StaticIdentity {
    user_id: Option<String>,
}

impl StaticIdentity {
    pub fn new(user_id: Option<String>) -> Self {
        Self { user_id }
    }
}

#[async_trait::async_trait]
impl IdentityProvider for StaticIdentity {
    async fn current_user(&self) -> anyhow::Result<Option<String>> {
        Ok(self.user_id.clone())
    }
}

/// Resolve the user for a new session, falling back to the anonymous sentinel
pub async fn resolve_user(provider: &dyn IdentityProvider) -> UserId {
    match provider.current_user().await {
        Ok(Some(id)) if !id.trim().is_empty() => {
            info!("Resolved user {}", id);
            UserId::new(id)
        }
        Ok(_) => {
            info!("No signed-in user, streaming as {}", UserId::ANONYMOUS);
            UserId::anonymous()
        }
        Err(e) => {
            warn!("Identity lookup failed, streaming as {}: {}", UserId::ANONYMOUS, e);
            UserId::anonymous()
        }
    }
}
