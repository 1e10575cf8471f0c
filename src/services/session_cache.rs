use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::config;
use crate::error::ApiError;
use crate::permission::PermissionSet;

/// Injected identity collaborator: who a credential pair maps to, and which
/// permission strings apply to a principal.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    async fn authenticate(&self, username: &str, password: &str)
        -> anyhow::Result<Option<String>>;

    async fn permissions_for(&self, principal: &str) -> anyhow::Result<Vec<String>>;
}

/// In-memory provider for demos and tests.
#[derive(Default)]
pub struct StaticIdentity {
    users: HashMap<String, (String, Vec<String>)>,
}

impl StaticIdentity {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn user<S: Into<String>>(
        mut self,
        username: impl Into<String>,
        password: impl Into<String>,
        permissions: impl IntoIterator<Item = S>,
    ) -> Self {
        self.users.insert(
            username.into(),
            (password.into(), permissions.into_iter().map(Into::into).collect()),
        );
        self
    }
}

#[async_trait]
impl IdentityProvider for StaticIdentity {
    async fn authenticate(
        &self,
        username: &str,
        password: &str,
    ) -> anyhow::Result<Option<String>> {
        Ok(self
            .users
            .get(username)
            .filter(|(stored, _)| stored == password)
            .map(|_| username.to_string()))
    }

    async fn permissions_for(&self, principal: &str) -> anyhow::Result<Vec<String>> {
        Ok(self.users.get(principal).map(|(_, perms)| perms.clone()).unwrap_or_default())
    }
}

struct Entry {
    permissions: Arc<PermissionSet>,
    expires_at: DateTime<Utc>,
}

/// Per-session cache of resolved permission sets.
///
/// Entries are immutable; a session gets a fresh entry on expiry and loses
/// its entry at logout. The provider is consulted at most once per live
/// entry.
pub struct SessionCache {
    scope: String,
    ttl: Duration,
    provider: Arc<dyn IdentityProvider>,
    entries: RwLock<HashMap<Uuid, Entry>>,
}

impl SessionCache {
    pub fn new(scope: impl Into<String>, provider: Arc<dyn IdentityProvider>) -> Self {
        let ttl_secs = config::CONFIG.security.permission_cache_ttl_secs;
        Self::with_ttl(scope, provider, Duration::seconds(ttl_secs as i64))
    }

    pub fn with_ttl(
        scope: impl Into<String>,
        provider: Arc<dyn IdentityProvider>,
        ttl: Duration,
    ) -> Self {
        Self { scope: scope.into(), ttl, provider, entries: RwLock::new(HashMap::new()) }
    }

    pub fn scope(&self) -> &str {
        &self.scope
    }

    pub fn provider(&self) -> &Arc<dyn IdentityProvider> {
        &self.provider
    }

    /// Resolve the permission set for a session, consulting the provider on
    /// a miss or an expired entry. Malformed dynamically-sourced strings
    /// surface as an authorization failure, not a server fault.
    pub async fn resolve(
        &self,
        session_id: Uuid,
        principal: &str,
    ) -> Result<Arc<PermissionSet>, ApiError> {
        let now = Utc::now();
        {
            let entries = self.entries.read().await;
            if let Some(entry) = entries.get(&session_id) {
                if entry.expires_at > now {
                    return Ok(entry.permissions.clone());
                }
            }
        }

        let strings = self.provider.permissions_for(principal).await.map_err(|e| {
            tracing::error!("permission lookup failed for {}: {}", principal, e);
            ApiError::service_unavailable("permission lookup failed")
        })?;
        let set = PermissionSet::parse(&self.scope, &strings)
            .map_err(|e| ApiError::forbidden(format!("invalid permission grant: {}", e)))?;
        let permissions = Arc::new(set);

        let mut entries = self.entries.write().await;
        entries.insert(
            session_id,
            Entry { permissions: permissions.clone(), expires_at: now + self.ttl },
        );
        Ok(permissions)
    }

    /// Logout contract: the cached set dies with the session.
    pub async fn invalidate(&self, session_id: Uuid) {
        self.entries.write().await.remove(&session_id);
    }

    pub async fn purge_expired(&self) {
        let now = Utc::now();
        self.entries.write().await.retain(|_, entry| entry.expires_at > now);
    }
}
