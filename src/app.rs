use std::collections::BTreeMap;
use std::sync::Arc;

use sqlx::PgPool;

use crate::schema::{introspect, RegistryError, ResourceDescriptor, TableMeta};
use crate::services::{IdentityProvider, ResourceService, SessionCache};

/// Immutable application context: the resource registry, the pool, and the
/// session-scoped permission cache. Built once at startup and handed by
/// reference to every request; there is no ambient global registry.
#[derive(Clone)]
pub struct App {
    inner: Arc<AppInner>,
}

struct AppInner {
    scope: String,
    pool: PgPool,
    resources: BTreeMap<String, Arc<ResourceDescriptor>>,
    sessions: SessionCache,
}

pub struct AppBuilder {
    scope: String,
    pool: PgPool,
    provider: Arc<dyn IdentityProvider>,
    resources: BTreeMap<String, Arc<ResourceDescriptor>>,
}

impl AppBuilder {
    pub fn new(
        scope: impl Into<String>,
        pool: PgPool,
        provider: Arc<dyn IdentityProvider>,
    ) -> Self {
        Self { scope: scope.into(), pool, provider, resources: BTreeMap::new() }
    }

    /// Register a resource from prepared metadata. Descriptor derivation
    /// fails fast here, at setup time.
    pub fn register(mut self, meta: &TableMeta) -> Result<Self, RegistryError> {
        let descriptor = ResourceDescriptor::derive(meta)?;
        if self.resources.contains_key(&descriptor.name) {
            return Err(RegistryError::Duplicate(descriptor.name));
        }
        tracing::info!(
            resource = %descriptor.name,
            fields = descriptor.fields.len(),
            fingerprint = %descriptor.fingerprint,
            "registered resource"
        );
        self.resources.insert(descriptor.name.clone(), Arc::new(descriptor));
        Ok(self)
    }

    /// Introspect a live table and register it.
    pub async fn register_table(self, table: &str) -> Result<Self, RegistryError> {
        let meta = introspect::load_table(&self.pool, table).await?;
        self.register(&meta)
    }

    pub fn build(self) -> App {
        let sessions = SessionCache::new(self.scope.clone(), self.provider);
        App {
            inner: Arc::new(AppInner {
                scope: self.scope,
                pool: self.pool,
                resources: self.resources,
                sessions,
            }),
        }
    }
}

impl App {
    pub fn scope(&self) -> &str {
        &self.inner.scope
    }

    pub fn pool(&self) -> &PgPool {
        &self.inner.pool
    }

    pub fn resource(&self, name: &str) -> Option<Arc<ResourceDescriptor>> {
        self.inner.resources.get(name).cloned()
    }

    pub fn resource_names(&self) -> Vec<&str> {
        self.inner.resources.keys().map(|k| k.as_str()).collect()
    }

    pub fn service(&self, name: &str) -> Option<ResourceService> {
        self.resource(name)
            .map(|descriptor| ResourceService::new(descriptor, self.inner.pool.clone()))
    }

    pub fn sessions(&self) -> &SessionCache {
        &self.inner.sessions
    }
}
