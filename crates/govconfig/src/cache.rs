//! `ConfigCache` — C1's public surface: `GetConfig`, `Invalidate`,
//! `InvalidateAll`, `Upsert` (spec §4.1).
//!
//! Snapshots are handed out as `Arc<ConfigSnapshot>`. `Invalidate`
//! replaces the map entry rather than mutating the snapshot a reader
//! already holds, so in-flight readers never observe a torn update
//! (spec §9) — the same copy-on-update discipline
//! `packages/gate/src/policy.rs` uses for its policy set.

use crate::snapshot::ConfigSnapshot;
use crate::store::ConfigStore;
use crate::validate::validate;
use agentkern_govcore::{CoreResult, TenantId};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, warn};

/// Front-end cache over an injected [`ConfigStore`]. Tenants with no
/// stored config, or whose store lookup fails, fall back to
/// [`ConfigSnapshot::default`] rather than blocking the caller — a
/// governance default is safer than a stalled decision path.
pub struct ConfigCache {
    store: Arc<dyn ConfigStore>,
    cached: RwLock<HashMap<TenantId, Arc<ConfigSnapshot>>>,
}

impl ConfigCache {
    pub fn new(store: Arc<dyn ConfigStore>) -> Self {
        Self {
            store,
            cached: RwLock::new(HashMap::new()),
        }
    }

    /// Returns the tenant's config, loading and caching it from the
    /// store on first access. Falls back to defaults if the tenant has
    /// never configured anything, or if the store is unreachable.
    pub async fn get_config(&self, tenant_id: &TenantId) -> Arc<ConfigSnapshot> {
        if let Some(hit) = self.cached.read().await.get(tenant_id) {
            return hit.clone();
        }

        let resolved = match self.store.load(tenant_id).await {
            Ok(Some(snapshot)) => Arc::new(snapshot),
            Ok(None) => {
                debug!(%tenant_id, "no stored config, using defaults");
                Arc::new(ConfigSnapshot::default())
            }
            Err(err) => {
                warn!(%tenant_id, %err, "config store unreachable, falling back to defaults");
                Arc::new(ConfigSnapshot::default())
            }
        };

        self.cached
            .write()
            .await
            .insert(tenant_id.clone(), resolved.clone());
        resolved
    }

    /// Validates and persists `snapshot`, then publishes it to readers.
    pub async fn upsert(&self, tenant_id: &TenantId, snapshot: ConfigSnapshot) -> CoreResult<()> {
        validate(&snapshot)?;
        self.store.save(tenant_id, &snapshot).await?;
        self.cached
            .write()
            .await
            .insert(tenant_id.clone(), Arc::new(snapshot));
        Ok(())
    }

    /// Drops the cached entry for one tenant; the next `get_config`
    /// reloads from the store.
    pub async fn invalidate(&self, tenant_id: &TenantId) {
        self.cached.write().await.remove(tenant_id);
    }

    /// Drops every cached entry.
    pub async fn invalidate_all(&self) {
        self.cached.write().await.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryConfigStore;

    fn cache() -> ConfigCache {
        ConfigCache::new(Arc::new(InMemoryConfigStore::new()))
    }

    #[tokio::test]
    async fn unconfigured_tenant_gets_defaults() {
        let cache = cache();
        let tenant = TenantId::from("acme");
        let cfg = cache.get_config(&tenant).await;
        assert_eq!(*cfg, ConfigSnapshot::default());
    }

    #[tokio::test]
    async fn upsert_rejects_invalid_snapshot() {
        let cache = cache();
        let tenant = TenantId::from("acme");
        let mut bad = ConfigSnapshot::default();
        bad.jury_weights.audit = 0.0;
        assert!(cache.upsert(&tenant, bad).await.is_err());
    }

    #[tokio::test]
    async fn upsert_then_get_returns_the_new_snapshot() {
        let cache = cache();
        let tenant = TenantId::from("acme");
        let mut updated = ConfigSnapshot::default();
        updated.jury_trust_threshold = 0.9;
        cache.upsert(&tenant, updated.clone()).await.unwrap();
        assert_eq!(*cache.get_config(&tenant).await, updated);
    }

    #[tokio::test]
    async fn invalidate_forces_reload_from_store() {
        let store = Arc::new(InMemoryConfigStore::new());
        let cache = ConfigCache::new(store.clone());
        let tenant = TenantId::from("acme");

        let _ = cache.get_config(&tenant).await;

        let mut updated = ConfigSnapshot::default();
        updated.jury_trust_threshold = 0.42;
        store.save(&tenant, &updated).await.unwrap();

        assert_eq!(*cache.get_config(&tenant).await, ConfigSnapshot::default());
        cache.invalidate(&tenant).await;
        assert_eq!(*cache.get_config(&tenant).await, updated);
    }

    #[tokio::test]
    async fn invalidate_all_clears_every_tenant() {
        let cache = cache();
        let a = TenantId::from("a");
        let b = TenantId::from("b");
        let _ = cache.get_config(&a).await;
        let _ = cache.get_config(&b).await;
        cache.invalidate_all().await;
        assert!(cache.cached.read().await.is_empty());
    }
}
