//! `ConfigStore` — the injected backend a `ConfigCache` fronts. Mirrors
//! the store/cache split `packages/arbiter/src/locks.rs` and
//! `audit.rs` use for their own in-memory-backed, trait-fronted state.

use crate::snapshot::ConfigSnapshot;
use agentkern_govcore::{CoreResult, TenantId};
use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;

/// Durable (or remote) source of tenant configs. A real implementation
/// would be backed by SQLite, Spanner, or a cloud K/V store per the
/// `GOVERNANCE_CONFIG_STORE_URL` binding; this crate only depends on
/// the trait.
#[async_trait]
pub trait ConfigStore: Send + Sync {
    async fn load(&self, tenant_id: &TenantId) -> CoreResult<Option<ConfigSnapshot>>;
    async fn save(&self, tenant_id: &TenantId, snapshot: &ConfigSnapshot) -> CoreResult<()>;
}

/// Reference implementation used by tests and by the `probe` binary
/// when `REPUTATION_BACKEND=inmem`.
#[derive(Debug, Default)]
pub struct InMemoryConfigStore {
    entries: RwLock<HashMap<TenantId, ConfigSnapshot>>,
}

impl InMemoryConfigStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ConfigStore for InMemoryConfigStore {
    async fn load(&self, tenant_id: &TenantId) -> CoreResult<Option<ConfigSnapshot>> {
        Ok(self.entries.read().await.get(tenant_id).cloned())
    }

    async fn save(&self, tenant_id: &TenantId, snapshot: &ConfigSnapshot) -> CoreResult<()> {
        self.entries
            .write()
            .await
            .insert(tenant_id.clone(), snapshot.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn round_trips_a_saved_snapshot() {
        let store = InMemoryConfigStore::new();
        let tenant = TenantId::from("acme");
        assert!(store.load(&tenant).await.unwrap().is_none());

        let cfg = ConfigSnapshot::default();
        store.save(&tenant, &cfg).await.unwrap();
        assert_eq!(store.load(&tenant).await.unwrap(), Some(cfg));
    }
}
