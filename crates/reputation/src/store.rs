//! `ReputationStore` — the injected backend behind `ReputationLedger`,
//! same shape as `agentkern_govconfig::ConfigStore`.

use crate::model::AgentReputation;
use agentkern_govcore::{AgentId, CoreResult, TenantId};
use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;

#[async_trait]
pub trait ReputationStore: Send + Sync {
    async fn load(&self, tenant_id: &TenantId, agent_id: &AgentId) -> CoreResult<Option<AgentReputation>>;
    async fn save(&self, record: &AgentReputation) -> CoreResult<()>;
    async fn list_tenant(&self, tenant_id: &TenantId) -> CoreResult<Vec<AgentReputation>>;
    /// Every tenant with at least one reputation record, consulted by
    /// the decay sweeper to find which tenants to scan (spec §4.2).
    async fn list_tenants(&self) -> CoreResult<Vec<TenantId>>;
}

#[derive(Debug, Default)]
pub struct InMemoryReputationStore {
    entries: RwLock<HashMap<(TenantId, AgentId), AgentReputation>>,
}

impl InMemoryReputationStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ReputationStore for InMemoryReputationStore {
    async fn load(&self, tenant_id: &TenantId, agent_id: &AgentId) -> CoreResult<Option<AgentReputation>> {
        Ok(self
            .entries
            .read()
            .await
            .get(&(tenant_id.clone(), agent_id.clone()))
            .cloned())
    }

    async fn save(&self, record: &AgentReputation) -> CoreResult<()> {
        self.entries.write().await.insert(
            (record.tenant_id.clone(), record.agent_id.clone()),
            record.clone(),
        );
        Ok(())
    }

    async fn list_tenant(&self, tenant_id: &TenantId) -> CoreResult<Vec<AgentReputation>> {
        Ok(self
            .entries
            .read()
            .await
            .values()
            .filter(|r| &r.tenant_id == tenant_id)
            .cloned()
            .collect())
    }

    async fn list_tenants(&self) -> CoreResult<Vec<TenantId>> {
        let entries = self.entries.read().await;
        let mut tenants: Vec<TenantId> = entries.keys().map(|(tenant_id, _)| tenant_id.clone()).collect();
        tenants.sort();
        tenants.dedup();
        Ok(tenants)
    }
}
