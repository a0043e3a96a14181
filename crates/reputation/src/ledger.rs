//! `ReputationLedger` — C2's public surface: `GetScore`, `Reward`,
//! `Penalize`, `Quarantine`, `GetAgent`, `CheckBalance`, plus the
//! decay sweeper (spec §4.2).

use crate::audit::{MerkleProof, ReputationAuditLog};
use crate::model::AgentReputation;
use crate::store::ReputationStore;
use agentkern_govconfig::ConfigSnapshot;
use agentkern_govcore::{AgentId, CoreError, CoreResult, TenantId};
use chrono::Utc;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{info, warn};

/// Default interval between decay sweeps (spec §4.2: "periodically
/// (default hourly)").
pub const DECAY_SWEEP_INTERVAL_SECONDS: u64 = 3600;

/// Reputation ledger for one tenant's agent population. The audit log
/// is process-local; in a multi-instance deployment it would be
/// sharded per tenant behind the same `ReputationStore` backend used
/// for the score records themselves.
pub struct ReputationLedger {
    store: Arc<dyn ReputationStore>,
    audit: Mutex<ReputationAuditLog>,
}

impl ReputationLedger {
    pub fn new(store: Arc<dyn ReputationStore>) -> Self {
        Self {
            store,
            audit: Mutex::new(ReputationAuditLog::new()),
        }
    }

    async fn load_or_init(
        &self,
        tenant_id: &TenantId,
        agent_id: &AgentId,
        cfg: &ConfigSnapshot,
    ) -> CoreResult<AgentReputation> {
        match self.store.load(tenant_id, agent_id).await? {
            Some(record) => Ok(record),
            None => Ok(AgentReputation::new(
                tenant_id.clone(),
                agent_id.clone(),
                cfg.new_agent_default_score,
                Utc::now(),
            )),
        }
    }

    /// Reward/penalize mutations clamp to `[0.0, 1.0]` (spec §4.2,
    /// §8: "penalty past 0 saturates at 0"). `floor_score` is a
    /// separate constant reserved for the decay sweeper, not mutation
    /// clamping.
    fn recompute_score(points: f64, default_score: f64, factor: f64) -> f64 {
        (default_score + points * factor).clamp(0.0, 1.0)
    }

    pub async fn get_agent(
        &self,
        tenant_id: &TenantId,
        agent_id: &AgentId,
        cfg: &ConfigSnapshot,
    ) -> CoreResult<AgentReputation> {
        self.load_or_init(tenant_id, agent_id, cfg).await
    }

    pub async fn get_score(
        &self,
        tenant_id: &TenantId,
        agent_id: &AgentId,
        cfg: &ConfigSnapshot,
    ) -> CoreResult<f64> {
        Ok(self.load_or_init(tenant_id, agent_id, cfg).await?.score)
    }

    pub async fn reward(
        &self,
        tenant_id: &TenantId,
        agent_id: &AgentId,
        amount: f64,
        cfg: &ConfigSnapshot,
    ) -> CoreResult<AgentReputation> {
        self.apply_delta(tenant_id, agent_id, amount.abs(), "reward", cfg)
            .await
    }

    pub async fn penalize(
        &self,
        tenant_id: &TenantId,
        agent_id: &AgentId,
        amount: f64,
        cfg: &ConfigSnapshot,
    ) -> CoreResult<AgentReputation> {
        self.apply_delta(tenant_id, agent_id, -amount.abs(), "penalize", cfg)
            .await
    }

    async fn apply_delta(
        &self,
        tenant_id: &TenantId,
        agent_id: &AgentId,
        delta: f64,
        action: &str,
        cfg: &ConfigSnapshot,
    ) -> CoreResult<AgentReputation> {
        let mut record = self.load_or_init(tenant_id, agent_id, cfg).await?;
        if record.blacklisted {
            return Err(CoreError::AgentFrozen(agent_id.to_string()));
        }

        record.points += delta;
        record.score = Self::recompute_score(record.points, cfg.new_agent_default_score, cfg.point_to_score_factor);
        record.last_activity = Utc::now();
        if delta >= 0.0 {
            record.reward_count += 1;
        } else {
            record.penalty_count += 1;
        }

        self.store.save(&record).await?;
        self.audit
            .lock()
            .await
            .append(tenant_id.clone(), agent_id.clone(), action, delta, record.last_activity);

        info!(%tenant_id, %agent_id, action, delta, score = record.score, "reputation mutated");
        Ok(record)
    }

    /// Blacklists an agent and forces its score to 0 (spec §3, §4.2:
    /// `blacklisted ⇒ score = 0`). Blacklisted agents reject further
    /// reward/penalize calls and always fail `check_balance`.
    pub async fn quarantine(
        &self,
        tenant_id: &TenantId,
        agent_id: &AgentId,
        cfg: &ConfigSnapshot,
    ) -> CoreResult<()> {
        let mut record = self.load_or_init(tenant_id, agent_id, cfg).await?;
        record.blacklisted = true;
        record.score = 0.0;
        record.last_activity = Utc::now();
        self.store.save(&record).await?;
        self.audit.lock().await.append(
            tenant_id.clone(),
            agent_id.clone(),
            "quarantine",
            0.0,
            record.last_activity,
        );
        warn!(%tenant_id, %agent_id, "agent quarantined");
        Ok(())
    }

    /// `score > min_balance_threshold && !blacklisted` (spec §4.2).
    pub async fn check_balance(
        &self,
        tenant_id: &TenantId,
        agent_id: &AgentId,
        cfg: &ConfigSnapshot,
    ) -> CoreResult<bool> {
        let record = self.load_or_init(tenant_id, agent_id, cfg).await?;
        Ok(!record.blacklisted && record.score > cfg.min_balance_threshold)
    }

    pub async fn generate_proof(&self, agent_id: &AgentId) -> Option<MerkleProof> {
        self.audit.lock().await.generate_proof(agent_id)
    }

    pub async fn audit_root(&self) -> String {
        self.audit.lock().await.root().to_string()
    }

    /// Decays every agent in `tenant_id` that has been inactive past
    /// `cfg.inactivity_threshold_hours`, multiplying `score` by
    /// `cfg.decay_rate` (clamped at `cfg.floor_score`). Blacklisted
    /// agents are skipped — quarantine, not decay, governs their fate.
    /// Grounded in the periodic-sweep shape of
    /// `packages/arbiter/src/locks.rs::cleanup_expired`.
    pub async fn run_decay_sweep(&self, tenant_id: &TenantId, cfg: &ConfigSnapshot) -> CoreResult<usize> {
        let now = Utc::now();
        let mut decayed = 0usize;
        for mut record in self.store.list_tenant(tenant_id).await? {
            if record.blacklisted {
                continue;
            }
            let idle_hours = (now - record.last_activity).num_seconds() as f64 / 3600.0;
            if idle_hours < cfg.inactivity_threshold_hours {
                continue;
            }
            let before = record.score;
            record.score = (record.score * cfg.decay_rate).max(cfg.floor_score);
            if (record.score - before).abs() > f64::EPSILON {
                self.store.save(&record).await?;
                decayed += 1;
            }
        }
        Ok(decayed)
    }

    /// Runs [`Self::run_decay_sweep`] across every tenant the store
    /// knows about, each against its own tenant's config. This is the
    /// entry point a dedicated periodic task (spec §5) drives; a
    /// single tenant's store error is logged and skipped rather than
    /// aborting the sweep for every other tenant.
    pub async fn run_decay_sweep_all(&self, config: &agentkern_govconfig::ConfigCache) -> CoreResult<usize> {
        let mut total = 0usize;
        for tenant_id in self.store.list_tenants().await? {
            let cfg = config.get_config(&tenant_id).await;
            match self.run_decay_sweep(&tenant_id, &cfg).await {
                Ok(n) => total += n,
                Err(err) => warn!(%tenant_id, %err, "decay sweep failed for tenant"),
            }
        }
        Ok(total)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryReputationStore;

    fn ledger() -> ReputationLedger {
        ReputationLedger::new(Arc::new(InMemoryReputationStore::new()))
    }

    fn ids() -> (TenantId, AgentId) {
        (TenantId::from("acme"), AgentId::from("agent-1"))
    }

    #[tokio::test]
    async fn new_agent_starts_at_default_score() {
        let ledger = ledger();
        let cfg = ConfigSnapshot::default();
        let (tenant, agent) = ids();
        let score = ledger.get_score(&tenant, &agent, &cfg).await.unwrap();
        assert_eq!(score, cfg.new_agent_default_score);
    }

    #[tokio::test]
    async fn reward_increases_score_and_penalize_decreases_it() {
        let ledger = ledger();
        let cfg = ConfigSnapshot::default();
        let (tenant, agent) = ids();

        let rewarded = ledger.reward(&tenant, &agent, 10.0, &cfg).await.unwrap();
        assert!(rewarded.score > cfg.new_agent_default_score);

        let penalized = ledger.penalize(&tenant, &agent, 50.0, &cfg).await.unwrap();
        assert!(penalized.score < rewarded.score);
    }

    #[tokio::test]
    async fn quarantine_blocks_further_mutation_and_balance_check() {
        let ledger = ledger();
        let cfg = ConfigSnapshot::default();
        let (tenant, agent) = ids();

        ledger.reward(&tenant, &agent, 10.0, &cfg).await.unwrap();
        ledger.quarantine(&tenant, &agent, &cfg).await.unwrap();

        let record = ledger.get_agent(&tenant, &agent, &cfg).await.unwrap();
        assert_eq!(record.score, 0.0);
        assert!(!ledger.check_balance(&tenant, &agent, &cfg).await.unwrap());
        assert!(ledger.reward(&tenant, &agent, 1.0, &cfg).await.is_err());
    }

    #[tokio::test]
    async fn score_never_drops_below_zero() {
        let ledger = ledger();
        let cfg = ConfigSnapshot::default();
        let (tenant, agent) = ids();

        ledger.penalize(&tenant, &agent, 1000.0, &cfg).await.unwrap();
        let score = ledger.get_score(&tenant, &agent, &cfg).await.unwrap();
        assert_eq!(score, 0.0);
    }

    #[tokio::test]
    async fn mutations_are_recorded_in_the_audit_log() {
        let ledger = ledger();
        let cfg = ConfigSnapshot::default();
        let (tenant, agent) = ids();

        ledger.reward(&tenant, &agent, 5.0, &cfg).await.unwrap();
        let proof = ledger.generate_proof(&agent).await.expect("proof exists");
        assert_eq!(proof.leaf.action, "reward");
    }
}
