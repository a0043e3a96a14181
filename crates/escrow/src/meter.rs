//! Socket meter: prices an action by risk class and charges the
//! acting agent's reputation balance for it (spec §4.5). Trust tiers
//! reward well-behaved agents with a discount and surcharge
//! low-trust agents, the same "cost scales with risk" shape used by
//! the federation handshake's trust tax (`step_attestation`).

use agentkern_govconfig::ConfigSnapshot;
use agentkern_govcore::{AgentId, CoreResult, TenantId};
use agentkern_reputation::ReputationLedger;
use std::sync::Arc;
use tracing::debug;

/// `base_cost * risk_multiplier(tool_class) * trust_factor(trust)`.
pub fn compute_cost(cfg: &ConfigSnapshot, tool_class: &str, trust: f64) -> f64 {
    let risk_multiplier = cfg.risk_multiplier(tool_class);
    let trust_factor = if trust >= cfg.meter_tier_high {
        cfg.meter_high_trust_discount
    } else if trust >= cfg.meter_tier_med {
        cfg.meter_med_trust_discount
    } else if trust >= cfg.meter_tier_low {
        1.0
    } else {
        cfg.meter_low_trust_surcharge
    };
    cfg.meter_base_cost * risk_multiplier * trust_factor
}

/// Meters one action: computes its cost and debits the acting agent's
/// reputation by `floor(cost * 100)` points.
pub struct SocketMeter {
    reputation: Arc<ReputationLedger>,
}

impl SocketMeter {
    pub fn new(reputation: Arc<ReputationLedger>) -> Self {
        Self { reputation }
    }

    pub async fn meter_action(
        &self,
        tenant_id: &TenantId,
        agent_id: &AgentId,
        tool_class: &str,
        trust: f64,
        cfg: &ConfigSnapshot,
    ) -> CoreResult<f64> {
        let cost = compute_cost(cfg, tool_class, trust);
        let points = (cost * 100.0).floor();
        debug!(%tenant_id, %agent_id, tool_class, cost, points, "metering action");
        self.reputation
            .penalize(tenant_id, agent_id, points, cfg)
            .await?;
        Ok(cost)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn high_trust_is_discounted_below_base_cost() {
        let cfg = ConfigSnapshot::default();
        let neutral = compute_cost(&cfg, "file_read", 0.5);
        let discounted = compute_cost(&cfg, "file_read", 0.95);
        assert!(discounted < neutral);
    }

    #[test]
    fn low_trust_is_surcharged_above_base_cost() {
        let cfg = ConfigSnapshot::default();
        let neutral = compute_cost(&cfg, "file_read", 0.5);
        let surcharged = compute_cost(&cfg, "file_read", 0.1);
        assert!(surcharged > neutral);
    }

    #[test]
    fn higher_risk_tool_classes_cost_more_at_equal_trust() {
        let cfg = ConfigSnapshot::default();
        let admin = compute_cost(&cfg, "admin_action", 0.5);
        let read = compute_cost(&cfg, "read_only", 0.5);
        assert!(admin > read);
    }

    #[tokio::test]
    async fn metering_debits_reputation_points() {
        use agentkern_reputation::InMemoryReputationStore;
        let reputation = Arc::new(ReputationLedger::new(Arc::new(InMemoryReputationStore::new())));
        let meter = SocketMeter::new(reputation.clone());
        let cfg = ConfigSnapshot::default();
        let tenant = TenantId::from("acme");
        let agent = AgentId::from("agent-1");

        let before = reputation.get_score(&tenant, &agent, &cfg).await.unwrap();
        meter
            .meter_action(&tenant, &agent, "admin_action", 0.5, &cfg)
            .await
            .unwrap();
        let after = reputation.get_score(&tenant, &agent, &cfg).await.unwrap();
        assert!(after < before);
    }
}
