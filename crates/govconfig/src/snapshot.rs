//! `ConfigSnapshot` — the flat record of governance parameters for one
//! tenant (spec §3). Immutable once published: a cached `Arc` pointer
//! is shared between readers, and `Invalidate` swaps the map entry
//! rather than mutating the snapshot underneath a reader (spec §9).

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// The fixed set of tool-risk classes every `ConfigSnapshot` must
/// price (spec §3 invariant).
pub const TOOL_CLASSES: [&str; 12] = [
    "data_query",
    "read_only",
    "file_read",
    "file_write",
    "network_call",
    "api_call",
    "data_mutation",
    "admin_action",
    "exec_command",
    "payment",
    "pii_access",
    "unknown",
];

/// Audit/reputation/attestation/history jury weights, must sum to
/// 1.0 ± 0.01 (spec §4.1).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct JuryWeights {
    pub audit: f64,
    pub reputation: f64,
    pub attestation: f64,
    pub history: f64,
}

impl Default for JuryWeights {
    fn default() -> Self {
        Self {
            audit: 0.40,
            reputation: 0.30,
            attestation: 0.20,
            history: 0.10,
        }
    }
}

impl JuryWeights {
    pub fn sum(&self) -> f64 {
        self.audit + self.reputation + self.attestation + self.history
    }
}

/// Economic rates: trust tax, marketplace commission, HITL escalation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EconomicRates {
    pub trust_tax_base: f64,
    pub per_event_rate: f64,
    pub marketplace_commission: f64,
    pub hitl_multiplier: f64,
}

impl Default for EconomicRates {
    fn default() -> Self {
        Self {
            trust_tax_base: 0.10,
            per_event_rate: 0.01,
            marketplace_commission: 0.05,
            hitl_multiplier: 10.0,
        }
    }
}

/// Tri-factor gate thresholds consulted by the escrow signal set.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GateThresholds {
    pub identity: f64,
    pub entropy: f64,
    pub jitter: f64,
    pub cognitive: f64,
}

impl Default for GateThresholds {
    fn default() -> Self {
        Self {
            identity: 0.70,
            entropy: 0.65,
            jitter: 0.50,
            cognitive: 0.60,
        }
    }
}

/// Decay constants shared by the reputation ledger and the federation
/// trust ledger.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DecayConstants {
    pub half_life_hours: f64,
    pub ema_alpha: f64,
    pub failure_penalty_factor: f64,
}

impl Default for DecayConstants {
    fn default() -> Self {
        Self {
            half_life_hours: 168.0,
            ema_alpha: 0.3,
            failure_penalty_factor: 0.8,
        }
    }
}

/// Quorum/supermajority thresholds used by jury-style signal
/// aggregation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct QuorumThresholds {
    pub quorum: f64,
    pub supermajority: f64,
}

impl Default for QuorumThresholds {
    fn default() -> Self {
        Self {
            quorum: 0.51,
            supermajority: 0.67,
        }
    }
}

/// The effective governance config for one tenant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfigSnapshot {
    pub jury_trust_threshold: f64,
    pub jury_weights: JuryWeights,
    pub economic: EconomicRates,
    /// tool-class string -> positive risk multiplier. Always contains
    /// the fixed set of [`TOOL_CLASSES`].
    pub risk_multipliers: BTreeMap<String, f64>,
    pub gate_thresholds: GateThresholds,
    pub decay: DecayConstants,
    pub quorum: QuorumThresholds,
    pub min_handshake_trust: f64,
    pub floor_trust: f64,
    pub new_agent_default_score: f64,
    pub min_balance_threshold: f64,
    pub point_to_score_factor: f64,
    pub decay_rate: f64,
    pub inactivity_threshold_hours: f64,
    pub floor_score: f64,
    pub entropy_threshold: f64,
    pub meter_base_cost: f64,
    pub meter_high_trust_discount: f64,
    pub meter_med_trust_discount: f64,
    pub meter_low_trust_surcharge: f64,
    pub meter_tier_high: f64,
    pub meter_tier_med: f64,
    pub meter_tier_low: f64,
    pub escrow_queue_capacity: usize,
    /// Minimum agent trust a Class-B tool action requires for the
    /// Policy signal to come back `true` (spec §4.5: "agent trust
    /// below the tool's minimum causes the policy signal to be
    /// false").
    pub escrow_class_b_min_trust: f64,
    /// Reputation points rewarded on `RELEASED`.
    pub escrow_release_reward_points: f64,
    /// Reputation points charged on `REJECTED`.
    pub escrow_rejection_penalty_points: f64,
}

/// Risk multiplier ordering per spec §4.1:
/// admin_action > payment > exec_command > ... > read_only.
fn default_risk_multipliers() -> BTreeMap<String, f64> {
    let ordered: [(&str, f64); 12] = [
        ("admin_action", 5.0),
        ("payment", 4.5),
        ("exec_command", 4.0),
        ("data_mutation", 3.0),
        ("pii_access", 2.5),
        ("network_call", 2.0),
        ("api_call", 1.8),
        ("file_write", 1.5),
        ("unknown", 1.5),
        ("data_query", 1.2),
        ("file_read", 1.0),
        ("read_only", 0.5),
    ];
    ordered.into_iter().map(|(k, v)| (k.to_string(), v)).collect()
}

impl Default for ConfigSnapshot {
    fn default() -> Self {
        Self {
            jury_trust_threshold: 0.65,
            jury_weights: JuryWeights::default(),
            economic: EconomicRates::default(),
            risk_multipliers: default_risk_multipliers(),
            gate_thresholds: GateThresholds::default(),
            decay: DecayConstants::default(),
            quorum: QuorumThresholds::default(),
            min_handshake_trust: 0.50,
            floor_trust: 0.1,
            new_agent_default_score: 0.30,
            min_balance_threshold: 0.20,
            point_to_score_factor: 0.01,
            decay_rate: 0.99,
            inactivity_threshold_hours: 168.0,
            floor_score: 0.1,
            entropy_threshold: 0.75,
            meter_base_cost: 1.0,
            meter_high_trust_discount: 0.70,
            meter_med_trust_discount: 0.85,
            meter_low_trust_surcharge: 1.50,
            meter_tier_high: 0.80,
            meter_tier_med: 0.60,
            meter_tier_low: 0.30,
            escrow_queue_capacity: 1_000,
            escrow_class_b_min_trust: 0.85,
            escrow_release_reward_points: 2.0,
            escrow_rejection_penalty_points: 5.0,
        }
    }
}

impl ConfigSnapshot {
    pub fn risk_multiplier(&self, tool_class: &str) -> f64 {
        self.risk_multipliers
            .get(tool_class)
            .copied()
            .unwrap_or_else(|| self.risk_multipliers["unknown"])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_carry_all_twelve_tool_classes() {
        let cfg = ConfigSnapshot::default();
        for class in TOOL_CLASSES {
            assert!(cfg.risk_multipliers.contains_key(class), "missing {class}");
        }
        assert_eq!(cfg.risk_multipliers.len(), 12);
    }

    #[test]
    fn default_risk_ordering_matches_spec() {
        let cfg = ConfigSnapshot::default();
        assert!(cfg.risk_multiplier("admin_action") > cfg.risk_multiplier("payment"));
        assert!(cfg.risk_multiplier("payment") > cfg.risk_multiplier("exec_command"));
        assert!(cfg.risk_multiplier("exec_command") > cfg.risk_multiplier("read_only"));
    }

    #[test]
    fn jury_weights_sum_to_one() {
        let w = JuryWeights::default();
        assert!((w.sum() - 1.0).abs() <= 0.01);
    }
}
