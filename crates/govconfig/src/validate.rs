//! Validation rules enforced on `Upsert` and on materialized defaults
//! (spec §4.1 — defaults must pass too).

use crate::snapshot::{ConfigSnapshot, TOOL_CLASSES};
use agentkern_govcore::CoreError;

fn in_unit_interval(name: &str, v: f64) -> Result<(), CoreError> {
    if (0.0..=1.0).contains(&v) {
        Ok(())
    } else {
        Err(CoreError::ConfigInvalid(format!(
            "{name} must be in [0, 1], got {v}"
        )))
    }
}

fn positive(name: &str, v: f64) -> Result<(), CoreError> {
    if v > 0.0 {
        Ok(())
    } else {
        Err(CoreError::ConfigInvalid(format!(
            "{name} must be > 0, got {v}"
        )))
    }
}

/// Validates a `ConfigSnapshot` against every rule in spec §4.1.
pub fn validate(cfg: &ConfigSnapshot) -> Result<(), CoreError> {
    let weight_sum = cfg.jury_weights.sum();
    if !(0.99..=1.01).contains(&weight_sum) {
        return Err(CoreError::ConfigInvalid(format!(
            "jury weights must sum to 1.0 +/- 0.01, got {weight_sum}"
        )));
    }

    in_unit_interval("jury_trust_threshold", cfg.jury_trust_threshold)?;
    in_unit_interval("min_handshake_trust", cfg.min_handshake_trust)?;
    in_unit_interval("floor_trust", cfg.floor_trust)?;
    in_unit_interval("new_agent_default_score", cfg.new_agent_default_score)?;
    in_unit_interval("min_balance_threshold", cfg.min_balance_threshold)?;
    in_unit_interval("decay_rate", cfg.decay_rate)?;
    in_unit_interval("floor_score", cfg.floor_score)?;
    in_unit_interval("decay.ema_alpha", cfg.decay.ema_alpha)?;
    in_unit_interval("decay.failure_penalty_factor", cfg.decay.failure_penalty_factor)?;
    in_unit_interval("quorum.quorum", cfg.quorum.quorum)?;
    in_unit_interval("quorum.supermajority", cfg.quorum.supermajority)?;
    in_unit_interval("gate_thresholds.identity", cfg.gate_thresholds.identity)?;
    in_unit_interval("gate_thresholds.entropy", cfg.gate_thresholds.entropy)?;
    in_unit_interval("gate_thresholds.jitter", cfg.gate_thresholds.jitter)?;
    in_unit_interval("gate_thresholds.cognitive", cfg.gate_thresholds.cognitive)?;
    in_unit_interval("escrow_class_b_min_trust", cfg.escrow_class_b_min_trust)?;

    positive("economic.hitl_multiplier", cfg.economic.hitl_multiplier)?;
    positive("meter_base_cost", cfg.meter_base_cost)?;
    positive("entropy_threshold", cfg.entropy_threshold)?;
    positive("decay.half_life_hours", cfg.decay.half_life_hours)?;
    positive("point_to_score_factor", cfg.point_to_score_factor)?;
    positive("economic.trust_tax_base", cfg.economic.trust_tax_base)?;
    positive("escrow_release_reward_points", cfg.escrow_release_reward_points)?;
    positive("escrow_rejection_penalty_points", cfg.escrow_rejection_penalty_points)?;

    if !(cfg.meter_tier_high > cfg.meter_tier_med && cfg.meter_tier_med > cfg.meter_tier_low) {
        return Err(CoreError::ConfigInvalid(format!(
            "meter tiers must be strictly ordered high > med > low, got {} > {} > {}",
            cfg.meter_tier_high, cfg.meter_tier_med, cfg.meter_tier_low
        )));
    }
    if cfg.meter_high_trust_discount >= 1.0 {
        return Err(CoreError::ConfigInvalid(format!(
            "meter_high_trust_discount must be < 1.0, got {}",
            cfg.meter_high_trust_discount
        )));
    }
    if cfg.meter_low_trust_surcharge <= 1.0 {
        return Err(CoreError::ConfigInvalid(format!(
            "meter_low_trust_surcharge must be > 1.0, got {}",
            cfg.meter_low_trust_surcharge
        )));
    }

    for class in TOOL_CLASSES {
        match cfg.risk_multipliers.get(class) {
            Some(v) if *v > 0.0 => {}
            Some(v) => {
                return Err(CoreError::ConfigInvalid(format!(
                    "risk multiplier for {class} must be > 0, got {v}"
                )))
            }
            None => {
                return Err(CoreError::ConfigInvalid(format!(
                    "risk multiplier map missing required tool class {class}"
                )))
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_pass_validation() {
        validate(&ConfigSnapshot::default()).expect("defaults must validate");
    }

    #[test]
    fn boundary_zero_and_one_are_accepted() {
        let mut cfg = ConfigSnapshot::default();
        cfg.jury_trust_threshold = 0.0;
        cfg.min_handshake_trust = 1.0;
        validate(&cfg).expect("0.0 and 1.0 are valid boundary values");
    }

    #[test]
    fn bad_weight_sum_rejected() {
        let mut cfg = ConfigSnapshot::default();
        cfg.jury_weights.audit = 0.9;
        assert!(validate(&cfg).is_err());
    }

    #[test]
    fn missing_tool_class_rejected() {
        let mut cfg = ConfigSnapshot::default();
        cfg.risk_multipliers.remove("payment");
        assert!(validate(&cfg).is_err());
    }

    #[test]
    fn non_positive_hitl_multiplier_rejected() {
        let mut cfg = ConfigSnapshot::default();
        cfg.economic.hitl_multiplier = 0.0;
        assert!(validate(&cfg).is_err());
    }

    #[test]
    fn unordered_meter_tiers_rejected() {
        let mut cfg = ConfigSnapshot::default();
        cfg.meter_tier_med = cfg.meter_tier_high + 0.1;
        assert!(validate(&cfg).is_err());
    }
}
