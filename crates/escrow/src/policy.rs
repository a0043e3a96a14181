//! Policy signal derivation and the per-transaction required signal
//! set, both fixed at sequestration time from the tool's risk class
//! (spec §4.5). The tool classifier is a pure function of
//! (tool class, agent trust, tenant config) — no I/O, so it runs
//! synchronously inside `Sequester` rather than joining the async
//! jury/entropy/identity signals.

use crate::classifier::{classify, RiskClass};
use crate::transaction::SignalKind;
use agentkern_govconfig::ConfigSnapshot;

/// The fixed required signal set for a risk class (spec §4.5
/// contract): "read-only tools require policy only; Class-B tools
/// require policy + jury + entropy + identity".
pub fn required_signals(class: RiskClass) -> Vec<SignalKind> {
    match class {
        RiskClass::A => vec![SignalKind::Policy],
        RiskClass::B => vec![
            SignalKind::Policy,
            SignalKind::Jury,
            SignalKind::Entropy,
            SignalKind::Identity,
        ],
    }
}

/// Classifies `tool_class` and derives the synchronous Policy signal.
/// Class-A actions pass policy unconditionally; Class-B actions also
/// require the agent's current trust to clear
/// `cfg.escrow_class_b_min_trust`.
pub fn policy_signal(tool_class: &str, trust: f64, cfg: &ConfigSnapshot) -> (RiskClass, bool) {
    let class = classify(tool_class);
    let approved = match class {
        RiskClass::A => true,
        RiskClass::B => trust >= cfg.escrow_class_b_min_trust,
    };
    (class, approved)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn class_a_tools_need_only_policy() {
        assert_eq!(required_signals(RiskClass::A), vec![SignalKind::Policy]);
    }

    #[test]
    fn class_b_tools_need_the_full_quorum() {
        assert_eq!(
            required_signals(RiskClass::B),
            vec![SignalKind::Policy, SignalKind::Jury, SignalKind::Entropy, SignalKind::Identity]
        );
    }

    #[test]
    fn class_b_policy_fails_below_minimum_trust() {
        let cfg = ConfigSnapshot::default();
        let (class, approved) = policy_signal("payment", 0.2, &cfg);
        assert_eq!(class, RiskClass::B);
        assert!(!approved, "trust 0.2 is below the 0.85 minimum for execute-class tools");
    }

    #[test]
    fn class_b_policy_passes_at_or_above_minimum_trust() {
        let cfg = ConfigSnapshot::default();
        let (_, approved) = policy_signal("payment", cfg.escrow_class_b_min_trust, &cfg);
        assert!(approved, "trust exactly at the minimum must be accepted (inclusive boundary)");
    }

    #[test]
    fn class_a_tools_always_pass_policy_regardless_of_trust() {
        let cfg = ConfigSnapshot::default();
        let (_, approved) = policy_signal("read_only", 0.0, &cfg);
        assert!(approved);
    }
}
