//! `EscrowTransaction` — the Escrow Gate's core record (spec §4.5).
//! Holds a HELD transaction's required vs. received signals and its
//! compensation stack, patterned on `packages/arbiter/src/audit.rs`'s
//! builder-style `AuditRecord`.

use agentkern_govcore::{AgentId, TenantId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SignalKind {
    Policy,
    Jury,
    Entropy,
    Identity,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EscrowState {
    Held,
    Released,
    Rejected,
    Compensated,
}

impl EscrowState {
    /// `Released` and `Compensated` are true terminals. `Rejected` is
    /// terminal for the purposes of `AwaitRelease` (a waiter must not
    /// block past it), but may still refine once to `Compensated` if
    /// the transaction carried a non-empty compensation stack — see
    /// `EscrowGate::settle`.
    pub fn is_terminal(self) -> bool {
        matches!(self, EscrowState::Released | EscrowState::Rejected | EscrowState::Compensated)
    }
}

/// Outcome of recording one signal vote (spec §4.5: "first recording
/// wins; late duplicate signals with a different value are rejected").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalRecordOutcome {
    Applied,
    DuplicateSame,
    DuplicateMismatch,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EscrowTransaction {
    pub transaction_id: String,
    pub tenant_id: TenantId,
    pub agent_id: AgentId,
    pub tool_id: String,
    pub tool_class: String,
    pub payload: serde_json::Value,
    pub required_signals: Vec<SignalKind>,
    /// Idempotent: the first value received for a signal kind wins: a
    /// later re-delivery of the same signal is ignored rather than
    /// overwriting an already-decided vote.
    pub received_signals: HashMap<SignalKind, bool>,
    pub state: EscrowState,
    /// LIFO undo labels, popped by the compensation stack on rejection.
    pub compensation_stack: Vec<String>,
    pub rejection_reason: Option<String>,
    /// Set once a compensation run has completed over this
    /// transaction's undo stack; `true` if any step failed or timed
    /// out.
    pub compensation_failed: bool,
    pub created_at: DateTime<Utc>,
    pub decided_at: Option<DateTime<Utc>>,
}

impl EscrowTransaction {
    pub fn new(
        tenant_id: TenantId,
        agent_id: AgentId,
        tool_id: impl Into<String>,
        tool_class: impl Into<String>,
        payload: serde_json::Value,
        required_signals: Vec<SignalKind>,
    ) -> Self {
        Self {
            transaction_id: Uuid::new_v4().to_string(),
            tenant_id,
            agent_id,
            tool_id: tool_id.into(),
            tool_class: tool_class.into(),
            payload,
            required_signals,
            received_signals: HashMap::new(),
            state: EscrowState::Held,
            compensation_stack: Vec::new(),
            rejection_reason: None,
            compensation_failed: false,
            created_at: Utc::now(),
            decided_at: None,
        }
    }

    /// Records a signal vote. The first vote for a given kind always
    /// applies; a later vote of the same kind is a no-op if it repeats
    /// the same value, and is rejected as a mismatch if it disagrees.
    pub fn record_signal(&mut self, kind: SignalKind, approved: bool) -> SignalRecordOutcome {
        match self.received_signals.get(&kind) {
            None => {
                self.received_signals.insert(kind, approved);
                SignalRecordOutcome::Applied
            }
            Some(existing) if *existing == approved => SignalRecordOutcome::DuplicateSame,
            Some(_) => SignalRecordOutcome::DuplicateMismatch,
        }
    }

    pub fn push_compensation(&mut self, label: impl Into<String>) {
        self.compensation_stack.push(label.into());
    }

    /// `true` once every required signal has a recorded vote.
    pub fn has_quorum(&self) -> bool {
        self.required_signals
            .iter()
            .all(|kind| self.received_signals.contains_key(kind))
    }

    /// `true` if every received required signal approved.
    pub fn all_approved(&self) -> bool {
        self.required_signals
            .iter()
            .all(|kind| self.received_signals.get(kind).copied().unwrap_or(false))
    }

    /// Any required signal that explicitly rejected.
    pub fn any_rejected(&self) -> bool {
        self.required_signals
            .iter()
            .any(|kind| self.received_signals.get(kind) == Some(&false))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tx(required: Vec<SignalKind>) -> EscrowTransaction {
        EscrowTransaction::new(
            TenantId::from("acme"),
            AgentId::from("agent-1"),
            "tool-1",
            "admin_action",
            serde_json::json!({}),
            required,
        )
    }

    #[test]
    fn second_vote_for_same_kind_with_different_value_is_a_mismatch() {
        let mut t = tx(vec![SignalKind::Policy]);
        assert_eq!(t.record_signal(SignalKind::Policy, true), SignalRecordOutcome::Applied);
        assert_eq!(
            t.record_signal(SignalKind::Policy, false),
            SignalRecordOutcome::DuplicateMismatch
        );
        assert_eq!(t.received_signals[&SignalKind::Policy], true);
    }

    #[test]
    fn repeating_the_same_vote_is_idempotent() {
        let mut t = tx(vec![SignalKind::Policy]);
        assert_eq!(t.record_signal(SignalKind::Policy, true), SignalRecordOutcome::Applied);
        assert_eq!(
            t.record_signal(SignalKind::Policy, true),
            SignalRecordOutcome::DuplicateSame
        );
    }

    #[test]
    fn quorum_requires_every_required_signal() {
        let mut t = tx(vec![SignalKind::Policy, SignalKind::Jury]);
        assert!(!t.has_quorum());
        t.record_signal(SignalKind::Policy, true);
        assert!(!t.has_quorum());
        t.record_signal(SignalKind::Jury, true);
        assert!(t.has_quorum());
        assert!(t.all_approved());
    }

    #[test]
    fn single_rejection_marks_any_rejected() {
        let mut t = tx(vec![SignalKind::Policy, SignalKind::Jury]);
        t.record_signal(SignalKind::Policy, true);
        t.record_signal(SignalKind::Jury, false);
        assert!(t.any_rejected());
        assert!(!t.all_approved());
    }
}
