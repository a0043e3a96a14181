//! Default injected-port implementations wired by `probe` when no
//! embedder-supplied backend is configured. Every port named in spec
//! §6 is an injected trait precisely so a real deployment can swap
//! these out (an LLM-backed jury, a real entropy model, an embedder's
//! own undo logic) without touching the governance core — these are
//! the "in-memory reference implementation for tests" the Non-goals
//! call for, promoted to a runnable dev-mode default.

use agentkern_govcore::{CompensationExecutor, CoreResult, EntropyMonitor, JuryClient};
use async_trait::async_trait;
use std::collections::HashMap;
use tracing::info;

/// Jury stand-in: approves unconditionally. A production deployment
/// replaces this with a call into the arbiter/LLM-backed verdict
/// service named in spec §4.5; until one is wired up, Class-B actions
/// still gate on Policy + Entropy + Identity.
pub struct AutoApproveJury;

#[async_trait]
impl JuryClient for AutoApproveJury {
    async fn request_verdict(&self, tx_id: &str, _payload: &serde_json::Value) -> CoreResult<bool> {
        info!(tx_id, "auto-approve jury: no external arbiter configured, approving");
        Ok(true)
    }
}

/// Entropy monitor: normalized Shannon entropy of the payload's
/// serialized bytes, the simplest real "statistical anomaly score"
/// available without an embedder-supplied model (spec §4.5: "Entropy
/// (statistical anomaly score vs threshold)").
pub struct ShannonEntropyMonitor;

#[async_trait]
impl EntropyMonitor for ShannonEntropyMonitor {
    async fn score(&self, payload: &serde_json::Value) -> f64 {
        let bytes = serde_json::to_vec(payload).unwrap_or_default();
        if bytes.is_empty() {
            return 0.0;
        }

        let mut counts: HashMap<u8, usize> = HashMap::new();
        for b in &bytes {
            *counts.entry(*b).or_insert(0) += 1;
        }

        let len = bytes.len() as f64;
        let shannon_bits = counts
            .values()
            .map(|&count| {
                let p = count as f64 / len;
                -p * p.log2()
            })
            .sum::<f64>();

        // Byte-level Shannon entropy tops out at 8 bits/symbol; normalize
        // into [0, 1] so it compares directly against `entropy_threshold`.
        (shannon_bits / 8.0).clamp(0.0, 1.0)
    }
}

/// Compensation executor stand-in: logs the undo label instead of
/// reversing a real side effect. Real deployments inject their own
/// executor (spec §6: "provided by the embedder because only it knows
/// how to reverse a given side effect").
pub struct LoggingCompensationExecutor;

#[async_trait]
impl CompensationExecutor for LoggingCompensationExecutor {
    async fn run(&self, label: &str) -> CoreResult<()> {
        info!(label, "compensation stand-in: logging undo, no real side effect to reverse");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn empty_payload_has_zero_entropy() {
        let monitor = ShannonEntropyMonitor;
        let score = monitor.score(&serde_json::Value::Null).await;
        assert!(score >= 0.0 && score <= 1.0);
    }

    #[tokio::test]
    async fn varied_payload_has_higher_entropy_than_repetitive_one() {
        let monitor = ShannonEntropyMonitor;
        let repetitive = serde_json::json!({"a": "aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa"});
        let varied = serde_json::json!({"x": "qZ3!7vK9$mP2@rL8#nW4%tY6^uI1&oA5*"});
        let low = monitor.score(&repetitive).await;
        let high = monitor.score(&varied).await;
        assert!(high > low);
    }

    #[tokio::test]
    async fn jury_approves_by_default() {
        let jury = AutoApproveJury;
        assert!(jury.request_verdict("tx-1", &serde_json::json!({})).await.unwrap());
    }
}
