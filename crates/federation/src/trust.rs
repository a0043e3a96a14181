//! `InstanceTrustRecord` and `FederationTrustLedger` (C3) — EMA-smoothed
//! per-remote-instance trust with time-based decay, grounded in the
//! same `tokio::sync::RwLock<HashMap<..>>` store shape as
//! `packages/arbiter/src/locks.rs::LockManager`.

use agentkern_govconfig::ConfigSnapshot;
use agentkern_govcore::RemoteInstanceId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use tokio::sync::RwLock;

const MAX_HISTORY: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TrustSample {
    pub value: f64,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstanceTrustRecord {
    pub remote_instance_id: RemoteInstanceId,
    pub current_trust: f64,
    pub high_watermark: f64,
    pub low_watermark: f64,
    pub handshake_count: u64,
    pub success_count: u64,
    pub failure_count: u64,
    pub last_updated: DateTime<Utc>,
    pub history: VecDeque<TrustSample>,
}

impl InstanceTrustRecord {
    pub fn new(remote_instance_id: RemoteInstanceId, initial_trust: f64, now: DateTime<Utc>) -> Self {
        Self {
            remote_instance_id,
            current_trust: initial_trust,
            high_watermark: initial_trust,
            low_watermark: initial_trust,
            handshake_count: 0,
            success_count: 0,
            failure_count: 0,
            last_updated: now,
            history: VecDeque::new(),
        }
    }

    fn push_history(&mut self, sample: TrustSample) {
        self.history.push_back(sample);
        if self.history.len() > MAX_HISTORY {
            self.history.pop_front();
        }
    }

    /// Applies time decay toward the tenant's `floor_trust`, then
    /// either an EMA update toward `observed` on success
    /// (`trust' = alpha * observed + (1 - alpha) * decayed`) or a flat
    /// failure penalty on failure (`trust' = decayed * failure_penalty`).
    fn apply_decay_and_update(&mut self, observed: f64, success: bool, cfg: &ConfigSnapshot, now: DateTime<Utc>) {
        let elapsed_hours = (now - self.last_updated).num_seconds().max(0) as f64 / 3600.0;
        let decay_factor = 0.5f64.powf(elapsed_hours / cfg.decay.half_life_hours);
        let decayed = cfg.floor_trust + (self.current_trust - cfg.floor_trust) * decay_factor;

        let updated = if success {
            let alpha = cfg.decay.ema_alpha;
            alpha * observed + (1.0 - alpha) * decayed
        } else {
            decayed * cfg.decay.failure_penalty_factor
        };
        self.current_trust = updated.clamp(cfg.floor_trust, 1.0);

        self.high_watermark = self.high_watermark.max(self.current_trust);
        self.low_watermark = self.low_watermark.min(self.current_trust);
        self.handshake_count += 1;
        if success {
            self.success_count += 1;
        } else {
            self.failure_count += 1;
        }
        self.last_updated = now;
        self.push_history(TrustSample {
            value: self.current_trust,
            at: now,
        });
    }
}

/// Per-tenant ledger of remote-instance trust. Process-local; a real
/// deployment would persist this the same way `ReputationStore` is
/// persisted, but C3's spec scope is the decay/EMA rule itself.
#[derive(Debug, Default)]
pub struct FederationTrustLedger {
    records: RwLock<HashMap<RemoteInstanceId, InstanceTrustRecord>>,
}

impl FederationTrustLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the current trust, applying lazy decay toward
    /// `floor_trust` for the elapsed time since the last update
    /// without recording a handshake attempt.
    pub async fn get_trust(&self, remote_instance_id: &RemoteInstanceId, cfg: &ConfigSnapshot) -> f64 {
        let records = self.records.read().await;
        match records.get(remote_instance_id) {
            Some(record) => {
                let elapsed_hours =
                    (Utc::now() - record.last_updated).num_seconds().max(0) as f64 / 3600.0;
                let decay_factor = 0.5f64.powf(elapsed_hours / cfg.decay.half_life_hours);
                cfg.floor_trust + (record.current_trust - cfg.floor_trust) * decay_factor
            }
            None => cfg.new_agent_default_score,
        }
    }

    /// Records the outcome of a completed handshake and returns the
    /// updated record.
    pub async fn record_handshake_outcome(
        &self,
        remote_instance_id: &RemoteInstanceId,
        observed_trust: f64,
        success: bool,
        cfg: &ConfigSnapshot,
    ) -> InstanceTrustRecord {
        let now = Utc::now();
        let mut records = self.records.write().await;
        let record = records
            .entry(remote_instance_id.clone())
            .or_insert_with(|| InstanceTrustRecord::new(remote_instance_id.clone(), cfg.new_agent_default_score, now));
        record.apply_decay_and_update(observed_trust, success, cfg, now);
        record.clone()
    }

    pub async fn list_trusted(&self, cfg: &ConfigSnapshot) -> Vec<InstanceTrustRecord> {
        self.records
            .read()
            .await
            .values()
            .filter(|r| r.current_trust >= cfg.min_handshake_trust)
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn unknown_instance_starts_at_default_trust() {
        let ledger = FederationTrustLedger::new();
        let cfg = ConfigSnapshot::default();
        let trust = ledger.get_trust(&RemoteInstanceId::from("remote-a"), &cfg).await;
        assert_eq!(trust, cfg.new_agent_default_score);
    }

    #[tokio::test]
    async fn successful_handshake_raises_trust_toward_observed() {
        let ledger = FederationTrustLedger::new();
        let cfg = ConfigSnapshot::default();
        let remote = RemoteInstanceId::from("remote-a");

        let record = ledger.record_handshake_outcome(&remote, 0.95, true, &cfg).await;
        assert!(record.current_trust > cfg.new_agent_default_score);
        assert_eq!(record.success_count, 1);
        assert_eq!(record.failure_count, 0);
    }

    #[tokio::test]
    async fn failed_handshake_applies_penalty_factor() {
        let ledger = FederationTrustLedger::new();
        let cfg = ConfigSnapshot::default();
        let remote = RemoteInstanceId::from("remote-a");

        ledger.record_handshake_outcome(&remote, 0.95, true, &cfg).await;
        let before = ledger.get_trust(&remote, &cfg).await;
        let record = ledger.record_handshake_outcome(&remote, 0.95, false, &cfg).await;
        assert!(record.current_trust < before);
        assert_eq!(record.failure_count, 1);
    }

    #[tokio::test]
    async fn list_trusted_filters_below_min_handshake_trust() {
        let ledger = FederationTrustLedger::new();
        let cfg = ConfigSnapshot::default();
        let trusted = RemoteInstanceId::from("trusted");
        let untrusted = RemoteInstanceId::from("untrusted");

        ledger.record_handshake_outcome(&trusted, 0.99, true, &cfg).await;
        ledger.record_handshake_outcome(&untrusted, 0.0, false, &cfg).await;

        let listed = ledger.list_trusted(&cfg).await;
        assert!(listed.iter().any(|r| r.remote_instance_id == trusted));
        assert!(!listed.iter().any(|r| r.remote_instance_id == untrusted));
    }
}
