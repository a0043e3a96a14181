//! `AttestationEvent` — the append-only record of a completed (or
//! failed) federation handshake, bounded to the most recent 5000
//! entries per spec §4.3. Shape mirrors
//! `packages/governance/src/audit/evidence.rs`'s `EvidenceArtifact`
//! (status + timestamp + free-form metadata), adapted to the
//! handshake's RESULT step.

use agentkern_govcore::{AgentId, RemoteInstanceId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use tokio::sync::RwLock;

pub const MAX_ATTESTATION_EVENTS: usize = 5000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AttestationVerdict {
    Accepted,
    Rejected,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttestationEvent {
    pub session_id: String,
    pub remote_instance_id: RemoteInstanceId,
    pub agent_id: AgentId,
    pub verdict: AttestationVerdict,
    pub trust_score: f64,
    pub reason: Option<String>,
    pub timestamp: DateTime<Utc>,
}

/// Bounded ring buffer of attestation events, shared via the injected
/// `AttestationLogger` port at the binary boundary.
#[derive(Debug, Default)]
pub struct AttestationLog {
    events: RwLock<VecDeque<AttestationEvent>>,
}

impl AttestationLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn record(&self, event: AttestationEvent) {
        let mut events = self.events.write().await;
        events.push_back(event);
        if events.len() > MAX_ATTESTATION_EVENTS {
            events.pop_front();
        }
    }

    pub async fn len(&self) -> usize {
        self.events.read().await.len()
    }

    pub async fn for_instance(&self, remote_instance_id: &RemoteInstanceId) -> Vec<AttestationEvent> {
        self.events
            .read()
            .await
            .iter()
            .filter(|e| &e.remote_instance_id == remote_instance_id)
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(instance: &str) -> AttestationEvent {
        AttestationEvent {
            session_id: "s1".into(),
            remote_instance_id: RemoteInstanceId::from(instance),
            agent_id: AgentId::from("agent-1"),
            verdict: AttestationVerdict::Accepted,
            trust_score: 0.8,
            reason: None,
            timestamp: Utc::now(),
        }
    }

    #[tokio::test]
    async fn bounds_to_max_events() {
        let log = AttestationLog::new();
        for _ in 0..(MAX_ATTESTATION_EVENTS + 10) {
            log.record(event("remote-a")).await;
        }
        assert_eq!(log.len().await, MAX_ATTESTATION_EVENTS);
    }

    #[tokio::test]
    async fn filters_by_instance() {
        let log = AttestationLog::new();
        log.record(event("remote-a")).await;
        log.record(event("remote-b")).await;
        let filtered = log.for_instance(&RemoteInstanceId::from("remote-a")).await;
        assert_eq!(filtered.len(), 1);
    }
}
