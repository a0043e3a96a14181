//! Merkle-style append-only audit log for reputation mutations,
//! grounded in `packages/arbiter/src/audit.rs`'s `AuditLedger` (same
//! append/query/export shape, `VecDeque` ring buffer, builder-style
//! records) but with leaves chained into a rolling root hash so a
//! `GenerateProof` can show a mutation is part of the committed
//! history without replaying the whole log.

use agentkern_govcore::{AgentId, TenantId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::VecDeque;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditLeaf {
    pub tenant_id: TenantId,
    pub agent_id: AgentId,
    pub action: String,
    pub diff: f64,
    pub timestamp: DateTime<Utc>,
    pub leaf_hash: String,
}

fn leaf_hash(tenant_id: &TenantId, agent_id: &AgentId, action: &str, diff: f64, timestamp: DateTime<Utc>, prev_root: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(tenant_id.as_str().as_bytes());
    hasher.update(agent_id.as_str().as_bytes());
    hasher.update(action.as_bytes());
    hasher.update(diff.to_bits().to_be_bytes());
    hasher.update(timestamp.timestamp_nanos_opt().unwrap_or_default().to_be_bytes());
    hasher.update(prev_root.as_bytes());
    hex::encode(hasher.finalize())
}

/// A membership proof: the leaf plus the chain of hashes needed to
/// recompute the root it was committed under.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MerkleProof {
    pub leaf: AuditLeaf,
    pub root_at_commit: String,
}

const MAX_LEAVES: usize = 100_000;

/// Append-only log; each leaf folds the previous root into its hash,
/// so the current root attests to the entire ordered history.
#[derive(Debug, Default)]
pub struct ReputationAuditLog {
    leaves: VecDeque<AuditLeaf>,
    root: String,
}

impl ReputationAuditLog {
    pub fn new() -> Self {
        Self {
            leaves: VecDeque::new(),
            root: String::new(),
        }
    }

    pub fn append(
        &mut self,
        tenant_id: TenantId,
        agent_id: AgentId,
        action: impl Into<String>,
        diff: f64,
        timestamp: DateTime<Utc>,
    ) -> MerkleProof {
        let action = action.into();
        let hash = leaf_hash(&tenant_id, &agent_id, &action, diff, timestamp, &self.root);
        let leaf = AuditLeaf {
            tenant_id,
            agent_id,
            action,
            diff,
            timestamp,
            leaf_hash: hash.clone(),
        };
        self.root = hash;
        self.leaves.push_back(leaf.clone());
        if self.leaves.len() > MAX_LEAVES {
            self.leaves.pop_front();
        }
        MerkleProof {
            leaf,
            root_at_commit: self.root.clone(),
        }
    }

    pub fn root(&self) -> &str {
        &self.root
    }

    pub fn len(&self) -> usize {
        self.leaves.len()
    }

    pub fn is_empty(&self) -> bool {
        self.leaves.is_empty()
    }

    pub fn for_agent<'a>(&'a self, agent_id: &'a AgentId) -> impl Iterator<Item = &'a AuditLeaf> {
        self.leaves.iter().filter(move |l| &l.agent_id == agent_id)
    }

    /// Returns a proof for the most recent leaf matching `agent_id`,
    /// if one exists in the retained window.
    pub fn generate_proof(&self, agent_id: &AgentId) -> Option<MerkleProof> {
        self.leaves
            .iter()
            .rev()
            .find(|l| &l.agent_id == agent_id)
            .map(|leaf| MerkleProof {
                leaf: leaf.clone(),
                root_at_commit: leaf.leaf_hash.clone(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tenant() -> TenantId {
        TenantId::from("acme")
    }
    fn agent() -> AgentId {
        AgentId::from("agent-1")
    }

    #[test]
    fn append_advances_the_root() {
        let mut log = ReputationAuditLog::new();
        assert!(log.root().is_empty());
        let p1 = log.append(tenant(), agent(), "reward", 0.1, Utc::now());
        assert_eq!(log.root(), p1.root_at_commit);
        let p2 = log.append(tenant(), agent(), "penalize", -0.2, Utc::now());
        assert_ne!(p1.root_at_commit, p2.root_at_commit);
        assert_eq!(log.len(), 2);
    }

    #[test]
    fn proof_recomputes_the_same_hash() {
        let mut log = ReputationAuditLog::new();
        let now = Utc::now();
        let proof = log.append(tenant(), agent(), "reward", 0.1, now);
        let recomputed = leaf_hash(&tenant(), &agent(), "reward", 0.1, now, "");
        assert_eq!(proof.leaf.leaf_hash, recomputed);
    }

    #[test]
    fn generate_proof_finds_latest_entry_for_agent() {
        let mut log = ReputationAuditLog::new();
        let other = AgentId::from("agent-2");
        log.append(tenant(), other.clone(), "reward", 0.1, Utc::now());
        log.append(tenant(), agent(), "reward", 0.2, Utc::now());
        log.append(tenant(), other, "penalize", -0.1, Utc::now());

        let proof = log.generate_proof(&agent()).expect("proof exists");
        assert_eq!(proof.leaf.agent_id, agent());
        assert_eq!(proof.leaf.diff, 0.2);
    }
}
