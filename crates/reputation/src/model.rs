//! `AgentReputation` — per-agent state tracked by the ledger (spec §4.2).

use agentkern_govcore::{AgentId, TenantId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentReputation {
    pub tenant_id: TenantId,
    pub agent_id: AgentId,
    /// Normalized trust score in `[floor_score, 1.0]`.
    pub score: f64,
    /// Raw point accumulator; `score` is derived from this via
    /// `point_to_score_factor`, then clamped.
    pub points: f64,
    pub blacklisted: bool,
    pub last_activity: DateTime<Utc>,
    pub reward_count: u64,
    pub penalty_count: u64,
}

impl AgentReputation {
    pub fn new(tenant_id: TenantId, agent_id: AgentId, default_score: f64, now: DateTime<Utc>) -> Self {
        Self {
            tenant_id,
            agent_id,
            score: default_score,
            points: 0.0,
            blacklisted: false,
            last_activity: now,
            reward_count: 0,
            penalty_count: 0,
        }
    }
}
