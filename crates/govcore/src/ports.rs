//! Injected dependencies consumed by the core (spec §6).
//!
//! The core never parses wire formats, never touches a socket, and
//! never owns a database connection directly — every external
//! collaborator is an injected trait object so the core stays testable
//! with in-memory fakes and swappable against real backends (SQLite,
//! a cloud K/V store, a gRPC jury service, ...) without the governance
//! logic knowing the difference.

use crate::error::CoreResult;
use crate::ids::{AgentId, TenantId};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// One intercepted agent action, handed to the escrow gate by the
/// (out-of-scope) kernel-side event producer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawEvent {
    pub transaction_id: String,
    pub tenant_id: TenantId,
    pub agent_id: AgentId,
    pub tool_id: String,
    /// One of the 12 fixed risk classes the (out-of-scope) protocol
    /// parsers tag the action with; consumed directly by the escrow
    /// gate's tool classifier.
    pub tool_class: String,
    pub payload: serde_json::Value,
}

/// `Read() -> RawEvent | Closed`.
#[async_trait]
pub trait EventSource: Send + Sync {
    async fn read(&self) -> Option<RawEvent>;
}

/// `RequestVerdict(tx_id, payload) -> bool | error`. May be slow; the
/// caller (the escrow gate) enforces its own per-signal deadline.
#[async_trait]
pub trait JuryClient: Send + Sync {
    async fn request_verdict(&self, tx_id: &str, payload: &serde_json::Value) -> CoreResult<bool>;
}

/// `Score(payload) -> float`, compared against the tenant's
/// `entropy_threshold`.
#[async_trait]
pub trait EntropyMonitor: Send + Sync {
    async fn score(&self, payload: &serde_json::Value) -> f64;
}

/// Invokes undo closures registered on a transaction's compensation
/// stack. Provided by the embedder because only it knows how to
/// reverse a given side effect.
#[async_trait]
pub trait CompensationExecutor: Send + Sync {
    async fn run(&self, label: &str) -> CoreResult<()>;
}

/// Append-only sink for trust events (spec's `AttestationEvent`).
#[async_trait]
pub trait AttestationLogger: Send + Sync {
    async fn log(&self, event: serde_json::Value);
}
