//! Structured error kinds shared across the governance core.
//!
//! Per spec §7: errors are surfaced as structured values, not strings.
//! User-visible rejections always carry the threshold and measured
//! value that triggered them, verbatim.

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum CoreError {
    #[error("config invalid: {0}")]
    ConfigInvalid(String),

    #[error("store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("invalid state transition: from {from} via {attempted}")]
    InvalidStateTransition { from: String, attempted: String },

    #[error("timeout after {elapsed_ms}ms (deadline {deadline_ms}ms)")]
    Timeout { elapsed_ms: u64, deadline_ms: u64 },

    #[error("verification failed: {0}")]
    VerificationFailed(String),

    #[error("replay detected: nonce {0} already consumed")]
    ReplayDetected(String),

    #[error("quota exceeded: {0}")]
    QuotaExceeded(String),

    #[error("tenant not found: {0}")]
    TenantNotFound(String),

    #[error("agent frozen: {0}")]
    AgentFrozen(String),

    #[error("not found: {0}")]
    NotFound(String),
}

pub type CoreResult<T> = Result<T, CoreError>;
