//! AgentKern-Custody: shared core
//!
//! Holds the identifiers, the structured error vocabulary (spec §7),
//! and the injected-dependency ports (spec §6) that every other
//! governance-core crate depends on. Nothing here touches a network
//! socket or a database; it exists so `govconfig`, `reputation`,
//! `federation`, and `escrow` can all speak the same vocabulary
//! without depending on each other.

pub mod error;
pub mod ids;
pub mod ports;

pub use error::{CoreError, CoreResult};
pub use ids::{AgentId, RemoteInstanceId, TenantId, ToolId};
pub use ports::{AttestationLogger, CompensationExecutor, EntropyMonitor, EventSource, JuryClient, RawEvent};
