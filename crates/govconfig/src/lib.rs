//! AgentKern-Custody: Tenant Governance Config (C1)
//!
//! A per-tenant, immutable-snapshot config cache fronting an injected
//! [`ConfigStore`]. See [`cache::ConfigCache`] for the `GetConfig` /
//! `Invalidate` / `InvalidateAll` / `Upsert` contract.

pub mod cache;
pub mod snapshot;
pub mod store;
pub mod validate;

pub use cache::ConfigCache;
pub use snapshot::{
    ConfigSnapshot, DecayConstants, EconomicRates, GateThresholds, JuryWeights, QuorumThresholds,
    TOOL_CLASSES,
};
pub use store::{ConfigStore, InMemoryConfigStore};
pub use validate::validate;
