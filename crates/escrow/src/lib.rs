//! AgentKern-Custody: Escrow Gate (C5)
//!
//! [`gate::EscrowGate`] sequesters intercepted tool-use events behind a
//! HELD transaction, gathers the Policy/Jury/Entropy/Identity signal
//! quorum required by the action's risk class, and settles the
//! outcome against the reputation ledger, compensation stack, and
//! socket meter.

pub mod classifier;
pub mod compensation;
pub mod gate;
pub mod meter;
pub mod policy;
pub mod transaction;

pub use classifier::{classify, RiskClass};
pub use compensation::{noop_executor, run_compensation, NoopCompensationExecutor};
pub use gate::{
    EscrowError, EscrowGate, ENTROPY_SIGNAL_DEADLINE, JURY_SIGNAL_DEADLINE, OVERALL_SEQUESTRATION_DEADLINE,
};
pub use meter::{compute_cost, SocketMeter};
pub use policy::{policy_signal, required_signals};
pub use transaction::{EscrowState, EscrowTransaction, SignalKind, SignalRecordOutcome};
