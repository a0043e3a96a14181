//! AgentKern-Custody: Federation Trust Ledger and Handshake (C3/C4)
//!
//! [`trust::FederationTrustLedger`] tracks EMA-smoothed, time-decayed
//! trust per remote instance. [`handshake::HandshakeEngine`] drives the
//! six-step mutual-attestation protocol that feeds it.

pub mod attestation;
pub mod crypto;
pub mod handshake;
pub mod nonce;
pub mod trust;

pub use attestation::{AttestationEvent, AttestationLog, AttestationVerdict, MAX_ATTESTATION_EVENTS};
pub use crypto::{Algorithm, CryptoError, KeyPair, Signature};
pub use handshake::{
    AttestationCost, HandshakeEngine, HandshakeError, HandshakeSession, HandshakeSessionStore,
    HandshakeState, InMemoryHandshakeSessionStore, TrustSignals,
};
pub use nonce::{NonceStore, NONCE_SWEEP_INTERVAL_SECONDS};
pub use trust::{FederationTrustLedger, InstanceTrustRecord, TrustSample};
