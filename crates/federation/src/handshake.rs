//! Federation Handshake (C4) — the six-step mutual-attestation
//! protocol and its state machine (spec §4.4).
//!
//! The state machine and step logic are transport-agnostic: `probe`
//! drives them over a WebSocket, but nothing here touches a socket,
//! mirroring how `packages/pillars/gate/src/engine.rs` keeps
//! `GateEngine::verify` free of the axum layer that calls it.

use crate::crypto::{self, Algorithm, KeyPair, Signature};
use crate::nonce::NonceStore;
use crate::trust::FederationTrustLedger;
use agentkern_govconfig::ConfigSnapshot;
use agentkern_govcore::{AgentId, CoreError, CoreResult, RemoteInstanceId};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{info, warn};
use uuid::Uuid;

type HmacSha256 = Hmac<Sha256>;

pub const STEP_TIMEOUT_SECONDS: i64 = 30;
pub const TOTAL_TIMEOUT_SECONDS: i64 = 180;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HandshakeState {
    Init,
    HelloSent,
    HelloReceived,
    ChallengeSent,
    ChallengeReceived,
    ProofSent,
    ProofReceived,
    Verified,
    AttestationSent,
    AttestationReceived,
    Accepted,
    Rejected,
    Errored,
    TimedOut,
}

impl HandshakeState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            HandshakeState::Accepted
                | HandshakeState::Rejected
                | HandshakeState::Errored
                | HandshakeState::TimedOut
        )
    }

    /// Whether `self -> to` is a legal transition per spec §4.4's state
    /// table. Error and timeout are absorbing from every non-terminal
    /// state; `Verified` can go straight to `Rejected` without an
    /// attestation round if the weighted trust score misses threshold.
    fn can_transition_to(self, to: HandshakeState) -> bool {
        use HandshakeState::*;
        if matches!(to, Errored | TimedOut) {
            return !self.is_terminal();
        }
        matches!(
            (self, to),
            (Init, HelloSent)
                | (Init, HelloReceived)
                | (HelloSent, ChallengeReceived)
                | (HelloReceived, ChallengeSent)
                | (ChallengeSent, ProofReceived)
                | (ChallengeReceived, ProofSent)
                | (ProofSent, Verified)
                | (ProofReceived, Verified)
                | (Verified, AttestationSent)
                | (Verified, AttestationReceived)
                | (Verified, Rejected)
                | (AttestationSent, Accepted)
                | (AttestationSent, Rejected)
                | (AttestationReceived, Accepted)
                | (AttestationReceived, Rejected)
        )
    }
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum HandshakeError {
    #[error("illegal transition from {from:?} to {attempted:?}")]
    InvalidTransition {
        from: HandshakeState,
        attempted: HandshakeState,
    },
    #[error("handshake step timed out after {0}s")]
    StepTimeout(i64),
    #[error("handshake exceeded total budget of {0}s")]
    TotalTimeout(i64),
    #[error("nonce replay detected")]
    ReplayDetected,
    #[error("signature verification failed: {0}")]
    Crypto(#[from] crate::crypto::CryptoError),
    #[error("weighted trust {trust} below minimum {minimum}")]
    BelowMinimumTrust { trust: f64, minimum: f64 },
}

impl From<HandshakeError> for CoreError {
    fn from(err: HandshakeError) -> Self {
        match err {
            HandshakeError::InvalidTransition { from, attempted } => CoreError::InvalidStateTransition {
                from: format!("{from:?}"),
                attempted: format!("{attempted:?}"),
            },
            HandshakeError::StepTimeout(s) => CoreError::Timeout {
                elapsed_ms: (s * 1000) as u64,
                deadline_ms: (STEP_TIMEOUT_SECONDS * 1000) as u64,
            },
            HandshakeError::TotalTimeout(s) => CoreError::Timeout {
                elapsed_ms: (s * 1000) as u64,
                deadline_ms: (TOTAL_TIMEOUT_SECONDS * 1000) as u64,
            },
            HandshakeError::ReplayDetected => CoreError::ReplayDetected("handshake nonce".into()),
            HandshakeError::Crypto(e) => CoreError::VerificationFailed(e.to_string()),
            HandshakeError::BelowMinimumTrust { trust, minimum } => {
                CoreError::VerificationFailed(format!("trust {trust} below minimum {minimum}"))
            }
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HandshakeSession {
    pub session_id: String,
    pub remote_instance_id: RemoteInstanceId,
    pub agent_id: AgentId,
    pub state: HandshakeState,
    pub nonce: Option<String>,
    pub audit_hash: Option<String>,
    pub trust_score: Option<f64>,
    pub started_at: DateTime<Utc>,
    pub last_step_at: DateTime<Utc>,
}

impl HandshakeSession {
    pub fn new(remote_instance_id: RemoteInstanceId, agent_id: AgentId) -> Self {
        let now = Utc::now();
        Self {
            session_id: Uuid::new_v4().to_string(),
            remote_instance_id,
            agent_id,
            state: HandshakeState::Init,
            nonce: None,
            audit_hash: None,
            trust_score: None,
            started_at: now,
            last_step_at: now,
        }
    }

    fn check_timeouts(&self, now: DateTime<Utc>) -> Result<(), HandshakeError> {
        let since_step = (now - self.last_step_at).num_seconds();
        if since_step > STEP_TIMEOUT_SECONDS {
            return Err(HandshakeError::StepTimeout(since_step));
        }
        let since_start = (now - self.started_at).num_seconds();
        if since_start > TOTAL_TIMEOUT_SECONDS {
            return Err(HandshakeError::TotalTimeout(since_start));
        }
        Ok(())
    }

    fn transition(&mut self, to: HandshakeState) -> Result<(), HandshakeError> {
        let now = Utc::now();
        self.check_timeouts(now)?;
        if !self.state.can_transition_to(to) {
            return Err(HandshakeError::InvalidTransition {
                from: self.state,
                attempted: to,
            });
        }
        self.state = to;
        self.last_step_at = now;
        Ok(())
    }
}

#[async_trait]
pub trait HandshakeSessionStore: Send + Sync {
    async fn save(&self, session: &HandshakeSession) -> CoreResult<()>;
    async fn load(&self, session_id: &str) -> CoreResult<Option<HandshakeSession>>;
    async fn list_incomplete(&self) -> CoreResult<Vec<HandshakeSession>>;
}

#[derive(Debug, Default)]
pub struct InMemoryHandshakeSessionStore {
    sessions: RwLock<HashMap<String, HandshakeSession>>,
}

impl InMemoryHandshakeSessionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl HandshakeSessionStore for InMemoryHandshakeSessionStore {
    async fn save(&self, session: &HandshakeSession) -> CoreResult<()> {
        self.sessions
            .write()
            .await
            .insert(session.session_id.clone(), session.clone());
        Ok(())
    }

    async fn load(&self, session_id: &str) -> CoreResult<Option<HandshakeSession>> {
        Ok(self.sessions.read().await.get(session_id).cloned())
    }

    async fn list_incomplete(&self) -> CoreResult<Vec<HandshakeSession>> {
        Ok(self
            .sessions
            .read()
            .await
            .values()
            .filter(|s| !s.state.is_terminal())
            .cloned()
            .collect())
    }
}

/// Signals fed into the VERIFY step's weighted trust formula (spec
/// §4.4): `trust = 0.40*audit + 0.30*reputation + 0.20*freshness +
/// 0.10*history`, using the tenant's configured `jury_weights` (the
/// same four-factor weighting C1 validates sums to 1.0).
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct TrustSignals {
    pub audit_score: f64,
    pub reputation_score: f64,
    pub freshness_score: f64,
    pub history_score: f64,
}

/// Result of a completed ATTESTATION step: the economic cost levied
/// against the remote instance's settlement account for the trust
/// asserted this round.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AttestationCost {
    pub trust_tax: f64,
}

/// Drives the six-step protocol for a single session. Transport-
/// agnostic: the caller (a WebSocket handler, or the `federation
/// handshake` CLI in dev/single-process mode) is responsible for
/// exchanging the wire payloads these methods produce and consume.
pub struct HandshakeEngine {
    pub trust_ledger: Arc<FederationTrustLedger>,
    pub nonce_store: Arc<NonceStore>,
    pub session_store: Arc<dyn HandshakeSessionStore>,
}

impl HandshakeEngine {
    pub fn new(
        trust_ledger: Arc<FederationTrustLedger>,
        nonce_store: Arc<NonceStore>,
        session_store: Arc<dyn HandshakeSessionStore>,
    ) -> Self {
        Self {
            trust_ledger,
            nonce_store,
            session_store,
        }
    }

    /// Step 1/2 (HELLO): opens a session and marks it as having sent
    /// its hello.
    pub async fn step_hello(
        &self,
        remote_instance_id: RemoteInstanceId,
        agent_id: AgentId,
    ) -> Result<HandshakeSession, HandshakeError> {
        let mut session = HandshakeSession::new(remote_instance_id, agent_id);
        session.transition(HandshakeState::HelloSent)?;
        self.session_store.save(&session).await.ok();
        info!(session_id = %session.session_id, "handshake HELLO sent");
        Ok(session)
    }

    /// Step 3/4 (CHALLENGE): binds a fresh nonce into the session with
    /// an HMAC-SHA256 tag so a responder can prove possession of a
    /// shared or derived key without the nonce traveling unauthenticated.
    pub async fn step_challenge(
        &self,
        session: &mut HandshakeSession,
        hmac_key: &[u8],
    ) -> Result<String, HandshakeError> {
        session.transition(HandshakeState::ChallengeReceived)?;
        let nonce = Uuid::new_v4().to_string();

        let mut mac = HmacSha256::new_from_slice(hmac_key).expect("HMAC accepts any key length");
        mac.update(nonce.as_bytes());
        let tag = hex::encode(mac.finalize().into_bytes());

        session.nonce = Some(nonce.clone());
        self.session_store.save(session).await.ok();
        Ok(format!("{nonce}.{tag}"))
    }

    /// Step 5/6 (PROOF): the responder signs `challenge` and supplies
    /// a hash standing in for a zero-knowledge audit proof; this side
    /// verifies the signature, the HMAC binding, and replay-freshness
    /// of the nonce.
    pub async fn step_proof(
        &self,
        session: &mut HandshakeSession,
        challenge: &str,
        hmac_key: &[u8],
        remote_public_key_b64: &str,
        remote_algorithm: Algorithm,
        signature: &Signature,
        audit_hash: String,
    ) -> Result<(), HandshakeError> {
        let (nonce, tag) = challenge
            .split_once('.')
            .ok_or(HandshakeError::ReplayDetected)?;

        let mut mac = HmacSha256::new_from_slice(hmac_key).expect("HMAC accepts any key length");
        mac.update(nonce.as_bytes());
        let expected_tag = hex::encode(mac.finalize().into_bytes());
        if expected_tag != tag {
            return Err(HandshakeError::ReplayDetected);
        }

        if !self.nonce_store.mark_used(nonce).await {
            return Err(HandshakeError::ReplayDetected);
        }

        crypto::verify(remote_public_key_b64, remote_algorithm, nonce.as_bytes(), signature)?;

        session.transition(HandshakeState::ProofSent)?;
        session.audit_hash = Some(audit_hash);
        self.session_store.save(session).await.ok();
        Ok(())
    }

    /// Produces a PROOF step payload for the initiator side: signs the
    /// nonce portion of `challenge` and hashes `audit_payload` to
    /// stand in for the zero-knowledge audit proof.
    pub fn make_proof(keypair: &KeyPair, challenge: &str, audit_payload: &[u8]) -> Result<(Signature, String), HandshakeError> {
        use sha2::Digest;
        let (nonce, _tag) = challenge.split_once('.').unwrap_or((challenge, ""));
        let signature = crypto::sign(keypair, nonce.as_bytes())?;
        let mut hasher = Sha256::new();
        hasher.update(audit_payload);
        let audit_hash = hex::encode(hasher.finalize());
        Ok((signature, audit_hash))
    }

    /// VERIFY step: computes the weighted trust score and records the
    /// session's verdict-in-progress. Transitions straight to
    /// `Rejected` if the score misses `min_handshake_trust`.
    pub async fn step_verify(
        &self,
        session: &mut HandshakeSession,
        signals: TrustSignals,
        cfg: &ConfigSnapshot,
    ) -> Result<f64, HandshakeError> {
        session.transition(HandshakeState::Verified)?;

        let w = &cfg.jury_weights;
        let trust = w.audit * signals.audit_score
            + w.reputation * signals.reputation_score
            + w.attestation * signals.freshness_score
            + w.history * signals.history_score;
        session.trust_score = Some(trust);
        self.session_store.save(session).await.ok();

        if trust < cfg.min_handshake_trust {
            session.transition(HandshakeState::Rejected)?;
            self.session_store.save(session).await.ok();
            warn!(session_id = %session.session_id, trust, "handshake rejected below minimum trust");
        }
        Ok(trust)
    }

    /// ATTESTATION step: levies a trust tax proportional to the
    /// remaining distrust (`1 - trust`), the same "cost scales with
    /// risk" shape as the escrow gate's socket meter.
    pub async fn step_attestation(
        &self,
        session: &mut HandshakeSession,
        cfg: &ConfigSnapshot,
    ) -> Result<AttestationCost, HandshakeError> {
        let trust = session.trust_score.unwrap_or(0.0);
        session.transition(HandshakeState::AttestationSent)?;
        self.session_store.save(session).await.ok();

        let trust_tax = cfg.economic.trust_tax_base * (1.0 - trust.clamp(0.0, 1.0));
        Ok(AttestationCost { trust_tax })
    }

    /// RESULT step: final verdict against `min_handshake_trust`,
    /// records the outcome into the trust ledger, and returns whether
    /// the remote instance was accepted.
    pub async fn step_result(&self, session: &mut HandshakeSession, cfg: &ConfigSnapshot) -> Result<bool, HandshakeError> {
        let trust = session.trust_score.unwrap_or(0.0);
        let accepted = trust >= cfg.min_handshake_trust;

        session.transition(if accepted {
            HandshakeState::Accepted
        } else {
            HandshakeState::Rejected
        })?;
        self.session_store.save(session).await.ok();

        self.trust_ledger
            .record_handshake_outcome(&session.remote_instance_id, trust, accepted, cfg)
            .await;

        info!(session_id = %session.session_id, trust, accepted, "handshake RESULT recorded");
        Ok(accepted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::generate_keypair;

    fn cfg() -> ConfigSnapshot {
        ConfigSnapshot::default()
    }

    fn engine() -> HandshakeEngine {
        HandshakeEngine::new(
            Arc::new(FederationTrustLedger::new()),
            Arc::new(NonceStore::new()),
            Arc::new(InMemoryHandshakeSessionStore::new()),
        )
    }

    #[tokio::test]
    async fn happy_path_end_to_end_accepts() {
        let engine = engine();
        let cfg = cfg();
        let remote = RemoteInstanceId::from("remote-a");
        let agent = AgentId::from("agent-1");
        let hmac_key = b"shared-secret";

        let mut session = engine.step_hello(remote, agent).await.unwrap();
        let challenge = engine.step_challenge(&mut session, hmac_key).await.unwrap();

        let keypair = generate_keypair(Algorithm::Ed25519);
        let (signature, audit_hash) = HandshakeEngine::make_proof(&keypair, &challenge, b"audit-payload").unwrap();

        engine
            .step_proof(&mut session, &challenge, hmac_key, &keypair.public_key_b64, Algorithm::Ed25519, &signature, audit_hash)
            .await
            .unwrap();

        let trust = engine
            .step_verify(
                &mut session,
                TrustSignals {
                    audit_score: 0.9,
                    reputation_score: 0.9,
                    freshness_score: 0.9,
                    history_score: 0.9,
                },
                &cfg,
            )
            .await
            .unwrap();
        assert!(trust >= cfg.min_handshake_trust);

        let cost = engine.step_attestation(&mut session, &cfg).await.unwrap();
        assert!(cost.trust_tax >= 0.0);

        let accepted = engine.step_result(&mut session, &cfg).await.unwrap();
        assert!(accepted);
        assert_eq!(session.state, HandshakeState::Accepted);
    }

    #[tokio::test]
    async fn low_trust_signals_reject_before_attestation() {
        let engine = engine();
        let cfg = cfg();
        let remote = RemoteInstanceId::from("remote-a");
        let agent = AgentId::from("agent-1");
        let hmac_key = b"shared-secret";

        let mut session = engine.step_hello(remote, agent).await.unwrap();
        let challenge = engine.step_challenge(&mut session, hmac_key).await.unwrap();
        let keypair = generate_keypair(Algorithm::Ed25519);
        let (signature, audit_hash) = HandshakeEngine::make_proof(&keypair, &challenge, b"audit-payload").unwrap();
        engine
            .step_proof(&mut session, &challenge, hmac_key, &keypair.public_key_b64, Algorithm::Ed25519, &signature, audit_hash)
            .await
            .unwrap();

        let trust = engine
            .step_verify(
                &mut session,
                TrustSignals {
                    audit_score: 0.1,
                    reputation_score: 0.1,
                    freshness_score: 0.1,
                    history_score: 0.1,
                },
                &cfg,
            )
            .await
            .unwrap();
        assert!(trust < cfg.min_handshake_trust);
        assert_eq!(session.state, HandshakeState::Rejected);

        assert!(engine.step_attestation(&mut session, &cfg).await.is_err());
    }

    #[tokio::test]
    async fn replayed_nonce_is_rejected() {
        let engine = engine();
        let remote = RemoteInstanceId::from("remote-a");
        let agent = AgentId::from("agent-1");
        let hmac_key = b"shared-secret";

        let mut session_a = engine.step_hello(remote.clone(), agent.clone()).await.unwrap();
        let challenge = engine.step_challenge(&mut session_a, hmac_key).await.unwrap();
        let keypair = generate_keypair(Algorithm::Ed25519);
        let (sig, hash) = HandshakeEngine::make_proof(&keypair, &challenge, b"payload").unwrap();
        engine
            .step_proof(&mut session_a, &challenge, hmac_key, &keypair.public_key_b64, Algorithm::Ed25519, &sig, hash.clone())
            .await
            .unwrap();

        let mut session_b = HandshakeSession::new(remote, agent);
        session_b.transition(HandshakeState::HelloSent).unwrap();
        session_b.transition(HandshakeState::ChallengeReceived).unwrap();
        session_b.nonce = Some(challenge.split_once('.').unwrap().0.to_string());

        let result = engine
            .step_proof(&mut session_b, &challenge, hmac_key, &keypair.public_key_b64, Algorithm::Ed25519, &sig, hash)
            .await;
        assert_eq!(result, Err(HandshakeError::ReplayDetected));
    }

    #[tokio::test]
    async fn wrong_algorithm_signature_is_rejected_at_proof() {
        let engine = engine();
        let remote = RemoteInstanceId::from("remote-a");
        let agent = AgentId::from("agent-1");
        let hmac_key = b"shared-secret";

        let mut session = engine.step_hello(remote, agent).await.unwrap();
        let challenge = engine.step_challenge(&mut session, hmac_key).await.unwrap();

        let ed_keypair = generate_keypair(Algorithm::Ed25519);
        let (nonce, _) = challenge.split_once('.').unwrap();
        let ed_sig = crypto::sign(&ed_keypair, nonce.as_bytes()).unwrap();

        let p256_keypair = generate_keypair(Algorithm::EcdsaP256);

        let result = engine
            .step_proof(&mut session, &challenge, hmac_key, &p256_keypair.public_key_b64, Algorithm::EcdsaP256, &ed_sig, "hash".into())
            .await;
        assert!(matches!(result, Err(HandshakeError::Crypto(_))));
    }
}
