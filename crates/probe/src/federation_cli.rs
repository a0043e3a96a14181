//! `federation handshake <remote-addr> <agent>` — the one-shot CLI
//! client named in spec §6.
//!
//! Per the "Resumable handshakes" design note (spec §9): one state
//! machine, an injected transport. This process has no real peer to
//! dial (the kernel-side protocol gateway that would carry the
//! handshake over the wire is out of scope), so the CLI drives both
//! sides of the loopback transport in a single process — exactly the
//! "in-memory simulation" path the design note says must share the
//! same state machine as the real one, not duplicate it. `<remote-addr>`
//! names the simulated peer's instance id.

use agentkern_federation::{
    crypto::{generate_keypair, Algorithm},
    FederationTrustLedger, HandshakeEngine, InMemoryHandshakeSessionStore, NonceStore, TrustSignals,
};
use agentkern_govconfig::ConfigSnapshot;
use agentkern_govcore::{AgentId, RemoteInstanceId};
use std::process::ExitCode;
use std::sync::Arc;

pub async fn run(args: &[String]) -> ExitCode {
    let (remote_addr, agent) = match (args.first(), args.get(1)) {
        (Some(remote_addr), Some(agent)) => (remote_addr.clone(), agent.clone()),
        _ => {
            eprintln!("usage: probe federation handshake <remote-addr> <agent>");
            return ExitCode::from(1);
        }
    };

    let cfg = ConfigSnapshot::default();
    let engine = HandshakeEngine::new(
        Arc::new(FederationTrustLedger::new()),
        Arc::new(NonceStore::new()),
        Arc::new(InMemoryHandshakeSessionStore::new()),
    );

    let remote = RemoteInstanceId::from(remote_addr.clone());
    let agent_id = AgentId::from(agent.clone());
    let hmac_key = remote_addr.as_bytes();

    let mut session = match engine.step_hello(remote, agent_id).await {
        Ok(session) => session,
        Err(err) => {
            eprintln!("HELLO failed: {err}");
            return ExitCode::from(2);
        }
    };
    println!("HELLO   session={} state={:?}", session.session_id, session.state);

    let challenge = match engine.step_challenge(&mut session, hmac_key).await {
        Ok(challenge) => challenge,
        Err(err) => {
            eprintln!("CHALLENGE failed: {err}");
            return ExitCode::from(2);
        }
    };
    println!("CHALLENGE issued");

    let keypair = generate_keypair(Algorithm::Ed25519);
    let (signature, audit_hash) = match HandshakeEngine::make_proof(&keypair, &challenge, remote_addr.as_bytes()) {
        Ok(proof) => proof,
        Err(err) => {
            eprintln!("PROOF construction failed: {err}");
            return ExitCode::from(2);
        }
    };

    if let Err(err) = engine
        .step_proof(
            &mut session,
            &challenge,
            hmac_key,
            &keypair.public_key_b64,
            Algorithm::Ed25519,
            &signature,
            audit_hash,
        )
        .await
    {
        eprintln!("PROOF failed: {err}");
        return ExitCode::from(2);
    }
    println!("PROOF   verified state={:?}", session.state);

    // Dev-mode trust signals: a real deployment sources these from the
    // audit store, C2's reputation score, handshake freshness, and C3's
    // history, same as the worked example in spec §8.
    let signals = TrustSignals {
        audit_score: 0.9,
        reputation_score: 0.85,
        freshness_score: 1.0,
        history_score: 0.75,
    };
    let trust = match engine.step_verify(&mut session, signals, &cfg).await {
        Ok(trust) => trust,
        Err(err) => {
            eprintln!("VERIFY failed: {err}");
            return ExitCode::from(2);
        }
    };
    println!("VERIFY  trust={trust:.4} state={:?}", session.state);

    if session.state == agentkern_federation::HandshakeState::Rejected {
        println!("RESULT  accepted=false (rejected below minimum trust)");
        return ExitCode::SUCCESS;
    }

    let cost = match engine.step_attestation(&mut session, &cfg).await {
        Ok(cost) => cost,
        Err(err) => {
            eprintln!("ATTESTATION failed: {err}");
            return ExitCode::from(2);
        }
    };
    println!("ATTEST  trust_tax={:.4}", cost.trust_tax);

    match engine.step_result(&mut session, &cfg).await {
        Ok(accepted) => {
            println!("RESULT  accepted={accepted}");
            ExitCode::SUCCESS
        }
        Err(err) => {
            eprintln!("RESULT failed: {err}");
            ExitCode::from(2)
        }
    }
}
