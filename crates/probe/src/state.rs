//! Shared application state, composed once at startup and handed to
//! every axum handler behind an `Arc` — the same `AppState` shape
//! `packages/gate/src/bin/server.rs` and `packages/arbiter/src/bin/server.rs`
//! wrap their engines in.

use agentkern_escrow::EscrowGate;
use agentkern_federation::{
    AttestationLog, FederationTrustLedger, HandshakeEngine, InMemoryHandshakeSessionStore, NonceStore,
    NONCE_SWEEP_INTERVAL_SECONDS,
};
use agentkern_govconfig::{ConfigCache, InMemoryConfigStore};
use agentkern_reputation::{InMemoryReputationStore, ReputationLedger, DECAY_SWEEP_INTERVAL_SECONDS};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::defaults::{AutoApproveJury, LoggingCompensationExecutor, ShannonEntropyMonitor};

/// Default size of the escrow gate's inbound worker pool (spec §5:
/// "a fixed-size worker pool (default 10)").
pub const DEFAULT_ESCROW_WORKERS: usize = 10;
/// Default `AwaitRelease` deadline for the HTTP surface when a caller
/// doesn't specify one.
pub const DEFAULT_AWAIT_DEADLINE: Duration = Duration::from_secs(30);

pub struct AppState {
    pub config: Arc<ConfigCache>,
    pub reputation: Arc<ReputationLedger>,
    pub escrow: Arc<EscrowGate>,
    pub handshake: Arc<HandshakeEngine>,
    pub attestations: Arc<AttestationLog>,
    pub started_at: chrono::DateTime<chrono::Utc>,
    requests_total: AtomicU64,
}

impl AppState {
    /// Wires C1-C5 together with the in-memory reference stores (spec
    /// Non-goals: "no direct persistence... in-memory reference
    /// implementation for tests"). A production deployment swaps the
    /// `ConfigStore`/`ReputationStore`/`HandshakeSessionStore` backends
    /// per `REPUTATION_BACKEND`/`GOVERNANCE_CONFIG_STORE_URL` without
    /// touching this wiring shape.
    pub fn wire(escrow_queue_capacity: usize) -> Arc<Self> {
        let config = Arc::new(ConfigCache::new(Arc::new(InMemoryConfigStore::new())));
        let reputation = Arc::new(ReputationLedger::new(Arc::new(InMemoryReputationStore::new())));

        let escrow = EscrowGate::new(
            config.clone(),
            reputation.clone(),
            Arc::new(AutoApproveJury),
            Arc::new(ShannonEntropyMonitor),
            Arc::new(LoggingCompensationExecutor),
            escrow_queue_capacity,
        );
        escrow.spawn_workers(DEFAULT_ESCROW_WORKERS);

        let nonce_store = Arc::new(NonceStore::new());
        let handshake = Arc::new(HandshakeEngine::new(
            Arc::new(FederationTrustLedger::new()),
            nonce_store.clone(),
            Arc::new(InMemoryHandshakeSessionStore::new()),
        ));

        spawn_decay_sweeper(reputation.clone(), config.clone());
        spawn_nonce_sweeper(nonce_store);

        Arc::new(Self {
            config,
            reputation,
            escrow,
            handshake,
            attestations: Arc::new(AttestationLog::new()),
            started_at: chrono::Utc::now(),
            requests_total: AtomicU64::new(0),
        })
    }

    pub fn record_request(&self) {
        self.requests_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn requests_total(&self) -> u64 {
        self.requests_total.load(Ordering::Relaxed)
    }
}

/// Dedicated periodic task decaying every tenant's reputation scores
/// (spec §4.2, §5: "the decay sweeper... runs in its own task").
fn spawn_decay_sweeper(reputation: Arc<ReputationLedger>, config: Arc<ConfigCache>) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(DECAY_SWEEP_INTERVAL_SECONDS));
        interval.tick().await; // first tick fires immediately; skip it
        loop {
            interval.tick().await;
            match reputation.run_decay_sweep_all(&config).await {
                Ok(n) => info!(decayed = n, "reputation decay sweep complete"),
                Err(err) => warn!(%err, "reputation decay sweep failed"),
            }
        }
    });
}

/// Dedicated periodic task evicting expired handshake nonces (spec
/// §4.4: "background sweep every 60s").
fn spawn_nonce_sweeper(nonce_store: Arc<NonceStore>) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(NONCE_SWEEP_INTERVAL_SECONDS));
        interval.tick().await;
        loop {
            interval.tick().await;
            let swept = nonce_store.sweep_expired().await;
            if swept > 0 {
                info!(swept, "nonce sweep evicted expired entries");
            }
        }
    });
}
