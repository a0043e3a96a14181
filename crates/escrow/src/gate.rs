//! `EscrowGate` — C5's public surface: `Sequester`, `ProcessSignal`,
//! `AwaitRelease`, the bounded inbound queue, and the settlement path
//! that feeds the reputation ledger and the socket meter (spec §4.5).
//!
//! Locking discipline follows spec §5: the transaction map is guarded
//! by a single `tokio::sync::RwLock`, held only across the map
//! mutation itself — any reputation mutation, compensation run, or
//! jury/entropy call happens with the lock released, against a local
//! clone of the transaction, the same split
//! `packages/arbiter/src/locks.rs::LockManager` uses between its map
//! access and its eviction I/O.

use crate::compensation::run_compensation;
use crate::meter::SocketMeter;
use crate::policy::{policy_signal, required_signals};
use crate::transaction::{EscrowState, EscrowTransaction, SignalKind, SignalRecordOutcome};
use agentkern_govconfig::ConfigCache;
use agentkern_govcore::{
    AgentId, CompensationExecutor, CoreError, CoreResult, EntropyMonitor, JuryClient, RawEvent, TenantId,
};
use agentkern_reputation::ReputationLedger;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot, Mutex, Notify, RwLock};
use tracing::{info, warn};

/// Per-signal deadlines (spec §4.5: "the gate enforces its own
/// deadline" for the Jury/Entropy external calls). Jury verdicts may
/// be slow (an LLM-backed arbiter call); entropy scoring is a cheap
/// statistical check.
pub const JURY_SIGNAL_DEADLINE: Duration = Duration::from_secs(10);
pub const ENTROPY_SIGNAL_DEADLINE: Duration = Duration::from_secs(3);
/// Overall sequestration deadline: if the full signal quorum hasn't
/// landed by this point (most commonly because Identity, which has no
/// internal driver here, never arrived), the transaction times out.
pub const OVERALL_SEQUESTRATION_DEADLINE: Duration = Duration::from_secs(30);

#[derive(Debug, Error, Clone, PartialEq)]
pub enum EscrowError {
    #[error("transaction not found: {0}")]
    NotFound(String),
    #[error("transaction {0} is already in a terminal state")]
    AlreadyTerminal(String),
    #[error("signal {kind:?} already recorded with a different value")]
    SignalMismatch { kind: SignalKind },
}

impl From<EscrowError> for CoreError {
    fn from(err: EscrowError) -> Self {
        match err {
            EscrowError::NotFound(id) => CoreError::NotFound(id),
            EscrowError::AlreadyTerminal(id) => CoreError::InvalidStateTransition {
                from: "terminal".into(),
                attempted: format!("re-sequester {id}"),
            },
            EscrowError::SignalMismatch { kind } => CoreError::InvalidStateTransition {
                from: format!("{kind:?} already recorded"),
                attempted: format!("{kind:?} with a different value"),
            },
        }
    }
}

/// The Escrow Gate. Constructed once per process and shared behind an
/// `Arc` so the inbound-queue workers, the jury/entropy signal tasks,
/// and any HTTP handlers can all hold a reference.
pub struct EscrowGate {
    config: Arc<ConfigCache>,
    reputation: Arc<ReputationLedger>,
    jury: Arc<dyn JuryClient>,
    entropy: Arc<dyn EntropyMonitor>,
    compensation: Arc<dyn CompensationExecutor>,
    meter: SocketMeter,
    transactions: RwLock<HashMap<String, EscrowTransaction>>,
    waiters: RwLock<HashMap<String, Arc<Notify>>>,
    queue_tx: mpsc::Sender<RawEvent>,
    queue_rx: Mutex<mpsc::Receiver<RawEvent>>,
    dropped: AtomicU64,
}

impl EscrowGate {
    pub fn new(
        config: Arc<ConfigCache>,
        reputation: Arc<ReputationLedger>,
        jury: Arc<dyn JuryClient>,
        entropy: Arc<dyn EntropyMonitor>,
        compensation: Arc<dyn CompensationExecutor>,
        queue_capacity: usize,
    ) -> Arc<Self> {
        let (queue_tx, queue_rx) = mpsc::channel(queue_capacity);
        Arc::new(Self {
            meter: SocketMeter::new(reputation.clone()),
            config,
            reputation,
            jury,
            entropy,
            compensation,
            transactions: RwLock::new(HashMap::new()),
            waiters: RwLock::new(HashMap::new()),
            queue_tx,
            queue_rx: Mutex::new(queue_rx),
            dropped: AtomicU64::new(0),
        })
    }

    /// Enqueues a raw event for sequestration. Never blocks the
    /// producer (spec §4.5 "Backpressure"): when the bounded queue is
    /// full the event is dropped and the drop counter increments.
    pub fn submit(&self, event: RawEvent) -> bool {
        match self.queue_tx.try_send(event) {
            Ok(()) => true,
            Err(_) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                warn!("escrow inbound queue full, event dropped");
                false
            }
        }
    }

    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    pub fn queue_depth(&self) -> usize {
        self.queue_tx.max_capacity() - self.queue_tx.capacity()
    }

    /// Spawns `worker_count` tasks draining the bounded inbound queue
    /// and sequestering each event in turn. Multiple workers share one
    /// `mpsc::Receiver` behind a mutex — the lock is held only across
    /// the `recv` call itself, not the sequestration work that follows.
    pub fn spawn_workers(self: &Arc<Self>, worker_count: usize) {
        for worker_id in 0..worker_count {
            let gate = self.clone();
            tokio::spawn(async move {
                loop {
                    let event = {
                        let mut rx = gate.queue_rx.lock().await;
                        rx.recv().await
                    };
                    match event {
                        Some(event) => {
                            if let Err(err) = gate.sequester(event).await {
                                warn!(worker_id, %err, "failed to sequester event");
                            }
                        }
                        None => {
                            info!(worker_id, "escrow worker shutting down: queue closed");
                            break;
                        }
                    }
                }
            });
        }
    }

    /// `Sequester(tx_id, tenant, agent, payload)`: opens a HELD
    /// transaction, derives its required signal set from tool
    /// classification, and records the synchronous Policy signal.
    /// Returns immediately; asynchronous signals are gathered in the
    /// background and `AwaitRelease` is used to observe the verdict.
    pub async fn sequester(self: &Arc<Self>, event: RawEvent) -> CoreResult<String> {
        let cfg = self.config.get_config(&event.tenant_id).await;
        let trust = self
            .reputation
            .get_score(&event.tenant_id, &event.agent_id, &cfg)
            .await
            .unwrap_or(cfg.new_agent_default_score);

        let (class, policy_ok) = policy_signal(&event.tool_class, trust, &cfg);
        let mut tx = EscrowTransaction::new(
            event.tenant_id.clone(),
            event.agent_id.clone(),
            event.tool_id.clone(),
            event.tool_class.clone(),
            event.payload.clone(),
            required_signals(class),
        );
        tx.transaction_id = event.transaction_id.clone();
        tx.record_signal(SignalKind::Policy, policy_ok);
        let tx_id = tx.transaction_id.clone();

        // `any_rejected` is independent of quorum completeness: a
        // failing Policy signal decides the transaction immediately,
        // even though Class-B requires three more signals to reach
        // quorum.
        let already_decided = tx.any_rejected() || (tx.has_quorum() && tx.all_approved());
        self.transactions.write().await.insert(tx_id.clone(), tx);
        self.waiters
            .write()
            .await
            .entry(tx_id.clone())
            .or_insert_with(|| Arc::new(Notify::new()));

        info!(tenant_id = %event.tenant_id, agent_id = %event.agent_id, tx_id = %tx_id, tool_class = %event.tool_class, policy_ok, "escrow transaction sequestered");

        if already_decided {
            self.resolve_if_decided(&tx_id).await;
            return Ok(tx_id);
        }

        self.spawn_jury_signal(tx_id.clone(), event.payload.clone());
        self.spawn_entropy_signal(tx_id.clone(), event.payload.clone());
        self.spawn_overall_deadline(tx_id.clone());
        Ok(tx_id)
    }

    fn spawn_jury_signal(self: &Arc<Self>, tx_id: String, payload: serde_json::Value) {
        let gate = self.clone();
        tokio::spawn(async move {
            let verdict = tokio::time::timeout(JURY_SIGNAL_DEADLINE, gate.jury.request_verdict(&tx_id, &payload))
                .await
                .unwrap_or(Ok(false)) // unreachable past its deadline -> Jury=false (spec §4.5)
                .unwrap_or_else(|err| {
                    warn!(tx_id, %err, "jury client error, treating as rejection");
                    false
                });
            let _ = gate.process_signal(&tx_id, SignalKind::Jury, verdict).await;
        });
    }

    fn spawn_entropy_signal(self: &Arc<Self>, tx_id: String, payload: serde_json::Value) {
        let gate = self.clone();
        tokio::spawn(async move {
            let tenant_id = {
                let txs = gate.transactions.read().await;
                match txs.get(&tx_id) {
                    Some(tx) => tx.tenant_id.clone(),
                    None => return,
                }
            };
            let cfg = gate.config.get_config(&tenant_id).await;
            let score = tokio::time::timeout(ENTROPY_SIGNAL_DEADLINE, gate.entropy.score(&payload))
                .await
                .unwrap_or(1.0); // unreachable past deadline: treat as maximally anomalous
            let ok = score < cfg.entropy_threshold;
            let _ = gate.process_signal(&tx_id, SignalKind::Entropy, ok).await;
        });
    }

    fn spawn_overall_deadline(self: &Arc<Self>, tx_id: String) {
        let gate = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(OVERALL_SEQUESTRATION_DEADLINE).await;
            gate.finalize(&tx_id, EscrowState::Rejected, Some("timeout".to_string()))
                .await;
        });
    }

    /// `ProcessSignal(tx_id, kind, value)`. Idempotent on a repeated
    /// identical value; rejects a repeated signal that disagrees with
    /// the first recorded value.
    pub async fn process_signal(self: &Arc<Self>, tx_id: &str, kind: SignalKind, value: bool) -> CoreResult<()> {
        let outcome = {
            let mut txs = self.transactions.write().await;
            let tx = txs
                .get_mut(tx_id)
                .ok_or_else(|| EscrowError::NotFound(tx_id.to_string()))?;
            if tx.state != EscrowState::Held {
                return Err(EscrowError::AlreadyTerminal(tx_id.to_string()).into());
            }
            tx.record_signal(kind, value)
        };

        match outcome {
            SignalRecordOutcome::DuplicateMismatch => Err(EscrowError::SignalMismatch { kind }.into()),
            SignalRecordOutcome::DuplicateSame => Ok(()),
            SignalRecordOutcome::Applied => {
                self.resolve_if_decided(tx_id).await;
                Ok(())
            }
        }
    }

    /// Registers an undo label against a HELD transaction's
    /// compensation stack, for an embedder speculatively executing a
    /// Class-B action while awaiting release.
    pub async fn push_compensation(&self, tx_id: &str, label: impl Into<String>) -> CoreResult<()> {
        let mut txs = self.transactions.write().await;
        let tx = txs
            .get_mut(tx_id)
            .ok_or_else(|| EscrowError::NotFound(tx_id.to_string()))?;
        if tx.state != EscrowState::Held {
            return Err(EscrowError::AlreadyTerminal(tx_id.to_string()).into());
        }
        tx.push_compensation(label);
        Ok(())
    }

    async fn resolve_if_decided(self: &Arc<Self>, tx_id: &str) {
        let outcome = {
            let txs = self.transactions.read().await;
            txs.get(tx_id).and_then(|tx| {
                if tx.any_rejected() {
                    Some(EscrowState::Rejected)
                } else if tx.has_quorum() && tx.all_approved() {
                    Some(EscrowState::Released)
                } else {
                    None
                }
            })
        };
        if let Some(state) = outcome {
            self.finalize(tx_id, state, None).await;
        }
    }

    /// Transitions a HELD transaction to a terminal state exactly
    /// once, notifies any `AwaitRelease` waiters, then settles it
    /// (reputation mutation, compensation, socket meter) with the
    /// lock released.
    async fn finalize(self: &Arc<Self>, tx_id: &str, state: EscrowState, reason: Option<String>) {
        let settled = {
            let mut txs = self.transactions.write().await;
            match txs.get_mut(tx_id) {
                Some(tx) if tx.state == EscrowState::Held => {
                    tx.state = state;
                    tx.rejection_reason = reason;
                    tx.decided_at = Some(chrono::Utc::now());
                    Some(tx.clone())
                }
                _ => None,
            }
        };
        let Some(tx) = settled else { return };

        if let Some(notify) = self.waiters.read().await.get(tx_id) {
            notify.notify_waiters();
        }
        info!(tx_id, ?state, reason = tx.rejection_reason.as_deref(), "escrow transaction decided");
        self.settle(tx).await;
    }

    /// Background settlement: reputation reward/penalty, compensation
    /// run on rejection, and socket-meter billing. Failures here are
    /// logged, never propagated — the release/reject decision already
    /// stands (spec §4.5 failure semantics).
    async fn settle(self: &Arc<Self>, tx: EscrowTransaction) {
        let cfg = self.config.get_config(&tx.tenant_id).await;

        match tx.state {
            EscrowState::Released => {
                if let Err(err) = self
                    .reputation
                    .reward(&tx.tenant_id, &tx.agent_id, cfg.escrow_release_reward_points, &cfg)
                    .await
                {
                    warn!(tx_id = %tx.transaction_id, %err, "reputation reward failed, decision stands");
                }
            }
            EscrowState::Rejected => {
                if let Err(err) = self
                    .reputation
                    .penalize(&tx.tenant_id, &tx.agent_id, cfg.escrow_rejection_penalty_points, &cfg)
                    .await
                {
                    warn!(tx_id = %tx.transaction_id, %err, "reputation penalty failed, decision stands");
                }
                if !tx.compensation_stack.is_empty() {
                    let clean = run_compensation(self.compensation.as_ref(), &tx.compensation_stack).await;
                    let mut txs = self.transactions.write().await;
                    if let Some(stored) = txs.get_mut(&tx.transaction_id) {
                        stored.state = EscrowState::Compensated;
                        stored.compensation_failed = !clean;
                    }
                    drop(txs);
                    if let Some(notify) = self.waiters.read().await.get(&tx.transaction_id) {
                        notify.notify_waiters();
                    }
                }
            }
            _ => {}
        }

        let trust = self
            .reputation
            .get_score(&tx.tenant_id, &tx.agent_id, &cfg)
            .await
            .unwrap_or(cfg.new_agent_default_score);
        if let Err(err) = self
            .meter
            .meter_action(&tx.tenant_id, &tx.agent_id, &tx.tool_class, trust, &cfg)
            .await
        {
            warn!(tx_id = %tx.transaction_id, %err, "socket meter billing failed, decision stands");
        }
    }

    pub async fn get_transaction(&self, tx_id: &str) -> Option<EscrowTransaction> {
        self.transactions.read().await.get(tx_id).cloned()
    }

    /// `AwaitRelease(tx_id, ctx)`: blocks until the transaction reaches
    /// a terminal state, `deadline` elapses (returns `Rejected` with
    /// reason `"timeout"`), or `cancel` fires (returns `Rejected` with
    /// reason `"cancelled"`) — the two ways spec §5 allows a
    /// suspension point to resolve besides the normal outcome.
    pub async fn await_release(
        self: &Arc<Self>,
        tx_id: &str,
        deadline: Duration,
        mut cancel: Option<oneshot::Receiver<()>>,
    ) -> CoreResult<EscrowState> {
        let notify = {
            let mut waiters = self.waiters.write().await;
            waiters
                .entry(tx_id.to_string())
                .or_insert_with(|| Arc::new(Notify::new()))
                .clone()
        };

        loop {
            {
                let txs = self.transactions.read().await;
                match txs.get(tx_id) {
                    Some(tx) if tx.state.is_terminal() => return Ok(tx.state),
                    Some(_) => {}
                    None => return Err(EscrowError::NotFound(tx_id.to_string()).into()),
                }
            }

            // A `None` cancellation context becomes a future that never
            // resolves, so the `select!` below degrades to a plain
            // notify-or-timeout race.
            let cancel_fut = async {
                match cancel.as_mut() {
                    Some(rx) => {
                        let _ = rx.await;
                    }
                    None => std::future::pending::<()>().await,
                }
            };

            tokio::select! {
                _ = notify.notified() => continue,
                _ = tokio::time::sleep(deadline) => {
                    self.finalize(tx_id, EscrowState::Rejected, Some("timeout".to_string())).await;
                    let txs = self.transactions.read().await;
                    return Ok(txs.get(tx_id).map(|t| t.state).unwrap_or(EscrowState::Rejected));
                }
                _ = cancel_fut => {
                    self.finalize(tx_id, EscrowState::Rejected, Some("cancelled".to_string())).await;
                    let txs = self.transactions.read().await;
                    return Ok(txs.get(tx_id).map(|t| t.state).unwrap_or(EscrowState::Rejected));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agentkern_govconfig::{ConfigCache, InMemoryConfigStore};
    use agentkern_reputation::InMemoryReputationStore;
    use async_trait::async_trait;

    struct AlwaysApprovingJury;
    #[async_trait]
    impl JuryClient for AlwaysApprovingJury {
        async fn request_verdict(&self, _tx_id: &str, _payload: &serde_json::Value) -> CoreResult<bool> {
            Ok(true)
        }
    }

    struct AlwaysRejectingJury;
    #[async_trait]
    impl JuryClient for AlwaysRejectingJury {
        async fn request_verdict(&self, _tx_id: &str, _payload: &serde_json::Value) -> CoreResult<bool> {
            Ok(false)
        }
    }

    struct QuietEntropy;
    #[async_trait]
    impl EntropyMonitor for QuietEntropy {
        async fn score(&self, _payload: &serde_json::Value) -> f64 {
            0.01
        }
    }

    struct NoopCompensation;
    #[async_trait]
    impl CompensationExecutor for NoopCompensation {
        async fn run(&self, _label: &str) -> CoreResult<()> {
            Ok(())
        }
    }

    fn gate_with(jury: Arc<dyn JuryClient>) -> Arc<EscrowGate> {
        EscrowGate::new(
            Arc::new(ConfigCache::new(Arc::new(InMemoryConfigStore::new()))),
            Arc::new(ReputationLedger::new(Arc::new(InMemoryReputationStore::new()))),
            jury,
            Arc::new(QuietEntropy),
            Arc::new(NoopCompensation),
            1_000,
        )
    }

    fn event(tool_class: &str) -> RawEvent {
        RawEvent {
            transaction_id: uuid::Uuid::new_v4().to_string(),
            tenant_id: TenantId::from("acme"),
            agent_id: AgentId::from("agent-1"),
            tool_id: "tool-1".into(),
            tool_class: tool_class.into(),
            payload: serde_json::json!({"op": "noop"}),
        }
    }

    #[tokio::test]
    async fn class_a_releases_on_policy_alone() {
        let gate = gate_with(Arc::new(AlwaysApprovingJury));
        let tx_id = gate.sequester(event("read_only")).await.unwrap();
        let state = gate
            .await_release(&tx_id, Duration::from_secs(1), None)
            .await
            .unwrap();
        assert_eq!(state, EscrowState::Released);
    }

    #[tokio::test]
    async fn class_b_rejects_on_low_trust_policy_signal() {
        let gate = gate_with(Arc::new(AlwaysApprovingJury));
        let tx_id = gate.sequester(event("payment")).await.unwrap();
        let state = gate
            .await_release(&tx_id, Duration::from_secs(1), None)
            .await
            .unwrap();
        assert_eq!(state, EscrowState::Rejected);
    }

    #[tokio::test]
    async fn class_b_releases_when_every_signal_approves() {
        let gate = gate_with(Arc::new(AlwaysApprovingJury));
        let tenant = TenantId::from("acme");
        let agent = AgentId::from("agent-1");
        let cfg = agentkern_govconfig::ConfigSnapshot::default();
        gate.reputation.reward(&tenant, &agent, 1000.0, &cfg).await.unwrap();

        let tx_id = gate.sequester(event("payment")).await.unwrap();
        gate.process_signal(&tx_id, SignalKind::Identity, true).await.unwrap();

        let state = gate
            .await_release(&tx_id, Duration::from_secs(2), None)
            .await
            .unwrap();
        assert_eq!(state, EscrowState::Released);
    }

    #[tokio::test]
    async fn class_b_rejects_when_jury_votes_false() {
        let gate = gate_with(Arc::new(AlwaysRejectingJury));
        let tenant = TenantId::from("acme");
        let agent = AgentId::from("agent-1");
        let cfg = agentkern_govconfig::ConfigSnapshot::default();
        gate.reputation.reward(&tenant, &agent, 1000.0, &cfg).await.unwrap();

        let tx_id = gate.sequester(event("payment")).await.unwrap();
        gate.process_signal(&tx_id, SignalKind::Identity, true).await.unwrap();

        let state = gate
            .await_release(&tx_id, Duration::from_secs(2), None)
            .await
            .unwrap();
        assert_eq!(state, EscrowState::Rejected);
    }

    #[tokio::test]
    async fn mismatched_duplicate_signal_is_rejected() {
        let gate = gate_with(Arc::new(AlwaysApprovingJury));
        let tx_id = gate.sequester(event("payment")).await.unwrap();
        gate.process_signal(&tx_id, SignalKind::Identity, true).await.unwrap();
        let result = gate.process_signal(&tx_id, SignalKind::Identity, false).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn replaying_a_signal_after_terminal_state_is_rejected() {
        let gate = gate_with(Arc::new(AlwaysApprovingJury));
        let tx_id = gate.sequester(event("read_only")).await.unwrap();
        gate.await_release(&tx_id, Duration::from_secs(1), None).await.unwrap();
        let result = gate.process_signal(&tx_id, SignalKind::Policy, true).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn missing_signal_times_out_to_rejected() {
        let gate = gate_with(Arc::new(AlwaysApprovingJury));
        let tenant = TenantId::from("acme");
        let agent = AgentId::from("agent-1");
        let cfg = agentkern_govconfig::ConfigSnapshot::default();
        gate.reputation.reward(&tenant, &agent, 1000.0, &cfg).await.unwrap();

        // No Identity signal delivered: rely on the gate's own
        // background deadline firing well past our short await.
        let tx_id = gate.sequester(event("payment")).await.unwrap();
        let state = gate
            .await_release(&tx_id, Duration::from_millis(50), None)
            .await
            .unwrap();
        assert_eq!(state, EscrowState::Rejected);
        let tx = gate.get_transaction(&tx_id).await.unwrap();
        assert_eq!(tx.rejection_reason.as_deref(), Some("timeout"));
    }

    #[tokio::test]
    async fn cancellation_rejects_with_cancelled_reason() {
        let gate = gate_with(Arc::new(AlwaysApprovingJury));
        let tenant = TenantId::from("acme");
        let agent = AgentId::from("agent-1");
        let cfg = agentkern_govconfig::ConfigSnapshot::default();
        gate.reputation.reward(&tenant, &agent, 1000.0, &cfg).await.unwrap();

        let tx_id = gate.sequester(event("payment")).await.unwrap();
        let (cancel_tx, cancel_rx) = oneshot::channel();
        cancel_tx.send(()).unwrap();

        let state = gate
            .await_release(&tx_id, Duration::from_secs(5), Some(cancel_rx))
            .await
            .unwrap();
        assert_eq!(state, EscrowState::Rejected);
        let tx = gate.get_transaction(&tx_id).await.unwrap();
        assert_eq!(tx.rejection_reason.as_deref(), Some("cancelled"));
    }

    #[tokio::test]
    async fn backpressure_drops_events_past_capacity() {
        let gate = EscrowGate::new(
            Arc::new(ConfigCache::new(Arc::new(InMemoryConfigStore::new()))),
            Arc::new(ReputationLedger::new(Arc::new(InMemoryReputationStore::new()))),
            Arc::new(AlwaysApprovingJury),
            Arc::new(QuietEntropy),
            Arc::new(NoopCompensation),
            1,
        );
        assert!(gate.submit(event("read_only")));
        assert!(!gate.submit(event("read_only")));
        assert_eq!(gate.dropped_count(), 1);
    }
}
