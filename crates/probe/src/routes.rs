//! HTTP/WS surface realizing spec §6's `InterOCXHandshakeService` and
//! `PlanService`/`EscrowService` as typed JSON handlers, the same shape
//! `packages/gate/src/bin/server.rs` exposes `GateEngine::verify`
//! through. The gRPC method names from the spec map onto one route
//! per step; `/federation/ws` realizes the bidirectional
//! `PerformHandshake` stream.

use crate::state::{AppState, DEFAULT_AWAIT_DEADLINE};
use agentkern_federation::{
    AttestationEvent, AttestationVerdict, HandshakeSession, HandshakeSessionStore, TrustSignals,
};
use agentkern_govcore::{AgentId, RawEvent, RemoteInstanceId, TenantId};
use axum::extract::ws::{Message, WebSocket};
use axum::extract::{Path, State, WebSocketUpgrade};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use base64::{engine::general_purpose::STANDARD as B64, Engine as _};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tower_http::trace::TraceLayer;
use tracing::{error, warn};

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/metrics", get(metrics))
        .route("/escrow/sequester", post(escrow_sequester))
        .route("/escrow/signal", post(escrow_signal))
        .route("/escrow/await", post(escrow_await))
        .route("/escrow/transaction/:tx_id", get(escrow_get_transaction))
        .route("/federation/hello", post(federation_hello))
        .route("/federation/challenge", post(federation_challenge))
        .route("/federation/proof", post(federation_proof))
        .route("/federation/verify", post(federation_verify))
        .route("/federation/attestation", post(federation_attestation))
        .route("/federation/result", post(federation_result))
        .route("/federation/status/:session_id", get(federation_status))
        .route("/federation/ws", get(federation_ws))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    uptime_seconds: i64,
    escrow_queue_depth: usize,
    escrow_dropped: u64,
}

async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    state.record_request();
    Json(HealthResponse {
        status: "healthy",
        uptime_seconds: (chrono::Utc::now() - state.started_at).num_seconds(),
        escrow_queue_depth: state.escrow.queue_depth(),
        escrow_dropped: state.escrow.dropped_count(),
    })
}

/// Prometheus text-format export, grounded in
/// `packages/gate/src/observability.rs::prometheus_metrics`.
async fn metrics(State(state): State<Arc<AppState>>) -> String {
    state.record_request();
    format!(
        "# HELP agentkern_probe_requests_total Total HTTP requests served\n\
         # TYPE agentkern_probe_requests_total counter\n\
         agentkern_probe_requests_total {}\n\
         \n\
         # HELP agentkern_probe_escrow_queue_depth Current depth of the escrow inbound queue\n\
         # TYPE agentkern_probe_escrow_queue_depth gauge\n\
         agentkern_probe_escrow_queue_depth {}\n\
         \n\
         # HELP agentkern_probe_escrow_dropped_total Events dropped by the escrow gate's backpressure\n\
         # TYPE agentkern_probe_escrow_dropped_total counter\n\
         agentkern_probe_escrow_dropped_total {}\n",
        state.requests_total(),
        state.escrow.queue_depth(),
        state.escrow.dropped_count(),
    )
}

fn map_core_err(err: agentkern_govcore::CoreError) -> Response {
    error!(%err, "request failed");
    (StatusCode::BAD_REQUEST, err.to_string()).into_response()
}

#[derive(Debug, Deserialize)]
struct SequesterRequest {
    transaction_id: String,
    tenant_id: String,
    agent_id: String,
    tool_id: String,
    tool_class: String,
    #[serde(default)]
    payload: serde_json::Value,
}

#[derive(Debug, Serialize)]
struct SequesterResponse {
    transaction_id: String,
}

async fn escrow_sequester(
    State(state): State<Arc<AppState>>,
    Json(req): Json<SequesterRequest>,
) -> Result<Json<SequesterResponse>, Response> {
    state.record_request();
    let event = RawEvent {
        transaction_id: req.transaction_id,
        tenant_id: TenantId::from(req.tenant_id),
        agent_id: AgentId::from(req.agent_id),
        tool_id: req.tool_id,
        tool_class: req.tool_class,
        payload: req.payload,
    };
    let transaction_id = state.escrow.sequester(event).await.map_err(map_core_err)?;
    Ok(Json(SequesterResponse { transaction_id }))
}

#[derive(Debug, Deserialize)]
struct SignalRequest {
    transaction_id: String,
    kind: agentkern_escrow::SignalKind,
    value: bool,
}

async fn escrow_signal(
    State(state): State<Arc<AppState>>,
    Json(req): Json<SignalRequest>,
) -> Result<StatusCode, Response> {
    state.record_request();
    state
        .escrow
        .process_signal(&req.transaction_id, req.kind, req.value)
        .await
        .map_err(map_core_err)?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Deserialize)]
struct AwaitRequest {
    transaction_id: String,
    #[serde(default)]
    deadline_ms: Option<u64>,
}

#[derive(Debug, Serialize)]
struct AwaitResponse {
    state: agentkern_escrow::EscrowState,
}

async fn escrow_await(
    State(state): State<Arc<AppState>>,
    Json(req): Json<AwaitRequest>,
) -> Result<Json<AwaitResponse>, Response> {
    state.record_request();
    let deadline = req
        .deadline_ms
        .map(Duration::from_millis)
        .unwrap_or(DEFAULT_AWAIT_DEADLINE);
    let outcome = state
        .escrow
        .await_release(&req.transaction_id, deadline, None)
        .await
        .map_err(map_core_err)?;
    Ok(Json(AwaitResponse { state: outcome }))
}

async fn escrow_get_transaction(
    State(state): State<Arc<AppState>>,
    Path(tx_id): Path<String>,
) -> Result<Json<agentkern_escrow::EscrowTransaction>, StatusCode> {
    state.record_request();
    state
        .escrow
        .get_transaction(&tx_id)
        .await
        .map(Json)
        .ok_or(StatusCode::NOT_FOUND)
}

#[derive(Debug, Deserialize)]
struct HelloRequest {
    remote_instance_id: String,
    agent_id: String,
}

async fn federation_hello(
    State(state): State<Arc<AppState>>,
    Json(req): Json<HelloRequest>,
) -> Result<Json<HandshakeSession>, Response> {
    state.record_request();
    let session = state
        .handshake
        .step_hello(RemoteInstanceId::from(req.remote_instance_id), AgentId::from(req.agent_id))
        .await
        .map_err(|err| (StatusCode::BAD_REQUEST, err.to_string()).into_response())?;
    Ok(Json(session))
}

async fn load_session(state: &AppState, session_id: &str) -> Result<HandshakeSession, Response> {
    state
        .handshake
        .session_store
        .load(session_id)
        .await
        .map_err(map_core_err)?
        .ok_or_else(|| (StatusCode::NOT_FOUND, "no such handshake session".to_string()).into_response())
}

#[derive(Debug, Deserialize)]
struct ChallengeRequest {
    session_id: String,
    hmac_key_b64: String,
}

#[derive(Debug, Serialize)]
struct ChallengeResponse {
    challenge: String,
}

async fn federation_challenge(
    State(state): State<Arc<AppState>>,
    Json(req): Json<ChallengeRequest>,
) -> Result<Json<ChallengeResponse>, Response> {
    state.record_request();
    let mut session = load_session(&state, &req.session_id).await?;
    let hmac_key = B64.decode(&req.hmac_key_b64)
        .map_err(|err| (StatusCode::BAD_REQUEST, format!("malformed hmac key: {err}")).into_response())?;
    let challenge = state
        .handshake
        .step_challenge(&mut session, &hmac_key)
        .await
        .map_err(|err| (StatusCode::BAD_REQUEST, err.to_string()).into_response())?;
    Ok(Json(ChallengeResponse { challenge }))
}

#[derive(Debug, Deserialize)]
struct ProofRequest {
    session_id: String,
    challenge: String,
    hmac_key_b64: String,
    remote_public_key_b64: String,
    remote_algorithm: agentkern_federation::Algorithm,
    signature: agentkern_federation::Signature,
    audit_hash: String,
}

async fn federation_proof(
    State(state): State<Arc<AppState>>,
    Json(req): Json<ProofRequest>,
) -> Result<StatusCode, Response> {
    state.record_request();
    let mut session = load_session(&state, &req.session_id).await?;
    let hmac_key = B64.decode(&req.hmac_key_b64)
        .map_err(|err| (StatusCode::BAD_REQUEST, format!("malformed hmac key: {err}")).into_response())?;
    state
        .handshake
        .step_proof(
            &mut session,
            &req.challenge,
            &hmac_key,
            &req.remote_public_key_b64,
            req.remote_algorithm,
            &req.signature,
            req.audit_hash,
        )
        .await
        .map_err(|err| (StatusCode::BAD_REQUEST, err.to_string()).into_response())?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Deserialize)]
struct VerifyRequest {
    session_id: String,
    tenant_id: String,
    signals: TrustSignals,
}

#[derive(Debug, Serialize)]
struct VerifyResponse {
    trust: f64,
}

async fn federation_verify(
    State(state): State<Arc<AppState>>,
    Json(req): Json<VerifyRequest>,
) -> Result<Json<VerifyResponse>, Response> {
    state.record_request();
    let mut session = load_session(&state, &req.session_id).await?;
    let cfg = state.config.get_config(&TenantId::from(req.tenant_id)).await;
    let trust = state
        .handshake
        .step_verify(&mut session, req.signals, &cfg)
        .await
        .map_err(|err| (StatusCode::BAD_REQUEST, err.to_string()).into_response())?;
    Ok(Json(VerifyResponse { trust }))
}

#[derive(Debug, Deserialize)]
struct AttestationRequest {
    session_id: String,
    tenant_id: String,
}

#[derive(Debug, Serialize)]
struct AttestationResponse {
    trust_tax: f64,
}

async fn federation_attestation(
    State(state): State<Arc<AppState>>,
    Json(req): Json<AttestationRequest>,
) -> Result<Json<AttestationResponse>, Response> {
    state.record_request();
    let mut session = load_session(&state, &req.session_id).await?;
    let cfg = state.config.get_config(&TenantId::from(req.tenant_id)).await;
    let cost = state
        .handshake
        .step_attestation(&mut session, &cfg)
        .await
        .map_err(|err| (StatusCode::BAD_REQUEST, err.to_string()).into_response())?;
    Ok(Json(AttestationResponse { trust_tax: cost.trust_tax }))
}

#[derive(Debug, Deserialize)]
struct ResultRequest {
    session_id: String,
    tenant_id: String,
}

#[derive(Debug, Serialize)]
struct ResultResponse {
    accepted: bool,
}

async fn federation_result(
    State(state): State<Arc<AppState>>,
    Json(req): Json<ResultRequest>,
) -> Result<Json<ResultResponse>, Response> {
    state.record_request();
    let mut session = load_session(&state, &req.session_id).await?;
    let cfg = state.config.get_config(&TenantId::from(req.tenant_id)).await;
    let accepted = state
        .handshake
        .step_result(&mut session, &cfg)
        .await
        .map_err(|err| (StatusCode::BAD_REQUEST, err.to_string()).into_response())?;

    state
        .attestations
        .record(AttestationEvent {
            session_id: session.session_id.clone(),
            remote_instance_id: session.remote_instance_id.clone(),
            agent_id: session.agent_id.clone(),
            verdict: if accepted {
                AttestationVerdict::Accepted
            } else {
                AttestationVerdict::Rejected
            },
            trust_score: session.trust_score.unwrap_or(0.0),
            reason: None,
            timestamp: chrono::Utc::now(),
        })
        .await;

    Ok(Json(ResultResponse { accepted }))
}

async fn federation_status(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<String>,
) -> Result<Json<HandshakeSession>, StatusCode> {
    state.record_request();
    state
        .handshake
        .session_store
        .load(&session_id)
        .await
        .ok()
        .flatten()
        .map(Json)
        .ok_or(StatusCode::NOT_FOUND)
}

/// `PerformHandshake` realized as a bidirectional WebSocket: each
/// client message is a tagged step request, each server message the
/// matching step response, mirroring the one-method-per-step JSON
/// routes above over a single persistent connection.
async fn federation_ws(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> Response {
    state.record_request();
    ws.on_upgrade(move |socket| handle_federation_ws(socket, state))
}

#[derive(Debug, Deserialize)]
#[serde(tag = "step", rename_all = "snake_case")]
enum WsStepRequest {
    Hello {
        remote_instance_id: String,
        agent_id: String,
    },
    Challenge {
        session_id: String,
        hmac_key_b64: String,
    },
    Proof {
        session_id: String,
        challenge: String,
        hmac_key_b64: String,
        remote_public_key_b64: String,
        remote_algorithm: agentkern_federation::Algorithm,
        signature: agentkern_federation::Signature,
        audit_hash: String,
    },
    Verify {
        session_id: String,
        tenant_id: String,
        signals: TrustSignals,
    },
    Attestation {
        session_id: String,
        tenant_id: String,
    },
    Result {
        session_id: String,
        tenant_id: String,
    },
    Status {
        session_id: String,
    },
}

/// Drives one step against the shared engine and renders its outcome
/// as a single JSON text frame; errors surface as `{"error": ...}`
/// rather than closing the socket, so a client can retry a step
/// without reopening the connection.
async fn handle_ws_step(state: &AppState, req: WsStepRequest) -> String {
    let render = |result: Result<serde_json::Value, String>| match result {
        Ok(v) => v.to_string(),
        Err(e) => serde_json::json!({ "error": e }).to_string(),
    };

    match req {
        WsStepRequest::Hello { remote_instance_id, agent_id } => {
            render(
                state
                    .handshake
                    .step_hello(RemoteInstanceId::from(remote_instance_id), AgentId::from(agent_id))
                    .await
                    .map(|s| serde_json::to_value(s).unwrap_or_default())
                    .map_err(|e| e.to_string()),
            )
        }
        WsStepRequest::Challenge { session_id, hmac_key_b64 } => {
            let outcome = async {
                let mut session = load_session(state, &session_id).await.map_err(|_| "no such session".to_string())?;
                let hmac_key = B64.decode(&hmac_key_b64)
                    .map_err(|e| format!("malformed hmac key: {e}"))?;
                let challenge = state
                    .handshake
                    .step_challenge(&mut session, &hmac_key)
                    .await
                    .map_err(|e| e.to_string())?;
                Ok(serde_json::json!({ "challenge": challenge }))
            }
            .await;
            render(outcome)
        }
        WsStepRequest::Proof {
            session_id,
            challenge,
            hmac_key_b64,
            remote_public_key_b64,
            remote_algorithm,
            signature,
            audit_hash,
        } => {
            let outcome = async {
                let mut session = load_session(state, &session_id).await.map_err(|_| "no such session".to_string())?;
                let hmac_key = B64.decode(&hmac_key_b64)
                    .map_err(|e| format!("malformed hmac key: {e}"))?;
                state
                    .handshake
                    .step_proof(&mut session, &challenge, &hmac_key, &remote_public_key_b64, remote_algorithm, &signature, audit_hash)
                    .await
                    .map_err(|e| e.to_string())?;
                Ok(serde_json::json!({ "ok": true }))
            }
            .await;
            render(outcome)
        }
        WsStepRequest::Verify { session_id, tenant_id, signals } => {
            let outcome = async {
                let mut session = load_session(state, &session_id).await.map_err(|_| "no such session".to_string())?;
                let cfg = state.config.get_config(&TenantId::from(tenant_id)).await;
                let trust = state
                    .handshake
                    .step_verify(&mut session, signals, &cfg)
                    .await
                    .map_err(|e| e.to_string())?;
                Ok(serde_json::json!({ "trust": trust }))
            }
            .await;
            render(outcome)
        }
        WsStepRequest::Attestation { session_id, tenant_id } => {
            let outcome = async {
                let mut session = load_session(state, &session_id).await.map_err(|_| "no such session".to_string())?;
                let cfg = state.config.get_config(&TenantId::from(tenant_id)).await;
                let cost = state
                    .handshake
                    .step_attestation(&mut session, &cfg)
                    .await
                    .map_err(|e| e.to_string())?;
                Ok(serde_json::json!({ "trust_tax": cost.trust_tax }))
            }
            .await;
            render(outcome)
        }
        WsStepRequest::Result { session_id, tenant_id } => {
            let outcome = async {
                let mut session = load_session(state, &session_id).await.map_err(|_| "no such session".to_string())?;
                let cfg = state.config.get_config(&TenantId::from(tenant_id)).await;
                let accepted = state
                    .handshake
                    .step_result(&mut session, &cfg)
                    .await
                    .map_err(|e| e.to_string())?;
                state
                    .attestations
                    .record(AttestationEvent {
                        session_id: session.session_id.clone(),
                        remote_instance_id: session.remote_instance_id.clone(),
                        agent_id: session.agent_id.clone(),
                        verdict: if accepted {
                            AttestationVerdict::Accepted
                        } else {
                            AttestationVerdict::Rejected
                        },
                        trust_score: session.trust_score.unwrap_or(0.0),
                        reason: None,
                        timestamp: chrono::Utc::now(),
                    })
                    .await;
                Ok(serde_json::json!({ "accepted": accepted }))
            }
            .await;
            render(outcome)
        }
        WsStepRequest::Status { session_id } => {
            let outcome = state
                .handshake
                .session_store
                .load(&session_id)
                .await
                .map_err(|e| e.to_string())
                .and_then(|opt| opt.ok_or_else(|| "no such session".to_string()))
                .map(|s| serde_json::to_value(s).unwrap_or_default());
            render(outcome)
        }
    }
}

async fn handle_federation_ws(mut socket: WebSocket, state: Arc<AppState>) {
    while let Some(Ok(msg)) = socket.recv().await {
        let Message::Text(text) = msg else { continue };
        let reply = match serde_json::from_str::<WsStepRequest>(&text) {
            Ok(req) => handle_ws_step(&state, req).await,
            Err(err) => serde_json::json!({ "error": format!("malformed step request: {err}") }).to_string(),
        };

        if socket.send(Message::Text(reply)).await.is_err() {
            warn!("federation ws client disconnected mid-handshake");
            break;
        }
    }
}
