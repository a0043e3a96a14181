//! `probe` — the event consumer, HTTP/WS surface, and `federation
//! handshake` CLI that wire C1-C5 together (spec §6).
//!
//! Two run modes, dispatched on argv like `packages/arbiter/src/bin/server.rs`
//! dispatches its own subcommands:
//!
//!   probe [serve]                          starts the axum server
//!   probe federation handshake <addr> <agent>   one-shot handshake client
//!
//! Exit codes per spec §6: 0 ok, 1 configuration error, 2 dependency
//! unreachable, 130 on signal.

mod defaults;
mod federation_cli;
mod routes;
mod state;

use std::process::ExitCode;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const DEFAULT_ESCROW_QUEUE_CAPACITY: usize = 1000;

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();

    match args.first().map(String::as_str) {
        Some("federation") if args.get(1).map(String::as_str) == Some("handshake") => {
            federation_cli::run(&args[2..]).await
        }
        Some("federation") => {
            eprintln!("usage: probe federation handshake <remote-addr> <agent>");
            ExitCode::from(1)
        }
        None | Some("serve") => serve().await,
        Some(other) => {
            eprintln!("unrecognized subcommand: {other}");
            eprintln!("usage: probe [serve] | probe federation handshake <remote-addr> <agent>");
            ExitCode::from(1)
        }
    }
}

async fn serve() -> ExitCode {
    let queue_capacity = std::env::var("ESCROW_QUEUE_CAPACITY")
        .ok()
        .and_then(|v| v.parse::<usize>().ok())
        .unwrap_or(DEFAULT_ESCROW_QUEUE_CAPACITY);

    let port = std::env::var("PORT").unwrap_or_else(|_| "8080".to_string());
    let addr = format!("0.0.0.0:{port}");

    let listener = match tokio::net::TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(err) => {
            tracing::error!(%addr, error = %err, "failed to bind listener");
            return ExitCode::from(2);
        }
    };

    let state = state::AppState::wire(queue_capacity);
    let app = routes::router(state.clone());
    let signalled = std::sync::Arc::new(std::sync::atomic::AtomicBool::new(false));

    tracing::info!(%addr, "probe listening");

    let result = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(state, signalled.clone()))
        .await;

    match result {
        Ok(()) if signalled.load(std::sync::atomic::Ordering::Relaxed) => ExitCode::from(130),
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            tracing::error!(error = %err, "server exited with error");
            ExitCode::from(2)
        }
    }
}

/// Waits for SIGINT/SIGTERM, then lets in-flight escrow work drain
/// before axum stops accepting connections. In-flight handshake
/// sessions are already persisted step-by-step by `HandshakeEngine`
/// via `HandshakeSessionStore::save`, so there is nothing extra to
/// flush for those; the escrow queue is the one in-memory structure
/// that would otherwise lose queued-but-unclaimed events.
async fn shutdown_signal(state: std::sync::Arc<state::AppState>, signalled: std::sync::Arc<std::sync::atomic::AtomicBool>) {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install SIGINT handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    signalled.store(true, std::sync::atomic::Ordering::Relaxed);

    tracing::info!(
        queue_depth = state.escrow.queue_depth(),
        "shutdown signal received, draining escrow queue before exit"
    );
    while state.escrow.queue_depth() > 0 {
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    }
}
