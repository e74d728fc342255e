//! # Tunnel Gateway
//!
//! Public HTTP entry point for the reverse tunnel service: owns agent
//! sessions, the host-to-agent routing table, and request/response
//! multiplexing over the control channel.
//!
//! ## Architecture
//!
//! ```text
//! public HTTP client ──► Gateway ◄══ control channel ══► Agent ──► local target
//! ```
//!
//! ## Modules
//!
//! - [`error`]   — gateway-side error kinds and their HTTP mapping
//! - [`session`] — agent session registry and pending-response slots
//! - [`routes`]  — hostname routing table
//! - [`state`]   — shared application state
//! - [`ws`]      — control-channel upgrade and envelope dispatch
//! - [`public`]  — public HTTP path
//! - [`headers`] — hop-by-hop stripping and forwarded-header injection
//! - [`admin`]   — read-only session listing

use std::net::SocketAddr;
use std::time::Duration;

use axum::routing::get;
use axum::Router;
use clap::Parser;
use tower_http::cors::CorsLayer;
use tracing::info;

use tunnel_gateway::admin;
use tunnel_gateway::public;
use tunnel_gateway::state::AppState;
use tunnel_gateway::ws;

/// Public HTTP gateway for the reverse tunnel service.
#[derive(Debug, Parser)]
#[command(version, about)]
struct Args {
    /// Address to listen on for both the public HTTP path and the
    /// agent control channel.
    #[arg(long, default_value = "0.0.0.0:7070")]
    listen_addr: SocketAddr,

    /// How long the public HTTP path waits for an agent's response
    /// before returning 504.
    #[arg(long, default_value_t = 30)]
    request_timeout_secs: u64,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "gateway=info".into()),
        )
        .init();

    let args = Args::parse();
    let state = AppState::new(Duration::from_secs(args.request_timeout_secs));

    let app = Router::new()
        .route("/connect", get(ws::connect_handler))
        .route("/api/sessions", get(admin::list_sessions))
        .fallback(public::serve_public)
        .layer(CorsLayer::permissive())
        .with_state(state);

    info!("tunnel gateway listening on {}", args.listen_addr);

    let listener = tokio::net::TcpListener::bind(args.listen_addr)
        .await
        .expect("failed to bind listen address");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await
    .expect("gateway server error");
}

/// Waits for Ctrl+C or SIGTERM, then lets `axum::serve` finish
/// in-flight connections before returning.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
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
    info!("shutdown signal received");
}
