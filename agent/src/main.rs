//! # Tunnel Agent
//!
//! Headless outbound client: establishes the control channel to the
//! gateway, publishes its routes, executes proxied requests against
//! local targets, and optionally keeps its route set in sync with an
//! external control store.
//!
//! Generalizes the teacher's Tauri desktop client (`client/src-tauri`)
//! into a plain CLI binary — same connection-loop and per-request
//! fan-out shape, with the GUI's IPC commands and event emission
//! replaced by structured log events and a config file.
//!
//! ## Modules
//!
//! - [`config`]    — on-disk agent config and durable route store
//! - [`connector`] — control-channel dial/reconnect loop
//! - [`executor`]  — translates a `proxy_request` into a local HTTP call
//! - [`sync`]      — periodic route pull from the external control store
//! - [`error`]     — agent-side error kinds

mod config;
mod connector;
mod error;
mod executor;
mod sync;

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tokio::sync::{watch, RwLock};
use tracing::info;

use config::{AgentConfig, RouteStore};
use connector::ConnectionHandle;
use executor::ExecutorClient;

/// Outbound reverse-tunnel agent.
#[derive(Debug, Parser)]
#[command(version, about)]
struct Args {
    /// Path to the agent's TOML config file.
    #[arg(long, default_value = "agent.toml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "agent=info".into()),
        )
        .init();

    let args = Args::parse();
    let config = match AgentConfig::load(&args.config) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("failed to load config {}: {e}", args.config.display());
            std::process::exit(1);
        }
    };

    let routes_file = config.routes_file_path(&args.config);
    let store = RouteStore::new(routes_file);

    // Prefer the persisted set (it reflects the last successful sync
    // or publish); fall back to whatever the config file declares.
    let initial_routes = {
        let persisted = store.load();
        if persisted.is_empty() {
            config.routes.clone()
        } else {
            persisted
        }
    };
    info!(count = initial_routes.len(), "loaded initial route set");

    let routes = Arc::new(RwLock::new(initial_routes));
    let conn = ConnectionHandle::new();
    let executor = Arc::new(ExecutorClient::new());
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let connector_handle = tokio::spawn(connector::run(
        config.gateway_url.clone(),
        config.token.clone(),
        routes.clone(),
        conn.clone(),
        executor.clone(),
        shutdown_rx.clone(),
    ));

    let sync_handle = config.route_sync.clone().map(|sync_cfg| {
        tokio::spawn(sync::run(
            sync_cfg,
            config.token.clone(),
            routes.clone(),
            RouteStore::new(config.routes_file_path(&args.config)),
            conn.clone(),
            shutdown_rx.clone(),
        ))
    });

    wait_for_shutdown_signal().await;
    info!("shutdown signal received, stopping agent loops");
    let _ = shutdown_tx.send(true);

    let _ = connector_handle.await;
    if let Some(handle) = sync_handle {
        let _ = handle.await;
    }
}

async fn wait_for_shutdown_signal() {
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
}
