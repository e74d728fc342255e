//! # Agent Connector
//!
//! Direct generalization of the teacher's `agent::run_agent_loop`: the
//! same dial/register/outbound-queue/inbound-dispatch/cleanup shape,
//! now publishing the local route set instead of requesting a
//! server-assigned identity, and fanning a `proxy_request` out to its
//! own task instead of a new TCP stream.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::sync::{mpsc, watch, RwLock};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{info, warn};
use tunnel_protocol::{Envelope, RouteSpec, MAX_ENVELOPE_BYTES};

use crate::executor::ExecutorClient;

const MIN_BACKOFF: Duration = Duration::from_secs(1);
const MAX_BACKOFF: Duration = Duration::from_secs(10);

/// Shared handle to whatever outbound queue is currently live, so the
/// route-sync loop can publish updates without knowing about the
/// connector's internals — `None` while disconnected.
pub struct ConnectionHandle {
    tx: RwLock<Option<mpsc::UnboundedSender<Envelope>>>,
    connected: AtomicBool,
}

impl ConnectionHandle {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            tx: RwLock::new(None),
            connected: AtomicBool::new(false),
        })
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Publishes a `register_routes` envelope if currently connected.
    /// Returns `false` (a no-op, not an error) while disconnected — the
    /// freshly (re)connected session will publish the current set on
    /// its own as soon as it comes up.
    pub async fn publish_routes(&self, routes: &[RouteSpec]) -> bool {
        let guard = self.tx.read().await;
        match guard.as_ref() {
            Some(tx) => tx
                .send(Envelope::RegisterRoutes {
                    routes: routes.to_vec(),
                })
                .is_ok(),
            None => false,
        }
    }

    async fn set(&self, tx: Option<mpsc::UnboundedSender<Envelope>>) {
        self.connected.store(tx.is_some(), Ordering::SeqCst);
        *self.tx.write().await = tx;
    }
}

fn build_connect_url(gateway_url: &str, token: &str) -> String {
    let separator = if gateway_url.contains('?') { "&" } else { "?" };
    format!("{gateway_url}{separator}token={token}")
}

/// Runs the connector loop until `shutdown` is signalled. Never
/// returns otherwise: dial, publish current routes, dispatch inbound
/// `proxy_request`s concurrently, and on any failure reconnect after
/// an exponential backoff capped at 10s.
pub async fn run(
    gateway_url: String,
    token: String,
    routes: Arc<RwLock<Vec<RouteSpec>>>,
    conn: Arc<ConnectionHandle>,
    executor: Arc<ExecutorClient>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut backoff = MIN_BACKOFF;

    while !*shutdown.borrow() {
        let url = build_connect_url(&gateway_url, &token);
        match connect_async(&url).await {
            Ok((ws_stream, _)) => {
                info!("connected to gateway");
                backoff = MIN_BACKOFF;
                run_session(ws_stream, &routes, &conn, &executor, &mut shutdown).await;
                conn.set(None).await;
                warn!("disconnected from gateway");
            }
            Err(e) => {
                warn!(error = %e, "dial failed");
            }
        }

        if *shutdown.borrow() {
            break;
        }
        tokio::select! {
            _ = tokio::time::sleep(backoff) => {},
            _ = shutdown.changed() => {},
        }
        backoff = (backoff * 2).min(MAX_BACKOFF);
    }
}

type WsStream = tokio_tungstenite::WebSocketStream<
    tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
>;

async fn run_session(
    ws_stream: WsStream,
    routes: &Arc<RwLock<Vec<RouteSpec>>>,
    conn: &Arc<ConnectionHandle>,
    executor: &Arc<ExecutorClient>,
    shutdown: &mut watch::Receiver<bool>,
) {
    let (mut sink, mut stream) = ws_stream.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<Envelope>();

    conn.set(Some(tx.clone())).await;

    let outbound = tokio::spawn(async move {
        while let Some(envelope) = rx.recv().await {
            let text = match serde_json::to_string(&envelope) {
                Ok(text) => text,
                Err(e) => {
                    warn!(error = %e, "failed to serialize envelope");
                    continue;
                }
            };
            if sink.send(Message::Text(text.into())).await.is_err() {
                break;
            }
        }
    });

    // Publish the current route set immediately on connect.
    let current = routes.read().await.clone();
    let _ = tx.send(Envelope::RegisterRoutes { routes: current });

    loop {
        tokio::select! {
            frame = stream.next() => {
                match frame {
                    Some(Ok(Message::Text(text))) => {
                        if text.len() > MAX_ENVELOPE_BYTES {
                            warn!("envelope exceeds size cap, dropping");
                            continue;
                        }
                        match serde_json::from_str::<Envelope>(&text) {
                            Ok(Envelope::ProxyRequest { request_id, method, path, query, headers, body, hostname, target }) => {
                                let tx = tx.clone();
                                let executor = executor.clone();
                                tokio::spawn(async move {
                                    executor
                                        .handle(request_id, method, path, query, headers, body, hostname, target, tx)
                                        .await;
                                });
                            }
                            Ok(Envelope::Error { message }) => {
                                warn!(%message, "gateway reported error");
                            }
                            Ok(_) => {}
                            Err(e) => {
                                warn!(error = %e, "ignoring malformed envelope");
                            }
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        warn!(error = %e, "control channel read error");
                        break;
                    }
                }
            }
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    break;
                }
            }
        }
    }

    outbound.abort();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_connect_url_with_token_query_param() {
        assert_eq!(
            build_connect_url("ws://gateway.example.com/connect", "abc"),
            "ws://gateway.example.com/connect?token=abc"
        );
    }

    #[test]
    fn appends_token_after_existing_query() {
        assert_eq!(
            build_connect_url("ws://gateway.example.com/connect?region=us", "abc"),
            "ws://gateway.example.com/connect?region=us&token=abc"
        );
    }
}
