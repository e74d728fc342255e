//! # Control-Channel Endpoint
//!
//! `GET /connect?token=...` — upgrades to a WebSocket and runs the
//! session for as long as it stays connected. Directly generalizes the
//! teacher's `handlers::ws_handler` / `handle_connection`: same
//! split-socket, outbound-queue, per-message-dispatch shape, now keyed
//! by caller-supplied token instead of a server-assigned agent id, and
//! dispatching the tunnel-protocol envelope instead of the teacher's
//! TCP-relay messages.

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{Query, State, WebSocketUpgrade};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use tunnel_protocol::{Envelope, MAX_ENVELOPE_BYTES};

use crate::session::{AgentSession, ProxyOutcome};
use crate::state::AppState;
use std::sync::Arc;

#[derive(Debug, Deserialize)]
pub struct ConnectQuery {
    token: Option<String>,
}

/// `GET /connect` — the upgrader accepts arbitrary origins, since this
/// is a public endpoint and agents may dial from anywhere behind NAT.
pub async fn connect_handler(
    ws: WebSocketUpgrade,
    Query(query): Query<ConnectQuery>,
    State(state): State<AppState>,
) -> Response {
    let Some(token) = query.token.filter(|t| !t.is_empty()) else {
        return (StatusCode::BAD_REQUEST, "missing token").into_response();
    };

    ws.on_upgrade(move |socket| handle_connection(socket, token, state))
}

async fn handle_connection(socket: WebSocket, token: String, state: AppState) {
    info!(%token, "agent connection upgraded");

    let (mut ws_sink, mut ws_stream) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<Envelope>();

    let session = state.sessions.accept(token.clone(), tx);
    info!(%token, session_id = %session.id, "tunnel.created");

    // Outbound writer task: the sole writer onto the socket, so writes
    // from any number of public-request handlers are serialized FIFO
    // without an explicit write-lock.
    let outbound = tokio::spawn(async move {
        while let Some(envelope) = rx.recv().await {
            let text = match serde_json::to_string(&envelope) {
                Ok(t) => t,
                Err(e) => {
                    warn!(error = %e, "failed to serialize envelope");
                    continue;
                }
            };
            if ws_sink.send(Message::Text(text.into())).await.is_err() {
                break;
            }
        }
    });

    while let Some(frame) = ws_stream.next().await {
        let msg = match frame {
            Ok(msg) => msg,
            Err(e) => {
                warn!(%token, error = %e, "control channel read error");
                break;
            }
        };
        match msg {
            Message::Text(text) => {
                if text.len() > MAX_ENVELOPE_BYTES {
                    warn!(%token, "envelope exceeds size cap, dropping");
                    continue;
                }
                match serde_json::from_str::<Envelope>(&text) {
                    Ok(envelope) => dispatch(&state, &session, envelope),
                    Err(e) => debug!(%token, error = %e, "ignoring malformed envelope"),
                }
            }
            Message::Close(_) => break,
            _ => {}
        }
    }

    outbound.abort();
    if state.sessions.cleanup(&session) {
        state.routes.remove_token(&token);
        info!(%token, "tunnel.closed");
    }
}

fn dispatch(state: &AppState, session: &Arc<AgentSession>, envelope: Envelope) {
    match envelope {
        Envelope::RegisterRoutes { routes } => {
            state.routes.apply_routes(&session.token, &routes);
            info!(token = %session.token, count = routes.len(), "route.upserted");
        }
        Envelope::ProxyResponse {
            request_id,
            status,
            headers,
            body,
        } => {
            let Ok(id) = request_id.parse::<u64>() else {
                debug!("proxy_response with non-numeric request_id, discarding");
                return;
            };
            // Validate the body is plausible base64 before delivering;
            // the public handler still re-decodes and is the final
            // authority, but this keeps obviously malformed payloads
            // from silently resolving a slot with garbage.
            if BASE64.decode(&body).is_err() {
                debug!(request_id = %request_id, "proxy_response body is not valid base64");
            }
            let delivered = session.resolve(
                id,
                ProxyOutcome {
                    status,
                    headers,
                    body_b64: body,
                },
            );
            if !delivered {
                debug!(request_id = %request_id, "discarding response for unknown or expired request_id");
            }
        }
        Envelope::Error { message } => {
            warn!(token = %session.token, %message, "agent reported error");
        }
        Envelope::ProxyRequest { .. } => {
            debug!(token = %session.token, "ignoring proxy_request received from agent direction");
        }
    }
}
