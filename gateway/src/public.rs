//! # Public HTTP Path
//!
//! The gateway's one data-plane entry point: every public method and
//! path is routed here by `Host` header, translated into a
//! `proxy_request` envelope, and the response streamed back once the
//! owning agent answers (or the request times out).

use std::net::SocketAddr;

use axum::body::Body;
use axum::extract::{ConnectInfo, Request, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use tunnel_protocol::{Envelope, MAX_BODY_BYTES};

use crate::error::GatewayError;
use crate::headers::{apply_forwarded_headers, from_wire_headers, to_wire_headers};
use crate::session::SlotFailure;
use crate::state::AppState;

pub async fn serve_public(
    State(state): State<AppState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    req: Request,
) -> Response {
    match handle(state, peer, req).await {
        Ok(response) => response,
        Err(err) => err.into_response(),
    }
}

async fn handle(state: AppState, peer: SocketAddr, req: Request) -> Result<Response, GatewayError> {
    let host_header = req
        .headers()
        .get(axum::http::header::HOST)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");

    if host_header.trim().is_empty() {
        return Err(GatewayError::InvalidHost);
    }
    let hostname = tunnel_protocol::normalize_hostname(host_header).ok_or(GatewayError::InvalidHost)?;
    let binding = state
        .routes
        .lookup(host_header)
        .ok_or(GatewayError::UnknownHost)?;

    let session = state
        .sessions
        .get(&binding.token)
        .ok_or(GatewayError::TunnelOffline)?;

    let method = req.method().to_string();
    let path = req.uri().path().to_string();
    let query = req.uri().query().map(str::to_string);
    let proto = req
        .headers()
        .get("x-forwarded-proto")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("http")
        .to_string();
    let request_headers = req.headers().clone();

    let body_bytes = axum::body::to_bytes(req.into_body(), MAX_BODY_BYTES)
        .await
        .map_err(|e| GatewayError::BodyRead(e.to_string()))?;

    let wire_headers = apply_forwarded_headers(
        to_wire_headers(&request_headers),
        &peer.ip().to_string(),
        &hostname,
        &proto,
    );

    let request_id = state.next_request_id();
    let waiter = session.register_pending(request_id);

    let envelope = Envelope::ProxyRequest {
        request_id: request_id.to_string(),
        method,
        path,
        query,
        headers: wire_headers,
        body: BASE64.encode(&body_bytes),
        hostname,
        target: binding.target,
    };

    if session.send(envelope).is_err() {
        session.remove_pending(request_id);
        return Err(GatewayError::AgentSendFailed(
            "control channel write failed".to_string(),
        ));
    }

    let outcome = match tokio::time::timeout(state.request_timeout, waiter).await {
        Ok(Ok(Ok(outcome))) => outcome,
        // Session torn down (read failure, close, or superseded by a
        // reconnect) before the agent answered — per spec.md §8 scenario
        // 5, an in-flight request observes the same timeout a caller
        // waiting past `request_timeout` would, not a send-failure 502.
        Ok(Ok(Err(SlotFailure::SessionClosed))) => return Err(GatewayError::Timeout),
        Ok(Err(_recv_error)) => return Err(GatewayError::Timeout),
        Err(_elapsed) => {
            session.remove_pending(request_id);
            return Err(GatewayError::Timeout);
        }
    };

    build_response(outcome)
}

fn build_response(outcome: crate::session::ProxyOutcome) -> Result<Response, GatewayError> {
    let status = if outcome.status == 0 {
        502
    } else {
        outcome.status
    };
    let status = StatusCode::from_u16(status).unwrap_or(StatusCode::BAD_GATEWAY);

    let body = BASE64
        .decode(&outcome.body_b64)
        .map_err(|e| GatewayError::ResponseDecodeFailed(e.to_string()))?;

    let headers: HeaderMap = from_wire_headers(&outcome.headers);
    let mut response = Response::builder().status(status);
    for (name, value) in headers.iter() {
        response = response.header(name, value);
    }
    Ok(response.body(Body::from(body)).expect("valid response"))
}
