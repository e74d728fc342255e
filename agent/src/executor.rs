//! # Proxy Executor
//!
//! Translates a `proxy_request` envelope into an outbound HTTP call
//! against the agent's local target, the way the teacher's
//! `relay::handle_stream_relay` translates a tunnel stream into a raw
//! TCP connection — here the "local connection" is a single HTTP
//! request/response instead of an open byte pipe, so the shape is
//! request-in, response-out rather than a bidirectional relay loop.

use std::time::Duration;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use futures::StreamExt;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, HOST};
use reqwest::Method;
use tokio::sync::mpsc;
use tracing::warn;
use tunnel_protocol::{strip_hop_by_hop, Envelope, WireHeaders, MAX_BODY_BYTES};

const LOCAL_CALL_TIMEOUT: Duration = Duration::from_secs(45);

pub struct ExecutorClient {
    http: reqwest::Client,
}

impl ExecutorClient {
    pub fn new() -> Self {
        let http = reqwest::Client::builder()
            .timeout(LOCAL_CALL_TIMEOUT)
            .build()
            .expect("failed to build local HTTP client");
        Self { http }
    }

    #[allow(clippy::too_many_arguments)]
    pub async fn handle(
        &self,
        request_id: String,
        method: String,
        path: String,
        query: Option<String>,
        headers: WireHeaders,
        body: String,
        hostname: String,
        target: String,
        reply_to: mpsc::UnboundedSender<Envelope>,
    ) {
        let response = self
            .execute(&request_id, &method, &path, query.as_deref(), headers, &body, &hostname, &target)
            .await;
        let _ = reply_to.send(response);
    }

    #[allow(clippy::too_many_arguments)]
    async fn execute(
        &self,
        request_id: &str,
        method: &str,
        path: &str,
        query: Option<&str>,
        headers: WireHeaders,
        body: &str,
        hostname: &str,
        target: &str,
    ) -> Envelope {
        if target.is_empty() {
            return error_response(request_id, 502, "missing target");
        }

        let body_bytes = match BASE64.decode(body) {
            Ok(bytes) => bytes,
            Err(_) => return error_response(request_id, 400, "invalid base64 request body"),
        };

        let method = match Method::from_bytes(method.as_bytes()) {
            Ok(method) => method,
            Err(_) => return error_response(request_id, 400, "invalid HTTP method"),
        };

        let mut url = format!("http://{target}{path}");
        if let Some(query) = query {
            url.push('?');
            url.push_str(query);
        }

        let mut header_map = HeaderMap::new();
        for (name, value) in strip_hop_by_hop(headers) {
            let (Ok(name), Ok(value)) = (
                HeaderName::try_from(name.as_str()),
                HeaderValue::from_str(&value),
            ) else {
                continue;
            };
            header_map.append(name, value);
        }
        // Set Host to the public hostname so virtual-host-based local
        // servers route the request correctly.
        if let Ok(value) = HeaderValue::from_str(hostname) {
            header_map.insert(HOST, value);
        }

        let request = self
            .http
            .request(method, url.as_str())
            .headers(header_map)
            .body(body_bytes);

        let response = match request.send().await {
            Ok(response) => response,
            Err(e) => return error_response(request_id, 502, format!("local dial failed: {e}")),
        };

        let status = response.status().as_u16();
        let response_headers = strip_hop_by_hop(
            response
                .headers()
                .iter()
                .filter_map(|(name, value)| {
                    value
                        .to_str()
                        .ok()
                        .map(|v| (name.as_str().to_string(), v.to_string()))
                })
                .collect(),
        );

        let mut buf = Vec::new();
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            match chunk {
                Ok(bytes) => {
                    buf.extend_from_slice(&bytes);
                    if buf.len() > MAX_BODY_BYTES {
                        return error_response(request_id, 502, "local response body too large");
                    }
                }
                Err(e) => {
                    return error_response(
                        request_id,
                        502,
                        format!("error reading local response body: {e}"),
                    )
                }
            }
        }

        Envelope::ProxyResponse {
            request_id: request_id.to_string(),
            status,
            headers: response_headers,
            body: BASE64.encode(&buf),
        }
    }
}

impl Default for ExecutorClient {
    fn default() -> Self {
        Self::new()
    }
}

fn error_response(request_id: &str, status: u16, message: impl Into<String>) -> Envelope {
    let message = message.into();
    warn!(%request_id, status, %message, "local proxy failure");
    Envelope::ProxyResponse {
        request_id: request_id.to_string(),
        status,
        headers: vec![(
            "content-type".to_string(),
            "text/plain; charset=utf-8".to_string(),
        )],
        body: BASE64.encode(message.as_bytes()),
    }
}
