//! # Wire Envelope
//!
//! Defines the single framed message type exchanged between the gateway
//! and the agent over the control channel, plus the normalization and
//! hop-by-hop header rules both sides must apply identically.
//!
//! Kept in its own crate (mirroring the split the rest of this workspace
//! inherited) so the gateway and agent binaries can never drift apart on
//! the wire format.

use serde::{Deserialize, Serialize};

/// Request and response bodies are capped at 10 MiB.
pub const MAX_BODY_BYTES: usize = 10 * 1024 * 1024;

/// Envelope overhead (headers, JSON framing) gets an additional budget
/// on top of the largest possible body.
pub const MAX_ENVELOPE_BYTES: usize = MAX_BODY_BYTES + 2 * 1024 * 1024;

/// A single `hostname -> target` binding, as published by an agent or
/// returned by the external route pull endpoint.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RouteSpec {
    pub hostname: String,
    pub target: String,
}

/// A header as transmitted on the wire. Plain `(name, value)` pairs
/// rather than a map, since HTTP allows repeated header names.
pub type WireHeaders = Vec<(String, String)>;

/// All possible control-channel messages.
///
/// Serialized as a single JSON object per message with a `"type"` field
/// (serde's internally-tagged representation), e.g.
/// `{"type": "register_routes", "routes": [...]}`. Unknown fields are
/// ignored by receivers (no `deny_unknown_fields`), and unused fields on
/// a given variant are simply absent, per the wire contract in the
/// envelope specification.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Envelope {
    /// agent → gateway: replace the full set of bindings held under this
    /// session's token.
    RegisterRoutes { routes: Vec<RouteSpec> },

    /// gateway → agent: replay this request against the agent's local
    /// target and respond with the matching `request_id`.
    ProxyRequest {
        request_id: String,
        method: String,
        path: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        query: Option<String>,
        #[serde(default)]
        headers: WireHeaders,
        /// Base64-encoded request body.
        #[serde(default)]
        body: String,
        hostname: String,
        target: String,
    },

    /// agent → gateway: the response for a previously delivered
    /// `proxy_request`.
    ProxyResponse {
        request_id: String,
        status: u16,
        #[serde(default)]
        headers: WireHeaders,
        /// Base64-encoded response body.
        #[serde(default)]
        body: String,
    },

    /// either direction: informational only, never changes state.
    Error { message: String },
}

/// Header names that must never be forwarded across either leg of the
/// tunnel (public client ↔ gateway ↔ agent ↔ local target). Matched
/// case-insensitively.
pub const HOP_BY_HOP_HEADERS: &[&str] = &[
    "connection",
    "proxy-connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

/// True if `name` is a hop-by-hop header (case-insensitive).
pub fn is_hop_by_hop(name: &str) -> bool {
    HOP_BY_HOP_HEADERS
        .iter()
        .any(|h| h.eq_ignore_ascii_case(name))
}

/// Drops every hop-by-hop header from a wire header list, preserving
/// order and repeated names for everything else.
pub fn strip_hop_by_hop(headers: WireHeaders) -> WireHeaders {
    headers
        .into_iter()
        .filter(|(name, _)| !is_hop_by_hop(name))
        .collect()
}

/// Normalizes a hostname per the tunnel's identity rules: lowercase,
/// trailing dot stripped, any `:port` suffix removed (including the
/// bracketed-IPv6 form), surrounding whitespace trimmed.
///
/// Returns `None` if the result is empty, contains whitespace, or has
/// no `.` — i.e. is not a valid dns-domain per the data model.
pub fn normalize_hostname(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }

    let without_port = strip_host_port(trimmed);
    let lower = without_port.to_ascii_lowercase();
    let stripped_dot = lower.strip_suffix('.').unwrap_or(&lower);

    if stripped_dot.is_empty() || stripped_dot.contains(' ') || !stripped_dot.contains('.') {
        return None;
    }

    Some(stripped_dot.to_string())
}

/// Strips a `:port` suffix from a `host` or `host:port` string, also
/// handling the bracketed IPv6 form `[::1]:8080` by returning the
/// bracket contents unchanged (IPv6 literals are not valid tunnel
/// hostnames, but this keeps the helper total for any caller that
/// passes a raw `Host` header value through it).
fn strip_host_port(value: &str) -> &str {
    if let Some(rest) = value.strip_prefix('[') {
        if let Some(end) = rest.find(']') {
            return &rest[..end];
        }
    }
    match value.rsplit_once(':') {
        Some((host, port)) if port.chars().all(|c| c.is_ascii_digit()) && !port.is_empty() => host,
        _ => value,
    }
}

/// Normalizes a proxy target: trims whitespace, rejects anything
/// carrying a URL scheme or missing a `:port` suffix.
pub fn normalize_target(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() || trimmed.contains("://") {
        return None;
    }
    let (host, port) = trimmed.rsplit_once(':')?;
    if host.is_empty() || port.is_empty() || !port.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    Some(format!("{}:{}", host.to_ascii_lowercase(), port))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_hostname_case_and_trailing_dot() {
        assert_eq!(
            normalize_hostname("App.Example.COM."),
            Some("app.example.com".to_string())
        );
    }

    #[test]
    fn normalizes_hostname_with_port() {
        assert_eq!(
            normalize_hostname("app.example.com:8080"),
            Some("app.example.com".to_string())
        );
    }

    #[test]
    fn rejects_hostname_without_dot() {
        assert_eq!(normalize_hostname("localhost"), None);
    }

    #[test]
    fn rejects_empty_hostname() {
        assert_eq!(normalize_hostname(""), None);
        assert_eq!(normalize_hostname("   "), None);
    }

    #[test]
    fn normalization_is_idempotent() {
        let once = normalize_hostname("App.Example.com.:80").unwrap();
        let twice = normalize_hostname(&once).unwrap();
        assert_eq!(once, twice);
    }

    #[test]
    fn normalizes_target() {
        assert_eq!(
            normalize_target("  127.0.0.1:3000 "),
            Some("127.0.0.1:3000".to_string())
        );
    }

    #[test]
    fn rejects_target_with_scheme() {
        assert_eq!(normalize_target("http://127.0.0.1:3000"), None);
    }

    #[test]
    fn rejects_target_without_port() {
        assert_eq!(normalize_target("127.0.0.1"), None);
    }

    #[test]
    fn target_normalization_is_idempotent() {
        let once = normalize_target("Host.Local:9000").unwrap();
        let twice = normalize_target(&once).unwrap();
        assert_eq!(once, twice);
    }

    #[test]
    fn strips_hop_by_hop_headers_case_insensitively() {
        let headers = vec![
            ("Connection".to_string(), "keep-alive".to_string()),
            ("X-Custom".to_string(), "value".to_string()),
            ("TRANSFER-ENCODING".to_string(), "chunked".to_string()),
        ];
        let stripped = strip_hop_by_hop(headers);
        assert_eq!(stripped, vec![("X-Custom".to_string(), "value".to_string())]);
    }

    #[test]
    fn envelope_round_trips_through_json() {
        let env = Envelope::ProxyRequest {
            request_id: "42".to_string(),
            method: "GET".to_string(),
            path: "/".to_string(),
            query: None,
            headers: vec![],
            body: String::new(),
            hostname: "app.example.com".to_string(),
            target: "127.0.0.1:3000".to_string(),
        };
        let json = serde_json::to_string(&env).unwrap();
        assert!(json.contains("\"type\":\"proxy_request\""));
        let back: Envelope = serde_json::from_str(&json).unwrap();
        match back {
            Envelope::ProxyRequest { request_id, .. } => assert_eq!(request_id, "42"),
            _ => panic!("wrong variant"),
        }
    }

    #[test]
    fn unknown_fields_are_ignored() {
        let json = r#"{"type":"error","message":"oops","extra_field":123}"#;
        let env: Envelope = serde_json::from_str(json).unwrap();
        match env {
            Envelope::Error { message } => assert_eq!(message, "oops"),
            _ => panic!("wrong variant"),
        }
    }
}
