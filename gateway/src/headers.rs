//! Header-shaping helpers shared by the public HTTP path: hop-by-hop
//! stripping plus `X-Forwarded-*` injection. Kept separate from
//! `public.rs` since both the request-building and response-building
//! directions reuse the stripping half.

use axum::http::{HeaderMap, HeaderName, HeaderValue};
use tunnel_protocol::strip_hop_by_hop;

/// Converts an axum `HeaderMap` into the wire's flat `(name, value)`
/// list, dropping hop-by-hop headers and any value that isn't valid
/// UTF-8 (binary header values are not part of this wire contract).
pub fn to_wire_headers(headers: &HeaderMap) -> Vec<(String, String)> {
    let pairs: Vec<(String, String)> = headers
        .iter()
        .filter_map(|(name, value)| {
            value
                .to_str()
                .ok()
                .map(|v| (name.as_str().to_string(), v.to_string()))
        })
        .collect();
    strip_hop_by_hop(pairs)
}

/// Builds an axum `HeaderMap` from wire headers, skipping anything
/// that fails to parse as a header name/value rather than rejecting
/// the whole response — a single odd header from the agent shouldn't
/// sink the rest.
pub fn from_wire_headers(pairs: &[(String, String)]) -> HeaderMap {
    let mut map = HeaderMap::new();
    for (name, value) in strip_hop_by_hop(pairs.to_vec()) {
        let (Ok(name), Ok(value)) = (
            HeaderName::try_from(name.as_str()),
            HeaderValue::from_str(&value),
        ) else {
            continue;
        };
        map.append(name, value);
    }
    map
}

/// Appends (never overwrites) `X-Forwarded-For` and sets
/// `X-Forwarded-Host` / `X-Forwarded-Proto` on a wire header list
/// destined for the agent.
pub fn apply_forwarded_headers(
    mut headers: Vec<(String, String)>,
    peer_ip: &str,
    hostname: &str,
    proto: &str,
) -> Vec<(String, String)> {
    let forwarded_for = match headers
        .iter()
        .find(|(name, _)| name.eq_ignore_ascii_case("x-forwarded-for"))
    {
        Some((_, existing)) => format!("{existing}, {peer_ip}"),
        None => peer_ip.to_string(),
    };
    headers.retain(|(name, _)| !name.eq_ignore_ascii_case("x-forwarded-for"));
    headers.retain(|(name, _)| !name.eq_ignore_ascii_case("x-forwarded-host"));
    headers.retain(|(name, _)| !name.eq_ignore_ascii_case("x-forwarded-proto"));
    headers.push(("X-Forwarded-For".to_string(), forwarded_for));
    headers.push(("X-Forwarded-Host".to_string(), hostname.to_string()));
    headers.push(("X-Forwarded-Proto".to_string(), proto.to_string()));
    headers
}
