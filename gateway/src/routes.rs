//! # Routing Table
//!
//! `hostname -> (token, target)` index. Generalizes the teacher's
//! `AppState.sessions: DashMap<String, TunnelSession>` (one entry per
//! tunnel session) into one entry per published hostname, since a
//! single agent token can own many bindings.

use std::sync::Arc;

use dashmap::DashMap;
use tunnel_protocol::{normalize_hostname, normalize_target, RouteSpec};

#[derive(Debug, Clone)]
pub struct Binding {
    pub token: String,
    pub target: String,
}

#[derive(Clone, Default)]
pub struct RoutingTable {
    bindings: Arc<DashMap<String, Binding>>,
}

impl RoutingTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Atomically replaces the full set of bindings owned by `token`
    /// with `routes`. Malformed hostnames/targets are skipped. This is
    /// the only mutator besides `remove_token`, so the binding set for
    /// a token always equals the last successfully applied
    /// `register_routes` payload.
    pub fn apply_routes(&self, token: &str, routes: &[RouteSpec]) {
        self.bindings.retain(|_, binding| binding.token != token);

        for route in routes {
            let (Some(hostname), Some(target)) = (
                normalize_hostname(&route.hostname),
                normalize_target(&route.target),
            ) else {
                continue;
            };
            self.bindings.insert(
                hostname,
                Binding {
                    token: token.to_string(),
                    target,
                },
            );
        }
    }

    /// Drops every binding owned by `token`, e.g. on session teardown.
    pub fn remove_token(&self, token: &str) {
        self.bindings.retain(|_, binding| binding.token != token);
    }

    /// Looks up the binding for a raw `Host` header value, normalizing
    /// first so callers never have to remember to do it themselves.
    pub fn lookup(&self, host_header: &str) -> Option<Binding> {
        let hostname = normalize_hostname(host_header)?;
        self.bindings.get(&hostname).map(|entry| entry.value().clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn route(hostname: &str, target: &str) -> RouteSpec {
        RouteSpec {
            hostname: hostname.to_string(),
            target: target.to_string(),
        }
    }

    #[test]
    fn apply_then_lookup() {
        let table = RoutingTable::new();
        table.apply_routes("tok-a", &[route("app.example.com", "127.0.0.1:3000")]);
        let binding = table.lookup("App.Example.com:443").unwrap();
        assert_eq!(binding.token, "tok-a");
        assert_eq!(binding.target, "127.0.0.1:3000");
    }

    #[test]
    fn reapply_replaces_full_set_atomically() {
        let table = RoutingTable::new();
        table.apply_routes(
            "tok-a",
            &[
                route("a.example.com", "127.0.0.1:1"),
                route("b.example.com", "127.0.0.1:2"),
            ],
        );
        table.apply_routes("tok-a", &[route("a.example.com", "127.0.0.1:9")]);

        assert!(table.lookup("b.example.com").is_none());
        assert_eq!(table.lookup("a.example.com").unwrap().target, "127.0.0.1:9");
    }

    #[test]
    fn later_publication_wins_on_hostname_collision() {
        let table = RoutingTable::new();
        table.apply_routes("tok-a", &[route("shared.example.com", "127.0.0.1:1")]);
        table.apply_routes("tok-b", &[route("shared.example.com", "127.0.0.1:2")]);
        let binding = table.lookup("shared.example.com").unwrap();
        assert_eq!(binding.token, "tok-b");
    }

    #[test]
    fn malformed_entries_are_skipped() {
        let table = RoutingTable::new();
        table.apply_routes(
            "tok-a",
            &[
                route("no-dot", "127.0.0.1:1"),
                route("ok.example.com", "http://127.0.0.1:1"),
                route("good.example.com", "127.0.0.1:5"),
            ],
        );
        assert!(table.lookup("no-dot").is_none());
        assert!(table.lookup("ok.example.com").is_none());
        assert!(table.lookup("good.example.com").is_some());
    }

    #[test]
    fn remove_token_drops_only_its_bindings() {
        let table = RoutingTable::new();
        table.apply_routes("tok-a", &[route("a.example.com", "127.0.0.1:1")]);
        table.apply_routes("tok-b", &[route("b.example.com", "127.0.0.1:2")]);
        table.remove_token("tok-a");
        assert!(table.lookup("a.example.com").is_none());
        assert!(table.lookup("b.example.com").is_some());
    }
}
