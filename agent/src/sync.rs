//! # Route Sync
//!
//! Periodically pulls the desired route set from the external control
//! store and reconciles it against the in-memory/persisted state. New
//! module — the teacher's agent has no analogous external-config pull,
//! but the shape (poll, diff, persist, notify) mirrors the teacher's
//! own connector loop closely enough to reuse its logging and
//! backoff-free periodic-timer idiom.

use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use tokio::sync::{watch, RwLock};
use tracing::{info, warn};
use tunnel_protocol::{normalize_hostname, normalize_target, RouteSpec};
use url::Url;

use crate::config::{RouteStore, RouteSyncConfig};
use crate::connector::ConnectionHandle;
use crate::error::AgentError;

const PER_ATTEMPT_TIMEOUT: Duration = Duration::from_secs(12);

#[derive(Debug, Deserialize)]
struct RoutePullResponse {
    #[allow(dead_code)]
    tunnel_id: String,
    routes: Vec<RouteSpec>,
}

/// Runs the periodic pull loop until `shutdown` is signalled.
pub async fn run(
    config: RouteSyncConfig,
    token: String,
    routes: Arc<RwLock<Vec<RouteSpec>>>,
    store: RouteStore,
    conn: Arc<ConnectionHandle>,
    mut shutdown: watch::Receiver<bool>,
) {
    let client = reqwest::Client::builder()
        .timeout(PER_ATTEMPT_TIMEOUT)
        .build()
        .expect("failed to build route-sync HTTP client");
    let interval = Duration::from_secs(config.interval_secs.max(1));

    while !*shutdown.borrow() {
        match poll_once(&client, &config, &token).await {
            Ok(pulled) => {
                let changed = {
                    let current = routes.read().await;
                    !routes_equal(&current, &pulled)
                };
                if changed {
                    *routes.write().await = pulled.clone();
                    if let Err(e) = store.save(&pulled) {
                        warn!(error = %e, "failed to persist synced routes");
                    }
                    if conn.publish_routes(&pulled).await {
                        info!(count = pulled.len(), "route sync: published updated routes");
                    } else {
                        info!(count = pulled.len(), "route sync: updated local routes (not connected)");
                    }
                }
            }
            Err(e) => {
                warn!(error = %e, "route sync poll skipped");
            }
        }

        tokio::select! {
            _ = tokio::time::sleep(interval) => {},
            _ = shutdown.changed() => {},
        }
    }
}

async fn poll_once(
    client: &reqwest::Client,
    config: &RouteSyncConfig,
    token: &str,
) -> Result<Vec<RouteSpec>, AgentError> {
    let url = Url::parse_with_params(
        &config.url,
        &[("tunnel_id", config.tunnel_id.as_str()), ("token", token)],
    )
    .map_err(|e| AgentError::RouteSyncRequest(e.to_string()))?;

    let response = client
        .get(url)
        .send()
        .await
        .map_err(|e| AgentError::RouteSyncRequest(e.to_string()))?;

    if !response.status().is_success() {
        return Err(AgentError::RouteSyncNon2xx(response.status().as_u16()));
    }

    let parsed: RoutePullResponse = response
        .json()
        .await
        .map_err(|e| AgentError::RouteSyncParse(e.to_string()))?;

    Ok(parsed
        .routes
        .into_iter()
        .filter_map(|r| {
            let hostname = normalize_hostname(&r.hostname)?;
            let target = normalize_target(&r.target)?;
            Some(RouteSpec { hostname, target })
        })
        .collect())
}

fn routes_equal(a: &[RouteSpec], b: &[RouteSpec]) -> bool {
    let mut a: Vec<(&str, &str)> = a.iter().map(|r| (r.hostname.as_str(), r.target.as_str())).collect();
    let mut b: Vec<(&str, &str)> = b.iter().map(|r| (r.hostname.as_str(), r.target.as_str())).collect();
    a.sort_unstable();
    b.sort_unstable();
    a == b
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
    fn routes_equal_ignores_order() {
        let a = vec![route("a.example.com", "x:1"), route("b.example.com", "y:2")];
        let b = vec![route("b.example.com", "y:2"), route("a.example.com", "x:1")];
        assert!(routes_equal(&a, &b));
    }

    #[test]
    fn routes_equal_detects_changes() {
        let a = vec![route("a.example.com", "x:1")];
        let b = vec![route("a.example.com", "x:2")];
        assert!(!routes_equal(&a, &b));
    }

    #[tokio::test]
    async fn poll_skips_on_non_2xx_without_mutating() {
        let server = wiremock::MockServer::start().await;
        wiremock::Mock::given(wiremock::matchers::method("GET"))
            .respond_with(wiremock::ResponseTemplate::new(401))
            .mount(&server)
            .await;

        let cfg = RouteSyncConfig {
            url: server.uri(),
            tunnel_id: "t1".to_string(),
            interval_secs: 5,
        };
        let client = reqwest::Client::new();
        let result = poll_once(&client, &cfg, "tok").await;
        assert!(matches!(result, Err(AgentError::RouteSyncNon2xx(401))));
    }

    #[tokio::test]
    async fn poll_returns_normalized_routes_on_success() {
        let server = wiremock::MockServer::start().await;
        wiremock::Mock::given(wiremock::matchers::method("GET"))
            .respond_with(wiremock::ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "tunnel_id": "t1",
                "routes": [{"hostname": "App.Example.com.", "target": "127.0.0.1:3000"}]
            })))
            .mount(&server)
            .await;

        let cfg = RouteSyncConfig {
            url: server.uri(),
            tunnel_id: "t1".to_string(),
            interval_secs: 5,
        };
        let client = reqwest::Client::new();
        let routes = poll_once(&client, &cfg, "tok").await.unwrap();
        assert_eq!(routes, vec![route("app.example.com", "127.0.0.1:3000")]);
    }
}
