//! # Agent Configuration & Route Persistence
//!
//! Generalizes the teacher's single `server_url: RwLock<String>` (set
//! at runtime through a Tauri IPC command) into a file-backed config
//! plus a durable route store, since this headless agent has no UI to
//! reconfigure itself from.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::warn;
use tunnel_protocol::{normalize_hostname, normalize_target, RouteSpec};

use crate::error::AgentError;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RouteSyncConfig {
    /// `GET` endpoint, e.g. `https://control.example.com/agent/routes`.
    pub url: String,
    pub tunnel_id: String,
    #[serde(default = "default_sync_interval")]
    pub interval_secs: u64,
}

fn default_sync_interval() -> u64 {
    5
}

/// On-disk agent configuration, loaded once at startup.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AgentConfig {
    /// Control-channel base URL, `ws://` or `wss://`.
    pub gateway_url: String,
    pub token: String,
    #[serde(default)]
    pub routes: Vec<RouteSpec>,
    #[serde(default)]
    pub route_sync: Option<RouteSyncConfig>,
    /// In managed mode the agent refuses local route mutation; routes
    /// only ever change via `route_sync`. Operational contract only.
    #[serde(default)]
    pub managed: bool,
    /// Where the route persistence file lives. Defaults to
    /// `routes.json` next to the config file if unset.
    #[serde(default)]
    pub routes_file: Option<PathBuf>,
}

impl AgentConfig {
    pub fn load(path: &Path) -> Result<Self, AgentError> {
        let text = std::fs::read_to_string(path).map_err(|source| AgentError::ConfigRead {
            path: path.display().to_string(),
            source,
        })?;
        let config: AgentConfig = toml::from_str(&text).map_err(|source| AgentError::ConfigParse {
            path: path.display().to_string(),
            source,
        })?;
        if !config.gateway_url.starts_with("ws://") && !config.gateway_url.starts_with("wss://") {
            return Err(AgentError::InvalidGatewayUrl(config.gateway_url));
        }
        Ok(config)
    }

    pub fn routes_file_path(&self, config_path: &Path) -> PathBuf {
        self.routes_file.clone().unwrap_or_else(|| {
            config_path
                .parent()
                .unwrap_or_else(|| Path::new("."))
                .join("routes.json")
        })
    }
}

#[derive(Debug, Deserialize, Serialize)]
struct RoutesFile {
    routes: Vec<RouteSpec>,
}

/// Durable `hostname -> target` mapping, persisted via write-to-temp +
/// rename so a crash mid-write never leaves a corrupt file behind.
pub struct RouteStore {
    path: PathBuf,
}

impl RouteStore {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    /// Loads the persisted route set. Missing file, unreadable JSON,
    /// and individually malformed entries are all treated the same
    /// way as an empty/partial result — logged and dropped, never a
    /// hard failure, since this is advisory local cache rebuilt from
    /// the next successful sync or `register_routes` anyway.
    pub fn load(&self) -> Vec<RouteSpec> {
        let text = match std::fs::read_to_string(&self.path) {
            Ok(text) => text,
            Err(_) => return Vec::new(),
        };
        let parsed: RoutesFile = match serde_json::from_str(&text) {
            Ok(parsed) => parsed,
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "ignoring unreadable route store");
                return Vec::new();
            }
        };
        parsed
            .routes
            .into_iter()
            .filter_map(|r| {
                let hostname = normalize_hostname(&r.hostname)?;
                let target = normalize_target(&r.target)?;
                Some(RouteSpec { hostname, target })
            })
            .collect()
    }

    /// Atomically replaces the persisted route set.
    pub fn save(&self, routes: &[RouteSpec]) -> Result<(), AgentError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| AgentError::PersistFailed(e.to_string()))?;
        }
        let parent = self.path.parent().unwrap_or_else(|| Path::new("."));
        let body = serde_json::to_string_pretty(&RoutesFile {
            routes: routes.to_vec(),
        })
        .map_err(|e| AgentError::PersistFailed(e.to_string()))?;

        let mut tmp = tempfile::NamedTempFile::new_in(parent)
            .map_err(|e| AgentError::PersistFailed(e.to_string()))?;
        use std::io::Write;
        tmp.write_all(body.as_bytes())
            .map_err(|e| AgentError::PersistFailed(e.to_string()))?;
        tmp.persist(&self.path)
            .map_err(|e| AgentError::PersistFailed(e.to_string()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_valid_routes() {
        let dir = tempfile::tempdir().unwrap();
        let store = RouteStore::new(dir.path().join("routes.json"));
        let routes = vec![
            RouteSpec {
                hostname: "app.example.com".to_string(),
                target: "127.0.0.1:3000".to_string(),
            },
            RouteSpec {
                hostname: "api.example.com".to_string(),
                target: "127.0.0.1:4000".to_string(),
            },
        ];
        store.save(&routes).unwrap();
        let loaded = store.load();
        assert_eq!(loaded, routes);
    }

    #[test]
    fn missing_file_loads_as_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = RouteStore::new(dir.path().join("nope.json"));
        assert!(store.load().is_empty());
    }

    #[test]
    fn drops_invalid_entries_on_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("routes.json");
        std::fs::write(
            &path,
            r#"{"routes":[{"hostname":"no-dot","target":"127.0.0.1:1"},{"hostname":"ok.example.com","target":"127.0.0.1:2"}]}"#,
        )
        .unwrap();
        let store = RouteStore::new(path);
        let loaded = store.load();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].hostname, "ok.example.com");
    }

    #[test]
    fn rejects_gateway_url_without_ws_scheme() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("agent.toml");
        std::fs::write(
            &path,
            "gateway_url = \"http://gateway.example.com\"\ntoken = \"t\"\n",
        )
        .unwrap();
        assert!(matches!(
            AgentConfig::load(&path),
            Err(AgentError::InvalidGatewayUrl(_))
        ));
    }
}
