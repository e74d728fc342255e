//! Agent-side error kinds. Transport and upstream failures are handled
//! inline where they occur (a dead control channel triggers reconnect;
//! a failed local call becomes a 502 envelope) — this type covers the
//! failures that can't be locally recovered from: bad config, a
//! persistence-file write that didn't make it to disk, route-sync
//! requests that never got a usable answer.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum AgentError {
    #[error("failed to read config file {path}: {source}")]
    ConfigRead {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}: {source}")]
    ConfigParse {
        path: String,
        #[source]
        source: toml::de::Error,
    },

    #[error("gateway_url must use ws:// or wss://, got {0}")]
    InvalidGatewayUrl(String),

    #[error("failed to persist route store: {0}")]
    PersistFailed(String),

    #[error("route sync request failed: {0}")]
    RouteSyncRequest(String),

    #[error("route sync endpoint returned status {0}")]
    RouteSyncNon2xx(u16),

    #[error("failed to parse route sync response: {0}")]
    RouteSyncParse(String),
}
