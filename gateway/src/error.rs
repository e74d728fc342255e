//! Gateway-side error kinds and their public HTTP mapping.
//!
//! Every failure the public HTTP path can produce ends up as one of
//! these variants so a single `IntoResponse` impl decides the status
//! code, rather than scattering `StatusCode` literals through the
//! handler.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("missing or invalid Host header")]
    InvalidHost,

    #[error("no tunnel registered for this host")]
    UnknownHost,

    #[error("tunnel offline")]
    TunnelOffline,

    #[error("failed reading request body: {0}")]
    BodyRead(String),

    #[error("failed to reach agent: {0}")]
    AgentSendFailed(String),

    #[error("timed out waiting for agent response")]
    Timeout,

    #[error("failed to decode agent response: {0}")]
    ResponseDecodeFailed(String),
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let status = match &self {
            GatewayError::InvalidHost | GatewayError::BodyRead(_) => StatusCode::BAD_REQUEST,
            GatewayError::UnknownHost => StatusCode::NOT_FOUND,
            GatewayError::TunnelOffline => StatusCode::SERVICE_UNAVAILABLE,
            GatewayError::AgentSendFailed(_) | GatewayError::ResponseDecodeFailed(_) => {
                StatusCode::BAD_GATEWAY
            }
            GatewayError::Timeout => StatusCode::GATEWAY_TIMEOUT,
        };
        (status, self.to_string()).into_response()
    }
}
