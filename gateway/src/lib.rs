//! Library surface for the tunnel gateway, split out from `main.rs` so
//! integration tests can drive the router directly with
//! `tower::ServiceExt::oneshot` instead of binding a real socket.

pub mod admin;
pub mod error;
pub mod headers;
pub mod public;
pub mod routes;
pub mod session;
pub mod state;
pub mod ws;
