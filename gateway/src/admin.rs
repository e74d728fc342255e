//! # Admin Surface
//!
//! One read-only convenience endpoint, generalizing the teacher's
//! `GET /api/agents`. Mutating tunnel/route CRUD is explicitly out of
//! scope here — it lives in the external control store — so this is
//! the only non-data-plane route the gateway itself exposes.

use axum::extract::State;
use axum::Json;
use serde::Serialize;

use crate::state::AppState;

#[derive(Serialize)]
pub struct SessionListItem {
    pub token: String,
}

/// `GET /api/sessions` — lists the tokens currently holding a live
/// control-channel connection.
pub async fn list_sessions(State(state): State<AppState>) -> Json<Vec<SessionListItem>> {
    let items = state
        .sessions
        .tokens()
        .into_iter()
        .map(|token| SessionListItem { token })
        .collect();
    Json(items)
}
