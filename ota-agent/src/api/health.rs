//! Health check endpoints.

use axum::{extract::State, response::IntoResponse, Json};
use serde_json::json;

use super::AppState;

/// GET /health - Health check endpoint
pub async fn health(State(state): State<AppState>) -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "uptime_secs": state.started.elapsed().as_secs(),
        "lifecycle": state.orchestrator.state(),
    }))
}

/// GET /version - Agent build and installed release
pub async fn version(State(state): State<AppState>) -> impl IntoResponse {
    Json(json!({
        "agent_version": env!("CARGO_PKG_VERSION"),
        "current_version": state.orchestrator.current_version(),
        "features": ["zstd", "sha256"],
    }))
}
