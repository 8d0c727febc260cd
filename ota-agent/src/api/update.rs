//! Update lifecycle endpoints.

use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use serde_json::json;
use tracing::{info, warn};

use super::AppState;
use crate::command::{Command, CommandRequest};

/// GET /status - Lifecycle state, persisted versions and pending tasks
pub async fn status(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.orchestrator.status().await)
}

/// GET /connectivity - Reachability of the update server and its manifest
pub async fn connectivity(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.orchestrator.connectivity_check().await)
}

/// POST /check - Run an update check now
pub async fn check(State(state): State<AppState>) -> impl IntoResponse {
    match state.orchestrator.check_for_updates().await {
        Ok(outcome) => (StatusCode::OK, Json(json!(outcome))),
        Err(e) => {
            warn!("Manual update check failed: {}", e);
            (StatusCode::BAD_GATEWAY, Json(json!({ "error": e.to_string() })))
        }
    }
}

/// POST /commands - Queue a front-end command for the next poll
pub async fn submit_command(
    State(state): State<AppState>,
    Json(req): Json<CommandRequest>,
) -> impl IntoResponse {
    if req.command == Command::Unknown {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": "unknown command" })),
        );
    }

    info!(command = %req.command, "Command received over HTTP");
    state.orchestrator.commands().push(req.command);
    (
        StatusCode::ACCEPTED,
        Json(json!({ "queued": req.command.as_str() })),
    )
}
