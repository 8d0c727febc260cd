//! Local control API for the on-device front end.

pub mod health;
pub mod update;

use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use std::time::Instant;
use tower_http::trace::TraceLayer;

use crate::notify::BroadcastSink;
use crate::orchestrator::UpdateOrchestrator;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<UpdateOrchestrator>,
    /// Source of WebSocket notification streams
    pub events: BroadcastSink,
    pub started: Instant,
}

impl AppState {
    pub fn new(orchestrator: Arc<UpdateOrchestrator>, events: BroadcastSink) -> Self {
        Self {
            orchestrator,
            events,
            started: Instant::now(),
        }
    }
}

/// Create the API router with all endpoints
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Health endpoints
        .route("/health", get(health::health))
        .route("/version", get(health::version))
        // Update lifecycle
        .route("/status", get(update::status))
        .route("/connectivity", get(update::connectivity))
        .route("/check", post(update::check))
        .route("/commands", post(update::submit_command))
        // Notifications and commands over one socket
        .route("/ws", get(crate::ws::ws_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
