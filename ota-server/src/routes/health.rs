use crate::state::AppState;
use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use serde_json::{json, Value};
use std::sync::Arc;

pub fn router(_state: Arc<AppState>) -> Router<Arc<AppState>> {
    Router::new()
        .route("/ping", get(ping))
        .route("/health", get(health))
}

async fn ping() -> &'static str {
    "OK"
}

async fn health(State(state): State<Arc<AppState>>) -> Json<Value> {
    let catalog = state.catalog.read().await;
    Json(json!({
        "status": "healthy",
        "timestamp": chrono::Local::now().to_rfc3339(),
        "version": env!("CARGO_PKG_VERSION"),
        "latest_release": catalog.latest().map(|m| m.version.clone()),
        "releases": catalog.versions().len(),
    }))
}
