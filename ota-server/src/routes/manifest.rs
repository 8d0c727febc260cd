use crate::error::AppError;
use crate::models::release::Manifest;
use crate::services::catalog::Catalog;
use crate::state::AppState;
use axum::extract::{Path, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Value};
use std::sync::Arc;

pub fn router(_state: Arc<AppState>) -> Router<Arc<AppState>> {
    Router::new()
        .route("/{product}/manifest.json", get(product_manifest))
        .route("/manifest/latest", get(latest_manifest))
        .route("/manifest/{version}", get(version_manifest))
        .route("/releases/reload", post(reload))
}

async fn latest(state: &AppState) -> Result<Manifest, AppError> {
    let manifest = state.catalog.read().await.latest().cloned();
    manifest.ok_or_else(|| AppError::NoRelease("No release published".into()))
}

async fn product_manifest(
    State(state): State<Arc<AppState>>,
    Path(product): Path<String>,
) -> Result<Json<Manifest>, AppError> {
    tracing::info!(product = %product, "Manifest requested");
    if !state.config.serves_product(&product) {
        return Err(AppError::NotFound(format!("Unknown product: {}", product)));
    }
    Ok(Json(latest(&state).await?))
}

async fn latest_manifest(State(state): State<Arc<AppState>>) -> Result<Json<Manifest>, AppError> {
    Ok(Json(latest(&state).await?))
}

async fn version_manifest(
    State(state): State<Arc<AppState>>,
    Path(version): Path<String>,
) -> Result<Json<Manifest>, AppError> {
    let manifest = state.catalog.read().await.get(&version).cloned();
    manifest
        .map(Json)
        .ok_or_else(|| AppError::NotFound("Version not found".into()))
}

/// Rescan the package directory and swap in the new catalog.
async fn reload(State(state): State<Arc<AppState>>) -> Result<Json<Value>, AppError> {
    let root = state.config.package_dir.clone();
    let catalog = tokio::task::spawn_blocking(move || Catalog::load(&root))
        .await
        .map_err(|e| anyhow::anyhow!(e))??;

    let latest = catalog.latest().map(|m| m.version.clone());
    let versions = catalog.versions();
    *state.catalog.write().await = catalog;

    tracing::info!(releases = versions.len(), latest = ?latest, "Release catalog reloaded");
    Ok(Json(json!({ "versions": versions, "latest": latest })))
}

#[cfg(test)]
mod tests {
    use crate::routes::create_router;
    use crate::routes::test_support::{body_json, state_for};
    use crate::services::catalog::tests::write_release;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tempfile::TempDir;
    use tower::ServiceExt;

    fn get(uri: &str) -> Request<Body> {
        Request::get(uri).body(Body::empty()).unwrap()
    }

    #[tokio::test]
    async fn test_product_manifest_serves_latest() {
        let temp = TempDir::new().unwrap();
        write_release(temp.path(), "1.0.0", &[("app.bin", b"one")]);
        write_release(temp.path(), "1.1.0", &[("app.bin", b"two")]);
        let app = create_router(state_for(temp.path(), Some("robot_ai")));

        let response = app.clone().oneshot(get("/robot_ai/manifest.json")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert_eq!(json["version"], "1.1.0");
        assert_eq!(json["severity"], "security");
        assert_eq!(json["files"][0]["path"], "files/1.1.0/app.bin");

        let response = app.clone().oneshot(get("/vacuum/manifest.json")).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let response = app.oneshot(get("/manifest/1.0.0")).await.unwrap();
        assert_eq!(body_json(response).await["version"], "1.0.0");
    }

    #[tokio::test]
    async fn test_empty_catalog_and_reload() {
        let temp = TempDir::new().unwrap();
        let app = create_router(state_for(temp.path(), None));

        let response = app.clone().oneshot(get("/manifest/latest")).await.unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);

        write_release(temp.path(), "2.0.0", &[("app.bin", b"fresh")]);
        let response = app
            .clone()
            .oneshot(Request::post("/releases/reload").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(body_json(response).await["latest"], "2.0.0");

        let response = app.oneshot(get("/manifest/latest")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
}
