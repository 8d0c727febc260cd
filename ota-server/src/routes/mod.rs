pub mod files;
pub mod health;
pub mod manifest;
pub mod reports;

use crate::state::AppState;
use axum::Router;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .merge(health::router(state.clone()))
        .merge(manifest::router(state.clone()))
        .merge(files::router(state.clone()))
        .merge(reports::router(state.clone()))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crate::config::AppConfig;
    use crate::services::catalog::Catalog;
    use axum::body::Body;
    use axum::response::Response;
    use http_body_util::BodyExt;
    use std::path::Path;

    pub fn state_for(package_dir: &Path, product_type: Option<&str>) -> Arc<AppState> {
        let config = AppConfig {
            port: 0,
            package_dir: package_dir.to_path_buf(),
            product_type: product_type.map(str::to_string),
            log_level: "info".into(),
        };
        let catalog = Catalog::load(package_dir).unwrap();
        Arc::new(AppState::new(config, catalog))
    }

    pub async fn body_bytes(response: Response<Body>) -> Vec<u8> {
        response.into_body().collect().await.unwrap().to_bytes().to_vec()
    }

    pub async fn body_json(response: Response<Body>) -> serde_json::Value {
        serde_json::from_slice(&body_bytes(response).await).unwrap()
    }
}
