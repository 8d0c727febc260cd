use crate::error::AppError;
use crate::state::AppState;
use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::header;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use std::sync::Arc;
use tokio_util::io::ReaderStream;

pub fn router(_state: Arc<AppState>) -> Router<Arc<AppState>> {
    Router::new().route("/files/{version}/{name}", get(download))
}

/// Stream a published payload.
async fn download(
    State(state): State<Arc<AppState>>,
    Path((version, name)): Path<(String, String)>,
) -> Result<Response, AppError> {
    if name.contains("..") {
        return Err(AppError::BadRequest("Invalid file name".into()));
    }

    let path = state
        .catalog
        .read()
        .await
        .payload_path(&version, &name)
        .ok_or_else(|| AppError::NotFound("Package file not found".into()))?;

    let file = tokio::fs::File::open(&path).await?;
    let length = file.metadata().await?.len();
    tracing::info!(version = %version, file = %name, bytes = length, "Serving payload");

    let body = Body::from_stream(ReaderStream::new(file));
    Ok((
        [
            (header::CONTENT_TYPE, "application/octet-stream".to_string()),
            (header::CONTENT_LENGTH, length.to_string()),
        ],
        body,
    )
        .into_response())
}

#[cfg(test)]
mod tests {
    use crate::routes::create_router;
    use crate::routes::test_support::{body_bytes, state_for};
    use crate::services::catalog::tests::write_release;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tempfile::TempDir;
    use tower::ServiceExt;

    #[tokio::test]
    async fn test_download_listed_payload_only() {
        let temp = TempDir::new().unwrap();
        write_release(temp.path(), "1.1.0", &[("app.bin", b"payload-bytes")]);
        std::fs::write(temp.path().join("1.1.0/files/unlisted.bin"), b"x").unwrap();
        let app = create_router(state_for(temp.path(), None));

        let response = app
            .clone()
            .oneshot(Request::get("/files/1.1.0/app.bin").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_bytes(response).await, b"payload-bytes");

        let response = app
            .oneshot(Request::get("/files/1.1.0/unlisted.bin").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
