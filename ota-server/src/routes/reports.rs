use crate::error::AppError;
use crate::models::release::StatusReport;
use crate::state::AppState;
use axum::extract::{Query, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;

/// Reports kept per device
const MAX_REPORTS_PER_DEVICE: usize = 100;

pub fn router(_state: Arc<AppState>) -> Router<Arc<AppState>> {
    Router::new()
        .route("/report", post(submit_report))
        .route("/reports", get(list_reports))
}

async fn submit_report(
    State(state): State<Arc<AppState>>,
    Json(report): Json<StatusReport>,
) -> Result<Json<Value>, AppError> {
    if report.device_id.trim().is_empty() {
        return Err(AppError::BadRequest("device_id is required".into()));
    }

    tracing::info!(
        device = %report.device_id,
        version = %report.version,
        status = ?report.status,
        "Status report: {}",
        report.message
    );

    let mut entry = state.reports.entry(report.device_id.clone()).or_default();
    entry.push(report);
    if entry.len() > MAX_REPORTS_PER_DEVICE {
        entry.remove(0);
    }
    Ok(Json(json!({ "status": "received" })))
}

#[derive(Deserialize)]
pub struct ReportsQuery {
    pub device_id: Option<String>,
}

async fn list_reports(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ReportsQuery>,
) -> Json<Vec<StatusReport>> {
    let mut reports: Vec<StatusReport> = match query.device_id {
        Some(device_id) => state
            .reports
            .get(&device_id)
            .map(|r| r.value().clone())
            .unwrap_or_default(),
        None => state
            .reports
            .iter()
            .flat_map(|r| r.value().clone())
            .collect(),
    };
    reports.sort_by_key(|r| r.timestamp);
    Json(reports)
}

#[cfg(test)]
mod tests {
    use crate::routes::create_router;
    use crate::routes::test_support::{body_json, state_for};
    use axum::body::Body;
    use axum::http::{header, Request, StatusCode};
    use tempfile::TempDir;
    use tower::ServiceExt;

    fn report(device: &str, status: &str, timestamp: i64) -> Request<Body> {
        let body = serde_json::json!({
            "device_id": device,
            "product_type": "robot_ai",
            "version": "1.1.0",
            "status": status,
            "message": "done",
            "timestamp": timestamp,
        });
        Request::post("/report")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn test_reports_are_recorded_per_device() {
        let temp = TempDir::new().unwrap();
        let app = create_router(state_for(temp.path(), None));

        for request in [
            report("ABCD-1234", "failed", 20),
            report("ABCD-1234", "success", 30),
            report("FFFF-0000", "success", 10),
        ] {
            let response = app.clone().oneshot(request).await.unwrap();
            assert_eq!(response.status(), StatusCode::OK);
        }

        let response = app
            .clone()
            .oneshot(Request::get("/reports?device_id=ABCD-1234").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let json = body_json(response).await;
        assert_eq!(json.as_array().unwrap().len(), 2);
        assert_eq!(json[1]["status"], "success");

        let response = app
            .oneshot(Request::get("/reports").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let json = body_json(response).await;
        assert_eq!(json.as_array().unwrap().len(), 3);
        assert_eq!(json[0]["device_id"], "FFFF-0000");
    }

    #[tokio::test]
    async fn test_invalid_status_rejected() {
        let temp = TempDir::new().unwrap();
        let app = create_router(state_for(temp.path(), None));

        let response = app.oneshot(report("ABCD-1234", "exploded", 1)).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    }
}
