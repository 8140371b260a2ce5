use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::Json;
use domains::VoterIdentity;
use serde::Deserialize;
use serde_json::json;

use crate::web::{identity, ApiError, AppState};

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportAction {
    Create,
    CheckNearby,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportRequest {
    pub action: ReportAction,
    pub latitude: f64,
    pub longitude: f64,
    #[serde(default)]
    pub user_identity: Option<VoterIdentity>,
}

/// `GET /api/reports`: every active report, newest first.
pub async fn list(State(state): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    let result = state.reports.list_active().await;
    state.metrics.record_operation("list_active", &result);
    let reports = result?;
    Ok(Json(json!({ "success": true, "reports": reports })))
}

/// `POST /api/reports`: create a report, or list the ones near a point.
pub async fn submit(
    State(state): State<AppState>,
    headers: HeaderMap,
    payload: Result<Json<ReportRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(request) = payload?;

    match request.action {
        ReportAction::CheckNearby => {
            let result = state
                .reports
                .get_nearby(request.latitude, request.longitude, state.nearby_radius_meters)
                .await;
            state.metrics.record_operation("get_nearby", &result);
            let reports = result?;
            Ok((StatusCode::OK, Json(json!({ "success": true, "reports": reports }))))
        }
        ReportAction::Create => {
            let reporter = identity::resolve(&state.hasher, &headers, request.user_identity)?;
            let result = state
                .reports
                .create_report_for(&reporter, request.latitude, request.longitude)
                .await;
            state.metrics.record_operation("create_report", &result);
            let report = result?;
            Ok((StatusCode::CREATED, Json(json!({ "success": true, "report": report }))))
        }
    }
}
