use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::Json;
use chrono::{DateTime, Utc};
use domains::Comment;
use serde::{Deserialize, Serialize};
use serde_json::json;
use uuid::Uuid;

use crate::web::{identity, ApiError, AppState};

/// Public view of a comment. The author's identity hashes stay private.
#[derive(Debug, Serialize)]
pub struct CommentView {
    pub id: Uuid,
    pub report_id: Uuid,
    pub content: String,
    pub created_at: DateTime<Utc>,
    pub report_count: u32,
}

impl From<Comment> for CommentView {
    fn from(comment: Comment) -> Self {
        Self {
            id: comment.id,
            report_id: comment.report_id,
            content: comment.content,
            created_at: comment.created_at,
            report_count: comment.report_count,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct CommentQuery {
    pub report_id: Uuid,
    #[serde(default)]
    pub page: u64,
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommentAction {
    Create,
    /// Flag a comment as abusive.
    Report,
}

#[derive(Debug, Deserialize)]
pub struct CommentRequest {
    pub action: CommentAction,
    pub report_id: Option<Uuid>,
    pub comment_id: Option<Uuid>,
    pub content: Option<String>,
    pub fingerprint_hash: Option<String>,
    pub ip_hash: Option<String>,
}

/// `GET /api/comments?report_id=..&page=..`
pub async fn list(
    State(state): State<AppState>,
    query: Result<Query<CommentQuery>, QueryRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Query(query) = query?;
    let result = state.comments.list_comments(query.report_id, query.page).await;
    state.metrics.record_operation("list_comments", &result);
    let page = result?;

    let comments: Vec<CommentView> = page.comments.into_iter().map(CommentView::from).collect();
    Ok(Json(json!({ "success": true, "comments": comments, "hasMore": page.has_more })))
}

/// `POST /api/comments`: create a comment or flag one.
pub async fn submit(
    State(state): State<AppState>,
    headers: HeaderMap,
    payload: Result<Json<CommentRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(request) = payload?;
    let voter = identity::resolve(
        &state.hasher,
        &headers,
        identity::from_parts(request.fingerprint_hash, request.ip_hash),
    )?;

    match request.action {
        CommentAction::Create => {
            let report_id = request
                .report_id
                .ok_or_else(|| ApiError::BadRequest("report_id is required".to_string()))?;
            let content = request.content.unwrap_or_default();

            let result = state.comments.create_comment(report_id, &voter, &content).await;
            state.metrics.record_operation("create_comment", &result);
            let comment = CommentView::from(result?);
            Ok((StatusCode::CREATED, Json(json!({ "success": true, "comment": comment }))))
        }
        CommentAction::Report => {
            let comment_id = request
                .comment_id
                .ok_or_else(|| ApiError::BadRequest("comment_id is required".to_string()))?;

            let result = state.comments.flag_comment(comment_id, &voter).await;
            state.metrics.record_operation("flag_comment", &result);
            let outcome = result?;
            Ok((
                StatusCode::CREATED,
                Json(json!({
                    "success": true,
                    "reportCount": outcome.report_count,
                    "deleted": outcome.deleted,
                })),
            ))
        }
    }
}
