use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Query, State};
use axum::http::HeaderMap;
use axum::response::IntoResponse;
use axum::Json;
use domains::{VoteOutcome, VoteType, VoterIdentity};
use serde::Deserialize;
use serde_json::{json, Value};
use uuid::Uuid;

use crate::web::{identity, ApiError, AppState};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VoteQuery {
    pub report_id: Uuid,
    pub fingerprint_hash: Option<String>,
    pub ip_hash: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CastVoteRequest {
    pub report_id: Uuid,
    /// `upvote` / `downvote` (or `up` / `down`).
    pub vote_type: String,
    #[serde(default)]
    pub user_identity: Option<VoterIdentity>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoveVoteRequest {
    pub report_id: Uuid,
    #[serde(default)]
    pub user_identity: Option<VoterIdentity>,
}

fn outcome_body(outcome: VoteOutcome) -> Value {
    json!({
        "success": true,
        "upvoteCount": outcome.upvote_count,
        "downvoteCount": outcome.downvote_count,
        "newValidity": outcome.new_expiry,
    })
}

/// `GET /api/votes`: the caller's current vote on a report, if any.
pub async fn current(
    State(state): State<AppState>,
    headers: HeaderMap,
    query: Result<Query<VoteQuery>, QueryRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Query(query) = query?;
    let voter = identity::resolve(
        &state.hasher,
        &headers,
        identity::from_parts(query.fingerprint_hash, query.ip_hash),
    )?;

    let result = state.votes.get_vote(query.report_id, &voter).await;
    state.metrics.record_operation("get_vote", &result);
    let vote = result?;
    Ok(Json(json!({ "success": true, "vote": vote })))
}

/// `POST /api/votes`: cast or switch a vote.
pub async fn cast(
    State(state): State<AppState>,
    headers: HeaderMap,
    payload: Result<Json<CastVoteRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(request) = payload?;
    let vote_type = VoteType::parse(&request.vote_type)
        .ok_or_else(|| ApiError::BadRequest(format!("invalid vote type '{}'", request.vote_type)))?;
    let voter = identity::resolve(&state.hasher, &headers, request.user_identity)?;

    let result = state.votes.cast_vote(request.report_id, &voter, vote_type).await;
    state.metrics.record_operation("cast_vote", &result);
    Ok(Json(outcome_body(result?)))
}

/// `DELETE /api/votes`: withdraw a vote. Withdrawing nothing still succeeds.
pub async fn remove(
    State(state): State<AppState>,
    headers: HeaderMap,
    payload: Result<Json<RemoveVoteRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(request) = payload?;
    let voter = identity::resolve(&state.hasher, &headers, request.user_identity)?;

    let result = state.votes.remove_vote(request.report_id, &voter).await;
    state.metrics.record_operation("remove_vote", &result);
    Ok(Json(outcome_body(result?)))
}
