use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::http::header::RETRY_AFTER;
use axum::http::{HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use domains::DomainError;
use serde_json::json;

#[derive(Debug)]
pub enum ApiError {
    Domain(DomainError),
    /// Malformed or missing request input.
    BadRequest(String),
}

impl From<DomainError> for ApiError {
    fn from(err: DomainError) -> Self {
        ApiError::Domain(err)
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::BadRequest(rejection.body_text())
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        ApiError::BadRequest(rejection.body_text())
    }
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Domain(err) => match err {
                DomainError::InvalidLocation { .. } | DomainError::InvalidComment(_) => StatusCode::BAD_REQUEST,
                DomainError::NotFound(..) => StatusCode::NOT_FOUND,
                DomainError::DuplicateVote(_) | DomainError::DuplicateReportFlag(_) => StatusCode::CONFLICT,
                DomainError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
                DomainError::StorageUnavailable(_) | DomainError::LocationUnavailable(_) => {
                    StatusCode::SERVICE_UNAVAILABLE
                }
            },
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = match &self {
            ApiError::BadRequest(message) => message.clone(),
            ApiError::Domain(err) if err.is_user_facing() => err.to_string(),
            ApiError::Domain(err) => {
                tracing::warn!(error = %err, "request failed on infrastructure error");
                "service temporarily unavailable".to_string()
            }
        };

        let mut response = (status, Json(json!({ "success": false, "error": message }))).into_response();
        if let ApiError::Domain(DomainError::RateLimited { retry_after_secs }) = self {
            response
                .headers_mut()
                .insert(RETRY_AFTER, HeaderValue::from(retry_after_secs));
        }
        response
    }
}
