//! # JSON API (axum)
//!
//! Routes, shared state and the error-to-status mapping. Every response is
//! a JSON object with a `success` flag; failures carry an `error` message.

mod errors;
mod handlers;
mod identity;

use std::sync::Arc;
use std::time::Instant;

use auth_adapters::IdentityHasher;
use axum::extract::{MatchedPath, Request, State};
use axum::middleware::{self, Next};
use axum::response::Response;
use axum::routing::get;
use axum::Router;
use domains::geo::PROXIMITY_RADIUS_METERS;
use services::{CommentService, ReportService, VoteService};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::metrics::ApiMetrics;

pub use errors::ApiError;
pub use identity::{FINGERPRINT_HEADER, FORWARDED_FOR_HEADER, REAL_IP_HEADER};

/// State shared across all request handlers.
#[derive(Clone)]
pub struct AppState {
    pub reports: Arc<ReportService>,
    pub votes: Arc<VoteService>,
    pub comments: Arc<CommentService>,
    /// Hashes raw identity headers for clients that do not send digests.
    pub hasher: Arc<IdentityHasher>,
    pub metrics: Arc<ApiMetrics>,
    pub nearby_radius_meters: f64,
    pub expose_metrics: bool,
}

impl AppState {
    pub fn new(reports: Arc<ReportService>, votes: Arc<VoteService>, comments: Arc<CommentService>) -> Self {
        Self {
            reports,
            votes,
            comments,
            hasher: Arc::new(IdentityHasher::unsalted()),
            metrics: Arc::new(ApiMetrics::new()),
            nearby_radius_meters: PROXIMITY_RADIUS_METERS,
            expose_metrics: true,
        }
    }

    pub fn with_hasher(mut self, hasher: IdentityHasher) -> Self {
        self.hasher = Arc::new(hasher);
        self
    }

    pub fn with_nearby_radius(mut self, meters: f64) -> Self {
        self.nearby_radius_meters = meters;
        self
    }

    pub fn with_metrics_endpoint(mut self, enabled: bool) -> Self {
        self.expose_metrics = enabled;
        self
    }
}

pub fn router(state: AppState) -> Router {
    let mut routes = Router::new()
        .route("/api/reports", get(handlers::reports::list).post(handlers::reports::submit))
        .route(
            "/api/votes",
            get(handlers::votes::current)
                .post(handlers::votes::cast)
                .delete(handlers::votes::remove),
        )
        .route("/api/comments", get(handlers::comments::list).post(handlers::comments::submit))
        .route("/health", get(handlers::health::health));

    if state.expose_metrics {
        routes = routes.route("/metrics", get(handlers::health::metrics));
    }

    routes
        .route_layer(middleware::from_fn_with_state(state.clone(), track_requests))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn track_requests(State(state): State<AppState>, request: Request, next: Next) -> Response {
    let started = Instant::now();
    let method = request.method().to_string();
    let route = request
        .extensions()
        .get::<MatchedPath>()
        .map(|path| path.as_str().to_owned())
        .unwrap_or_else(|| "unmatched".to_string());

    let response = next.run(request).await;
    state
        .metrics
        .observe_request(&method, &route, response.status().as_u16(), started.elapsed());
    response
}
