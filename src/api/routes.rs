use crate::api::{handlers, AppState};
use axum::{
    routing::{get, post},
    Router,
};
use tower_http::{
    cors::CorsLayer,
    trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer},
};

/// Build the main API router
pub fn build_router(state: AppState) -> Router {
    Router::new()
        // Health endpoints
        .route("/health", get(handlers::health_check))
        .route("/health/live", get(handlers::health_check))
        .route("/health/ready", get(handlers::health_check))
        // Scan ingestion
        .route("/v1/scans/sync", post(handlers::sync_scan))
        // Finding queries and suppression
        .route("/v1/findings", get(handlers::list_findings))
        .route("/v1/findings/:id", get(handlers::get_finding))
        .route("/v1/findings/:id/suppress", post(handlers::suppress_finding))
        .route(
            "/v1/findings/:id/unsuppress",
            post(handlers::unsuppress_finding),
        )
        // Posture scoring
        .route("/v1/posture/score", get(handlers::get_posture_score))
        // Add state
        .with_state(state)
        // Add middleware
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().include_headers(true))
                .on_response(DefaultOnResponse::new().include_headers(true)),
        )
        .layer(CorsLayer::permissive())
}
