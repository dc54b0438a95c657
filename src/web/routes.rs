use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::compression::CompressionLayer;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use super::handlers;
use super::state::AppState;

/// Aggregate reports are small, but leave room for large test plans
const UPLOAD_LIMIT_BYTES: usize = 20 * 1024 * 1024;

// API Routes - REST API for programmatic access
pub fn api_routes() -> Router<Arc<AppState>> {
    Router::new().nest(
        "/api",
        Router::new()
            // Natural-language questions over the metrics table
            .route("/nl-query", post(handlers::api::nl_query))

            // Load-test results
            .route("/upload", post(handlers::api::upload_results))
            .route("/report", post(handlers::api::summary_report))
            .route("/runs", get(handlers::api::list_runs))

            // Schema and system status
            .route("/schema", get(handlers::api::get_schema))
            .route("/status", get(handlers::api::system_status)),
    )
}

pub fn app(state: Arc<AppState>) -> Router {
    api_routes()
        .layer(DefaultBodyLimit::max(UPLOAD_LIMIT_BYTES))
        .layer(TraceLayer::new_for_http())
        .layer(CompressionLayer::new())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
