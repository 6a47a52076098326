pub mod analyze;
pub mod error;
pub mod health;
pub mod metrics;

use axum::routing::{get, post};
use axum::Router;

use crate::app_state::AppState;

/// API routes, without the metrics endpoint or middleware layers.
pub fn api_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health::health_check))
        .route("/api/v1/analyze", post(analyze::submit_analysis))
        .route("/api/v1/analyze/{job_id}", get(analyze::get_job_status))
        .route("/api/v1/analyze/{job_id}/wait", get(analyze::wait_for_job))
        .with_state(state)
}
