use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::Arc;

use crate::services::queue::JobQueue;

/// State for the scrape endpoint, kept apart from the API state.
#[derive(Clone)]
pub struct MetricsState {
    pub handle: PrometheusHandle,
    pub queue: Arc<JobQueue>,
}

/// The `/metrics` route.
pub fn metrics_router(state: MetricsState) -> Router {
    Router::new()
        .route("/metrics", get(prometheus_metrics))
        .with_state(state)
}

/// Register descriptions for every metric the queue records.
pub fn describe_metrics() {
    metrics::describe_counter!("analysis_jobs_enqueued_total", "Total analysis jobs enqueued");
    metrics::describe_counter!(
        "analysis_jobs_completed_total",
        "Total analysis jobs that completed"
    );
    metrics::describe_counter!("analysis_jobs_failed_total", "Total analysis jobs that failed");
    metrics::describe_counter!(
        "analysis_attempts_retried_total",
        "Analysis calls retried after a transient failure"
    );
    metrics::describe_counter!(
        "analysis_jobs_reaped_total",
        "Abandoned jobs force-failed by the reaper"
    );
    metrics::describe_histogram!(
        "analysis_processing_seconds",
        "Time from job start to terminal state"
    );
    metrics::describe_gauge!("analysis_queue_depth", "Jobs waiting on the incoming list");
    metrics::describe_gauge!("analysis_jobs_in_flight", "Jobs claimed by the worker");
}

/// GET /metrics — Prometheus text exposition.
///
/// Queue depth is sampled on every scrape so the gauge never lags the store.
pub async fn prometheus_metrics(State(state): State<MetricsState>) -> impl IntoResponse {
    if let Err(e) = state.queue.queue_depth().await {
        tracing::warn!(error = %e, "Failed to sample queue depth");
    }
    state.handle.render()
}
