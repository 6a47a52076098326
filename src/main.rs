use metrics_exporter_prometheus::PrometheusBuilder;
use std::sync::Arc;
use tower_http::compression::CompressionLayer;
use tower_http::cors::CorsLayer;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use nutrition_analysis::{
    app_state::AppState,
    config::AppConfig,
    routes::{self, metrics::MetricsState},
    services::{queue::JobQueue, redis_store::RedisJobStore, status::StatusService, store::JobStore},
    shutdown,
};

#[tokio::main]
async fn main() {
    // Initialize structured logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .init();

    // Load configuration from environment
    let config = AppConfig::from_env().expect("Failed to load configuration from environment");

    tracing::info!("Initializing nutrition analysis API");

    // Initialize Prometheus metrics recorder
    let prometheus_handle = PrometheusBuilder::new()
        .install_recorder()
        .expect("Failed to install Prometheus metrics recorder");
    routes::metrics::describe_metrics();

    // Connect the job store
    tracing::info!("Connecting to Redis job store");
    let store: Arc<dyn JobStore> =
        Arc::new(RedisJobStore::new(&config.redis_url).expect("Failed to initialize job store"));
    match store.ping().await {
        Ok(()) => tracing::info!("Redis connection successful"),
        Err(e) => tracing::error!(error = %e, "Redis connection failed, continuing"),
    }

    let settings = config.queue_settings();
    let state = AppState::new(
        JobQueue::new(store.clone(), settings),
        StatusService::new(store, settings),
        config.environment.clone(),
    );

    let metrics_state = MetricsState {
        handle: prometheus_handle,
        queue: state.queue.clone(),
    };

    let app = routes::api_router(state)
        // Prometheus metrics endpoint (separate state)
        .merge(routes::metrics::metrics_router(metrics_state))
        .layer(TraceLayer::new_for_http())
        .layer(CompressionLayer::new())
        .layer(CorsLayer::permissive())
        .layer(RequestBodyLimitLayer::new(config.max_body_bytes));

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .expect("Failed to bind to address");

    tracing::info!("Server listening on {}", config.bind_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown::signal())
        .await
        .expect("Server error");
}
