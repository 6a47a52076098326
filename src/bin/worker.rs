use nutrition_analysis::{
    config::AppConfig,
    services::{
        analysis::OpenRouterClient,
        processor::JobProcessor,
        reaper::Reaper,
        redis_store::RedisJobStore,
        store::JobStore,
        worker::WorkerPool,
    },
    shutdown,
};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    // Initialize structured logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .init();

    tracing::info!("Starting image analysis worker");

    let config = AppConfig::from_env().expect("Failed to load configuration");
    if config.openrouter_api_key.is_empty() {
        tracing::warn!("OPENROUTER_API_KEY is empty, analysis calls will be rejected");
    }

    tracing::info!("Connecting to Redis job store");
    let store: Arc<dyn JobStore> =
        Arc::new(RedisJobStore::new(&config.redis_url).expect("Failed to initialize job store"));
    match store.ping().await {
        Ok(()) => tracing::info!("Redis connection successful"),
        Err(e) => tracing::error!(error = %e, "Redis connection failed, worker will keep retrying"),
    }

    let analysis = OpenRouterClient::new(
        &config.openrouter_base_url,
        &config.openrouter_api_key,
        Duration::from_secs(config.analysis_timeout_secs),
    )
    .expect("Failed to initialize analysis client");

    let settings = config.queue_settings();
    let processor = Arc::new(JobProcessor::new(
        store.clone(),
        Arc::new(analysis),
        config.retry_policy(),
        settings.ttl,
        config.analysis_model.clone(),
    ));
    let pool = Arc::new(WorkerPool::new(
        store.clone(),
        processor,
        config.max_concurrent_jobs,
        settings,
    ));

    // Fail anything a previous worker left behind before taking new work.
    let reaper = Reaper::new(
        store,
        pool.active_jobs(),
        config.reaper_settings(),
        settings.ttl,
    );
    match reaper.sweep().await {
        Ok(reaped) => tracing::info!(reaped, "Startup reaper sweep complete"),
        Err(e) => tracing::warn!(error = %e, "Startup reaper sweep failed"),
    }

    let cancel = CancellationToken::new();
    let reaper_handle = reaper.spawn(cancel.clone());
    let worker_handle = pool.spawn(cancel.clone());

    tracing::info!(
        max_concurrent_jobs = config.max_concurrent_jobs,
        "Worker ready, starting job processing loop"
    );

    shutdown::signal().await;
    cancel.cancel();

    if let Err(e) = worker_handle.await {
        tracing::error!(error = %e, "Worker loop panicked");
    }
    if let Err(e) = reaper_handle.await {
        tracing::error!(error = %e, "Reaper panicked");
    }
    tracing::info!("Worker stopped");
}
