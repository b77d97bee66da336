use fieldbox_sync::{
    config::AppConfig,
    db::{self, store::PgStatusStore},
    routes,
    services::{
        registration::{RegistrationHandler, REGISTRATION_QUEUE},
        store::StatusStore,
        worker::WorkerPool,
    },
};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::sync::Arc;
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

    tracing::info!("Starting registration worker");

    // Load configuration
    let config = AppConfig::from_env().expect("Failed to load configuration");

    // Metrics are recorded in-process; the worker has no scrape endpoint of its own.
    PrometheusBuilder::new()
        .install_recorder()
        .expect("Failed to install Prometheus metrics recorder");
    routes::metrics::describe();

    // Initialize database
    tracing::info!("Connecting to PostgreSQL");
    let db_pool = db::init_pool(&config.database_url)
        .await
        .expect("Failed to connect to database");

    db::run_migrations(&db_pool)
        .await
        .expect("Failed to run database migrations");

    let store: Arc<dyn StatusStore> = Arc::new(PgStatusStore::new(db_pool));
    let handler = Arc::new(RegistrationHandler::new(store.clone()));
    let settings = config.worker_settings();

    // Lease owners must be unique across every worker process sharing the store.
    let worker_name = format!("worker-{}", uuid::Uuid::new_v4().simple());
    let pool = WorkerPool::new(&worker_name, REGISTRATION_QUEUE, store, handler, settings);

    tracing::info!(
        workers = pool.len(),
        queue = REGISTRATION_QUEUE,
        "Worker pool ready, starting job processing loop"
    );

    let running = pool.start();

    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
    }

    tracing::info!("Shutdown signal received, draining workers");
    running.shutdown().await;
    tracing::info!("Worker stopped");
}
