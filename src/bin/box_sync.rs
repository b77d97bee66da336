use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use fieldbox_sync::{
    client::{
        api::ServerApi,
        dashboard::{launch_for, DashboardModel, DashboardUiState},
        repository::TaskRepository,
        scheduler::{NetworkMonitor, TokioScheduler},
        sync::{Dashboard, DashboardSyncWork, SyncScheduler},
    },
    config::ClientConfig,
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

    let config = ClientConfig::from_env().expect("Failed to load BOX_* configuration");
    tracing::info!(box_id = %config.box_id, server = %config.server_url, "Starting box sync");

    let api = ServerApi::new(&config.server_url, &config.box_id, config.sync_timeout())
        .expect("Failed to build HTTP client");
    let repository = Arc::new(TaskRepository::new());
    let model = Arc::new(DashboardModel::new(repository.clone()));

    // Connectivity is assumed; the scheduler still cancels the sync if it is marked lost.
    let scheduler = Arc::new(TokioScheduler::new(NetworkMonitor::new(true)));
    let work = Arc::new(DashboardSyncWork::new(api, repository));
    let sync = SyncScheduler::new(scheduler, work, config.sync_timeout());
    let dashboard = Dashboard::new(model.clone(), sync);

    let mut ui = model.subscribe();
    let handle = dashboard.sync_with_server();
    tracing::info!(handle = %handle, "Sync requested");

    // The first publish after the request is either Loading or the sync result.
    let outcome = loop {
        if ui.changed().await.is_err() {
            break model.current();
        }
        let state = ui.borrow_and_update().clone();
        if state != DashboardUiState::Loading {
            break state;
        }
    };
    dashboard.close();

    match outcome {
        DashboardUiState::Success(data) => {
            let credits = data.credits_label();
            tracing::info!(
                tasks = data.tasks.len(),
                credits = credits.as_deref().unwrap_or("-"),
                "Dashboard synced"
            );
            for task in &data.tasks {
                tracing::info!(
                    task_id = %task.task_id,
                    name = %task.task_name,
                    launch = ?launch_for(task),
                    "Task"
                );
            }
        }
        DashboardUiState::Error(message) => {
            tracing::error!(error = %message, "Dashboard sync failed");
            std::process::exit(1);
        }
        DashboardUiState::Loading => {
            tracing::error!("Dashboard sync did not finish");
            std::process::exit(1);
        }
    }
}
