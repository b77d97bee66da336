//! Dashboard synchronization against the server.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

use crate::client::api::ServerApi;
use crate::client::dashboard::{DashboardModel, TaskLaunch};
use crate::client::observer::{SyncResultObserver, SyncView};
use crate::client::repository::TaskRepository;
use crate::client::scheduler::{
    BackgroundScheduler, Constraints, Subscription, SyncHandle, SyncWork, UnitRequest,
    WorkResult,
};

/// Coalescing class of dashboard syncs. At most one is pending at a time.
pub const DASHBOARD_SYNC_CLASS: &str = "dashboard-sync";

/// Pulls the box's snapshot and replaces the local projection with it.
pub struct DashboardSyncWork {
    api: ServerApi,
    repository: Arc<TaskRepository>,
}

impl DashboardSyncWork {
    pub fn new(api: ServerApi, repository: Arc<TaskRepository>) -> Self {
        Self { api, repository }
    }
}

#[async_trait]
impl SyncWork for DashboardSyncWork {
    async fn run(&self) -> WorkResult {
        let snapshot = self.api.pull().await?;
        tracing::info!(
            box_id = %self.api.box_id(),
            tasks = snapshot.tasks.len(),
            accounts = snapshot.accounts.len(),
            "Pulled sync snapshot"
        );
        self.repository.replace_all(snapshot);
        Ok(())
    }
}

/// Submits dashboard syncs to the background scheduler.
#[derive(Clone)]
pub struct SyncScheduler {
    scheduler: Arc<dyn BackgroundScheduler>,
    work: Arc<dyn SyncWork>,
    timeout: Duration,
}

impl SyncScheduler {
    pub fn new(
        scheduler: Arc<dyn BackgroundScheduler>,
        work: Arc<dyn SyncWork>,
        timeout: Duration,
    ) -> Self {
        Self {
            scheduler,
            work,
            timeout,
        }
    }

    pub fn request_sync(&self) -> Subscription {
        self.request_sync_with(Constraints::network())
    }

    pub fn request_sync_with(&self, constraints: Constraints) -> Subscription {
        self.scheduler.enqueue_unique(UnitRequest {
            class: DASHBOARD_SYNC_CLASS.to_string(),
            constraints,
            work: self.work.clone(),
            timeout: self.timeout,
        })
    }
}

/// The dashboard screen: model, sync submission and sync observation.
pub struct Dashboard {
    model: Arc<DashboardModel>,
    sync: SyncScheduler,
    observer: SyncResultObserver,
}

impl Dashboard {
    pub fn new(model: Arc<DashboardModel>, sync: SyncScheduler) -> Self {
        let view: Arc<dyn SyncView> = model.clone();
        Self {
            observer: SyncResultObserver::new(view),
            model,
            sync,
        }
    }

    pub fn model(&self) -> &Arc<DashboardModel> {
        &self.model
    }

    /// Request a sync and observe it. Repeated calls while one is pending
    /// keep observing the same unit.
    pub fn sync_with_server(&self) -> SyncHandle {
        let subscription = self.sync.request_sync();
        let handle = subscription.handle();
        self.observer.attach(subscription);
        handle
    }

    pub fn open_task(&self, task_id: &str) -> Option<TaskLaunch> {
        self.model.open_task(task_id)
    }

    pub fn on_task_finished(&self, task_id: &str) {
        self.model.on_task_finished(task_id);
    }

    /// Teardown: stop observing. A pending sync still runs to completion.
    pub fn close(&self) {
        self.observer.stop();
    }
}
