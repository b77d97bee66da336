//! Dashboard state published to the UI.

use std::sync::Arc;
use tokio::sync::watch;

use crate::client::observer::SyncView;
use crate::client::repository::TaskRepository;
use crate::models::task::{ScenarioKind, TaskInfo};

pub const SYNC_FAILED_MESSAGE: &str = "sync failed";

/// What the dashboard shows once loaded.
#[derive(Debug, Clone, PartialEq)]
pub struct DashboardData {
    pub tasks: Vec<TaskInfo>,
    /// Tasks finished on this box that the server has not reported back yet.
    pub submitted: Vec<String>,
    pub total_credits_earned: f64,
}

impl DashboardData {
    pub fn from_repository(repository: &TaskRepository) -> Self {
        let tasks = repository.tasks();
        let total_credits_earned = tasks.iter().map(|t| t.credits_earned).sum();
        Self {
            tasks,
            submitted: repository.submitted(),
            total_credits_earned,
        }
    }

    /// Credits text, shown only once something has been earned.
    pub fn credits_label(&self) -> Option<String> {
        (self.total_credits_earned > 0.0).then(|| format!("{:.2}", self.total_credits_earned))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum DashboardUiState {
    Loading,
    Success(DashboardData),
    Error(String),
}

/// Which task flow to open for a task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskLaunch {
    SpeechData { task_id: String },
    SpeechVerification { task_id: String },
    TextTranslation { task_id: String },
    Unsupported { task_id: String, scenario: String },
}

pub fn launch_for(task: &TaskInfo) -> TaskLaunch {
    let task_id = task.task_id.clone();
    match &task.scenario_kind {
        ScenarioKind::SpeechData => TaskLaunch::SpeechData { task_id },
        ScenarioKind::SpeechVerification => TaskLaunch::SpeechVerification { task_id },
        ScenarioKind::TextTranslation => TaskLaunch::TextTranslation { task_id },
        ScenarioKind::Unsupported(tag) => TaskLaunch::Unsupported {
            task_id,
            scenario: tag.clone(),
        },
    }
}

/// Holds the dashboard state and publishes every change on a watch channel.
pub struct DashboardModel {
    repository: Arc<TaskRepository>,
    state: watch::Sender<DashboardUiState>,
}

impl DashboardModel {
    pub fn new(repository: Arc<TaskRepository>) -> Self {
        let initial = DashboardUiState::Success(DashboardData::from_repository(&repository));
        let (state, _rx) = watch::channel(initial);
        Self { repository, state }
    }

    pub fn subscribe(&self) -> watch::Receiver<DashboardUiState> {
        self.state.subscribe()
    }

    pub fn current(&self) -> DashboardUiState {
        self.state.borrow().clone()
    }

    /// Re-read the local projection and publish it.
    pub fn load_tasks(&self) {
        let data = DashboardData::from_repository(&self.repository);
        self.state.send_replace(DashboardUiState::Success(data));
    }

    /// Result callback of a task flow.
    pub fn on_task_finished(&self, task_id: &str) {
        if self.repository.mark_task_submitted(task_id) {
            self.load_tasks();
        } else {
            tracing::warn!(task_id = %task_id, "Finished task is not in the local projection");
        }
    }

    pub fn open_task(&self, task_id: &str) -> Option<TaskLaunch> {
        self.repository.task(task_id).map(|task| launch_for(&task))
    }
}

impl SyncView for DashboardModel {
    fn show_loading(&self) {
        self.state.send_if_modified(|state| {
            if *state == DashboardUiState::Loading {
                return false;
            }
            *state = DashboardUiState::Loading;
            true
        });
    }

    fn refresh(&self) {
        self.load_tasks();
    }

    fn show_sync_failed(&self) {
        self.state
            .send_replace(DashboardUiState::Error(SYNC_FAILED_MESSAGE.to_string()));
    }
}
