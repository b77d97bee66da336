use chrono::{DateTime, Utc};
use std::collections::HashSet;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::models::account::AccountRecord;
use crate::models::sync::SyncSnapshot;
use crate::models::task::TaskInfo;

#[derive(Default)]
struct Projection {
    tasks: Vec<TaskInfo>,
    accounts: Vec<AccountRecord>,
    submitted: HashSet<String>,
    last_synced_at: Option<DateTime<Utc>>,
}

/// The box's local copy of its tasks and accounts.
///
/// Each successful sync replaces the whole projection; local flags set in
/// between do not survive it.
#[derive(Default)]
pub struct TaskRepository {
    inner: RwLock<Projection>,
}

impl TaskRepository {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, Projection> {
        self.inner.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, Projection> {
        self.inner.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn replace_all(&self, snapshot: SyncSnapshot) {
        let mut projection = self.write();
        *projection = Projection {
            tasks: snapshot.tasks,
            accounts: snapshot.accounts,
            submitted: HashSet::new(),
            last_synced_at: Some(Utc::now()),
        };
        tracing::debug!(
            tasks = projection.tasks.len(),
            accounts = projection.accounts.len(),
            "Local projection replaced"
        );
    }

    pub fn snapshot(&self) -> SyncSnapshot {
        let projection = self.read();
        SyncSnapshot {
            tasks: projection.tasks.clone(),
            accounts: projection.accounts.clone(),
        }
    }

    pub fn tasks(&self) -> Vec<TaskInfo> {
        self.read().tasks.clone()
    }

    pub fn task(&self, task_id: &str) -> Option<TaskInfo> {
        self.read().tasks.iter().find(|t| t.task_id == task_id).cloned()
    }

    /// Flag a task as submitted from this box. Returns false for unknown tasks.
    pub fn mark_task_submitted(&self, task_id: &str) -> bool {
        let mut projection = self.write();
        if !projection.tasks.iter().any(|t| t.task_id == task_id) {
            return false;
        }
        projection.submitted.insert(task_id.to_string());
        true
    }

    pub fn is_submitted(&self, task_id: &str) -> bool {
        self.read().submitted.contains(task_id)
    }

    pub fn submitted(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.read().submitted.iter().cloned().collect();
        ids.sort();
        ids
    }

    pub fn last_synced_at(&self) -> Option<DateTime<Utc>> {
        self.read().last_synced_at
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::task::ScenarioKind;

    fn task(id: &str, credits: f64) -> TaskInfo {
        TaskInfo {
            task_id: id.to_string(),
            task_name: format!("Task {id}"),
            scenario_kind: ScenarioKind::SpeechData,
            credits_earned: credits,
        }
    }

    #[test]
    fn test_replace_all_drops_local_flags() {
        let repo = TaskRepository::new();
        assert!(repo.last_synced_at().is_none());

        repo.replace_all(SyncSnapshot {
            tasks: vec![task("t1", 1.0), task("t2", 0.0)],
            accounts: vec![],
        });
        assert!(repo.mark_task_submitted("t1"));
        assert!(repo.is_submitted("t1"));

        repo.replace_all(SyncSnapshot {
            tasks: vec![task("t1", 2.0)],
            accounts: vec![],
        });
        assert!(!repo.is_submitted("t1"));
        assert_eq!(repo.tasks().len(), 1);
        assert_eq!(repo.task("t1").unwrap().credits_earned, 2.0);
        assert!(repo.last_synced_at().is_some());
    }

    #[test]
    fn test_unknown_task_is_not_marked() {
        let repo = TaskRepository::new();
        assert!(!repo.mark_task_submitted("ghost"));
        assert!(repo.submitted().is_empty());
    }
}
