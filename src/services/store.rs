//! The status store: single source of truth for jobs, accounts and tasks.
//!
//! Every mutation of shared state goes through a conditional primitive
//! (create-if-absent or compare-and-transition), so workers in separate
//! processes coordinate without any in-process lock.

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use crate::models::account::{AccountRecord, AccountStatus, NewAccount};
use crate::models::job::{Job, JobChange, JobState, NewJob};
use crate::models::task::TaskInfo;

/// Result of a create-if-absent operation.
#[derive(Debug, Clone, PartialEq)]
pub enum Inserted<T> {
    Created(T),
    Existing(T),
}

impl<T> Inserted<T> {
    pub fn is_created(&self) -> bool {
        matches!(self, Inserted::Created(_))
    }

    pub fn into_inner(self) -> T {
        match self {
            Inserted::Created(v) | Inserted::Existing(v) => v,
        }
    }
}

/// Result of a compare-and-transition.
#[derive(Debug, Clone, PartialEq)]
pub enum Transition<T> {
    /// The expected state matched and the new state was written.
    Applied(T),
    /// The expected state did not match; carries the current record, if any.
    Conflict(Option<T>),
}

#[async_trait]
pub trait StatusStore: Send + Sync {
    /// Create a QUEUED job unless one already exists for `(queue, key)`.
    async fn insert_job(&self, job: NewJob) -> Result<Inserted<Job>, StoreError>;

    async fn get_job(&self, queue: &str, key: &str) -> Result<Option<Job>, StoreError>;

    /// Atomically pick the oldest acquirable job and mark it PROCESSING under
    /// a lease owned by `worker`. Acquirable means QUEUED and past its
    /// `available_at`, or PROCESSING with an expired lease.
    async fn acquire_next_job(
        &self,
        queue: &str,
        worker: &str,
        lease: Duration,
    ) -> Result<Option<Job>, StoreError>;

    /// Apply `change` only if the job is PROCESSING and leased by `lease_owner`.
    async fn transition_job(
        &self,
        queue: &str,
        key: &str,
        lease_owner: &str,
        change: JobChange,
    ) -> Result<Transition<Job>, StoreError>;

    /// Create a PENDING account unless one already exists with this id.
    async fn create_account(&self, account: NewAccount)
        -> Result<Inserted<AccountRecord>, StoreError>;

    async fn get_account(&self, id: &str) -> Result<Option<AccountRecord>, StoreError>;

    async fn transition_account(
        &self,
        id: &str,
        expected: AccountStatus,
        next: AccountStatus,
    ) -> Result<Transition<AccountRecord>, StoreError>;

    async fn accounts_for_box(&self, box_id: &str) -> Result<Vec<AccountRecord>, StoreError>;

    async fn tasks_for_box(&self, box_id: &str) -> Result<Vec<TaskInfo>, StoreError>;

    async fn upsert_task(&self, box_id: &str, task: &TaskInfo) -> Result<(), StoreError>;

    async fn health_check(&self) -> Result<(), StoreError>;
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("invalid transition: {from} -> {to}")]
    InvalidTransition { from: String, to: String },

    #[error("corrupt record: {0}")]
    Corrupt(String),

    #[error("database error: {0}")]
    Database(sqlx::Error),
}

impl StoreError {
    /// Whether retrying the same operation later can succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Unavailable(_))
    }
}

impl From<sqlx::Error> for StoreError {
    fn from(e: sqlx::Error) -> Self {
        match e {
            sqlx::Error::PoolTimedOut
            | sqlx::Error::PoolClosed
            | sqlx::Error::Io(_)
            | sqlx::Error::Tls(_)
            | sqlx::Error::WorkerCrashed => StoreError::Unavailable(e.to_string()),
            other => StoreError::Database(other),
        }
    }
}

pub(crate) fn check_account_transition(
    expected: AccountStatus,
    next: AccountStatus,
) -> Result<(), StoreError> {
    if expected.can_transition_to(next) {
        Ok(())
    } else {
        Err(StoreError::InvalidTransition {
            from: expected.to_string(),
            to: next.to_string(),
        })
    }
}

// ---------------------------------------------------------------------------
// In-memory store
// ---------------------------------------------------------------------------

#[derive(Default)]
struct Inner {
    jobs: HashMap<(String, String), Job>,
    accounts: HashMap<String, AccountRecord>,
    tasks: BTreeMap<(String, String), TaskInfo>,
    last_created_at: Option<DateTime<Utc>>,
    unavailable_for: usize,
}

impl Inner {
    fn check_available(&mut self) -> Result<(), StoreError> {
        if self.unavailable_for > 0 {
            self.unavailable_for -= 1;
            return Err(StoreError::Unavailable("injected outage".to_string()));
        }
        Ok(())
    }

    /// Creation timestamps are strictly increasing so FIFO order matches submission order.
    fn next_created_at(&mut self) -> DateTime<Utc> {
        let mut now = Utc::now();
        if let Some(last) = self.last_created_at {
            if now <= last {
                now = last + ChronoDuration::microseconds(1);
            }
        }
        self.last_created_at = Some(now);
        now
    }
}

/// A store held in process memory. Each call is atomic under one mutex,
/// which makes it linearizable per key like the Postgres store.
#[derive(Default)]
pub struct MemoryStatusStore {
    inner: Mutex<Inner>,
}

impl MemoryStatusStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `count` operations fail with [`StoreError::Unavailable`].
    pub fn inject_outage(&self, count: usize) {
        self.lock().unavailable_for = count;
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl StatusStore for MemoryStatusStore {
    async fn insert_job(&self, job: NewJob) -> Result<Inserted<Job>, StoreError> {
        let mut inner = self.lock();
        inner.check_available()?;

        let id = (job.queue.clone(), job.key.clone());
        if let Some(existing) = inner.jobs.get(&id) {
            return Ok(Inserted::Existing(existing.clone()));
        }

        let created_at = inner.next_created_at();
        let stored = Job {
            queue: job.queue,
            key: job.key,
            payload: job.payload,
            state: JobState::Queued,
            attempts: 0,
            failure: None,
            last_error: None,
            lease_owner: None,
            lease_expires_at: None,
            available_at: created_at,
            created_at,
            updated_at: created_at,
        };
        inner.jobs.insert(id, stored.clone());
        Ok(Inserted::Created(stored))
    }

    async fn get_job(&self, queue: &str, key: &str) -> Result<Option<Job>, StoreError> {
        let mut inner = self.lock();
        inner.check_available()?;
        Ok(inner
            .jobs
            .get(&(queue.to_string(), key.to_string()))
            .cloned())
    }

    async fn acquire_next_job(
        &self,
        queue: &str,
        worker: &str,
        lease: Duration,
    ) -> Result<Option<Job>, StoreError> {
        let mut inner = self.lock();
        inner.check_available()?;
        let now = Utc::now();

        let next = inner
            .jobs
            .values()
            .filter(|job| job.queue == queue)
            .filter(|job| match job.state {
                JobState::Queued => job.available_at <= now,
                JobState::Processing => job.lease_expires_at.is_some_and(|at| at < now),
                _ => false,
            })
            .min_by(|a, b| {
                a.created_at
                    .cmp(&b.created_at)
                    .then_with(|| a.key.cmp(&b.key))
            })
            .map(|job| (job.queue.clone(), job.key.clone()));

        let Some(id) = next else {
            return Ok(None);
        };

        let lease = ChronoDuration::from_std(lease)
            .map_err(|e| StoreError::Corrupt(format!("lease out of range: {e}")))?;
        let job = inner
            .jobs
            .get_mut(&id)
            .ok_or_else(|| StoreError::Corrupt(format!("job {} vanished", id.1)))?;
        job.state = JobState::Processing;
        job.attempts += 1;
        job.lease_owner = Some(worker.to_string());
        job.lease_expires_at = Some(now + lease);
        job.updated_at = now;
        Ok(Some(job.clone()))
    }

    async fn transition_job(
        &self,
        queue: &str,
        key: &str,
        lease_owner: &str,
        change: JobChange,
    ) -> Result<Transition<Job>, StoreError> {
        let mut inner = self.lock();
        inner.check_available()?;

        let Some(job) = inner.jobs.get_mut(&(queue.to_string(), key.to_string())) else {
            return Ok(Transition::Conflict(None));
        };
        if job.state != JobState::Processing || job.lease_owner.as_deref() != Some(lease_owner) {
            return Ok(Transition::Conflict(Some(job.clone())));
        }

        let now = Utc::now();
        job.state = change.target_state();
        job.lease_owner = None;
        job.lease_expires_at = None;
        job.updated_at = now;
        match change {
            JobChange::Complete => {
                job.last_error = None;
            }
            JobChange::Retry {
                available_at,
                error,
            } => {
                job.available_at = available_at;
                job.last_error = Some(error);
            }
            JobChange::Fail { reason, error } => {
                job.failure = Some(reason);
                job.last_error = Some(error);
            }
        }
        Ok(Transition::Applied(job.clone()))
    }

    async fn create_account(
        &self,
        account: NewAccount,
    ) -> Result<Inserted<AccountRecord>, StoreError> {
        let mut inner = self.lock();
        inner.check_available()?;

        if let Some(existing) = inner.accounts.get(&account.id) {
            return Ok(Inserted::Existing(existing.clone()));
        }
        let now = Utc::now();
        let record = AccountRecord {
            id: account.id,
            box_id: account.box_id,
            status: AccountStatus::Pending,
            name: account.name,
            account_type: account.account_type,
            meta: account.meta,
            created_at: now,
            updated_at: now,
        };
        inner.accounts.insert(record.id.clone(), record.clone());
        Ok(Inserted::Created(record))
    }

    async fn get_account(&self, id: &str) -> Result<Option<AccountRecord>, StoreError> {
        let mut inner = self.lock();
        inner.check_available()?;
        Ok(inner.accounts.get(id).cloned())
    }

    async fn transition_account(
        &self,
        id: &str,
        expected: AccountStatus,
        next: AccountStatus,
    ) -> Result<Transition<AccountRecord>, StoreError> {
        check_account_transition(expected, next)?;
        let mut inner = self.lock();
        inner.check_available()?;

        let Some(record) = inner.accounts.get_mut(id) else {
            return Ok(Transition::Conflict(None));
        };
        if record.status != expected {
            return Ok(Transition::Conflict(Some(record.clone())));
        }
        record.status = next;
        record.updated_at = Utc::now();
        Ok(Transition::Applied(record.clone()))
    }

    async fn accounts_for_box(&self, box_id: &str) -> Result<Vec<AccountRecord>, StoreError> {
        let mut inner = self.lock();
        inner.check_available()?;
        let mut accounts: Vec<AccountRecord> = inner
            .accounts
            .values()
            .filter(|a| a.box_id == box_id)
            .cloned()
            .collect();
        accounts.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(accounts)
    }

    async fn tasks_for_box(&self, box_id: &str) -> Result<Vec<TaskInfo>, StoreError> {
        let mut inner = self.lock();
        inner.check_available()?;
        Ok(inner
            .tasks
            .iter()
            .filter(|((owner, _), _)| owner == box_id)
            .map(|(_, task)| task.clone())
            .collect())
    }

    async fn upsert_task(&self, box_id: &str, task: &TaskInfo) -> Result<(), StoreError> {
        let mut inner = self.lock();
        inner.check_available()?;
        inner
            .tasks
            .insert((box_id.to_string(), task.task_id.clone()), task.clone());
        Ok(())
    }

    async fn health_check(&self) -> Result<(), StoreError> {
        self.lock().check_available()
    }
}
