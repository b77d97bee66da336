//! Queue workers: acquire a job under a lease, run its handler, record the outcome.
//!
//! The lease taken by [`StatusStore::acquire_next_job`] is the only thing
//! that keeps two workers off the same job. Every outcome is written with a
//! conditional transition that requires the worker to still hold that lease,
//! so a worker whose lease expired cannot overwrite the new owner's result.

use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::sleep;

use crate::models::job::{FailureReason, Job, JobChange, JobState};
use crate::services::store::{StatusStore, StoreError, Transition};

/// The side-effecting operation behind a queue.
#[async_trait]
pub trait JobHandler: Send + Sync {
    async fn handle(&self, job: &Job) -> Result<(), HandlerError>;
}

#[derive(Debug, thiserror::Error)]
pub enum HandlerError {
    /// Retried with backoff until the attempt budget is spent.
    #[error("transient failure: {0}")]
    Transient(String),

    /// Fails the job immediately.
    #[error("permanent failure: {0}")]
    Permanent(String),
}

impl From<StoreError> for HandlerError {
    fn from(e: StoreError) -> Self {
        if e.is_transient() {
            HandlerError::Transient(e.to_string())
        } else {
            HandlerError::Permanent(e.to_string())
        }
    }
}

#[derive(Debug, Clone)]
pub struct WorkerSettings {
    pub concurrency: usize,
    /// Values below 1 are treated as 1.
    pub max_attempts: u32,
    pub backoff_base: Duration,
    pub backoff_max: Duration,
    pub lease: Duration,
    pub poll_interval: Duration,
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            concurrency: 4,
            max_attempts: 5,
            backoff_base: Duration::from_millis(500),
            backoff_max: Duration::from_secs(30),
            lease: Duration::from_secs(60),
            poll_interval: Duration::from_secs(1),
        }
    }
}

impl WorkerSettings {
    /// `max_attempts` in the unit of `Job::attempts`, never below 1.
    fn attempt_limit(&self) -> i32 {
        i32::try_from(self.max_attempts.max(1)).unwrap_or(i32::MAX)
    }

    /// Delay before attempt `attempt + 1`, given that `attempt` (1-based) just failed.
    pub fn backoff(&self, attempt: i32) -> Duration {
        let exponent = attempt.saturating_sub(1).clamp(0, 31) as u32;
        self.backoff_base
            .saturating_mul(2u32.saturating_pow(exponent))
            .min(self.backoff_max)
    }
}

/// What happened to an acquired job.
#[derive(Debug, Clone, PartialEq)]
pub enum JobOutcome {
    Completed(Job),
    Retried(Job),
    Failed(Job),
    /// The lease expired mid-processing and another worker now owns the job.
    LeaseLost { key: String },
}

/// One worker loop bound to one queue.
pub struct QueueWorker {
    id: String,
    queue: String,
    store: Arc<dyn StatusStore>,
    handler: Arc<dyn JobHandler>,
    settings: WorkerSettings,
}

impl QueueWorker {
    pub fn new(
        id: impl Into<String>,
        queue: impl Into<String>,
        store: Arc<dyn StatusStore>,
        handler: Arc<dyn JobHandler>,
        settings: WorkerSettings,
    ) -> Self {
        Self {
            id: id.into(),
            queue: queue.into(),
            store,
            handler,
            settings,
        }
    }

    /// Acquire and process at most one job.
    /// Returns Ok(None) if no job was acquirable.
    pub async fn run_once(&self) -> Result<Option<JobOutcome>, StoreError> {
        let job = match self
            .store
            .acquire_next_job(&self.queue, &self.id, self.settings.lease)
            .await?
        {
            Some(j) => j,
            None => return Ok(None),
        };

        tracing::info!(
            worker = %self.id,
            queue = %self.queue,
            key = %job.key,
            attempts = job.attempts,
            "Processing job"
        );

        // A job whose lease expired on its last allowed attempt is not run again.
        if job.attempts > self.settings.attempt_limit() {
            let change = JobChange::Fail {
                reason: FailureReason::MaxAttemptsExceeded,
                error: "lease expired on final attempt".to_string(),
            };
            return self.finish(&job, change).await.map(Some);
        }

        let start = Instant::now();
        let result = self.handler.handle(&job).await;
        metrics::histogram!("job_processing_seconds", "queue" => self.queue.clone())
            .record(start.elapsed().as_secs_f64());

        let change = match result {
            Ok(()) => JobChange::Complete,
            Err(HandlerError::Permanent(error)) => {
                tracing::warn!(worker = %self.id, key = %job.key, error = %error, "Job rejected");
                JobChange::Fail {
                    reason: FailureReason::Rejected,
                    error,
                }
            }
            Err(HandlerError::Transient(error)) if job.attempts >= self.settings.attempt_limit() => {
                tracing::warn!(
                    worker = %self.id,
                    key = %job.key,
                    attempts = job.attempts,
                    error = %error,
                    "Job failed after max attempts"
                );
                JobChange::Fail {
                    reason: FailureReason::MaxAttemptsExceeded,
                    error,
                }
            }
            Err(HandlerError::Transient(error)) => {
                let delay = self.settings.backoff(job.attempts);
                tracing::info!(
                    worker = %self.id,
                    key = %job.key,
                    attempts = job.attempts,
                    backoff_ms = delay.as_millis() as u64,
                    error = %error,
                    "Job re-queued for retry"
                );
                let delay = chrono::Duration::from_std(delay)
                    .unwrap_or_else(|_| chrono::Duration::hours(1));
                JobChange::Retry {
                    available_at: Utc::now() + delay,
                    error,
                }
            }
        };

        self.finish(&job, change).await.map(Some)
    }

    async fn finish(&self, job: &Job, change: JobChange) -> Result<JobOutcome, StoreError> {
        let transition = self
            .store
            .transition_job(&self.queue, &job.key, &self.id, change)
            .await?;

        let updated = match transition {
            Transition::Applied(updated) => updated,
            Transition::Conflict(_) => {
                tracing::warn!(worker = %self.id, key = %job.key, "Lease lost before the outcome was recorded");
                return Ok(JobOutcome::LeaseLost {
                    key: job.key.clone(),
                });
            }
        };

        let outcome = match updated.state {
            JobState::Done => {
                metrics::counter!("jobs_completed_total", "queue" => self.queue.clone()).increment(1);
                tracing::info!(worker = %self.id, key = %updated.key, "Job completed");
                JobOutcome::Completed(updated)
            }
            JobState::Queued => {
                metrics::counter!("jobs_retried_total", "queue" => self.queue.clone()).increment(1);
                JobOutcome::Retried(updated)
            }
            _ => {
                metrics::counter!("jobs_failed_total", "queue" => self.queue.clone()).increment(1);
                JobOutcome::Failed(updated)
            }
        };
        Ok(outcome)
    }

    /// Process jobs until `shutdown` flips to true.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        tracing::info!(worker = %self.id, queue = %self.queue, "Worker ready, starting job processing loop");

        while !*shutdown.borrow() {
            let idle = match self.run_once().await {
                Ok(Some(_)) => {
                    tracing::debug!(worker = %self.id, "Job processed, checking for next job");
                    false
                }
                Ok(None) => {
                    tracing::trace!(worker = %self.id, "No jobs available, sleeping");
                    true
                }
                Err(e) => {
                    tracing::error!(worker = %self.id, error = %e, "Error acquiring job, will retry");
                    true
                }
            };

            if idle {
                tokio::select! {
                    _ = sleep(self.settings.poll_interval) => {}
                    changed = shutdown.changed() => {
                        if changed.is_err() {
                            break;
                        }
                    }
                }
            }
        }

        tracing::info!(worker = %self.id, "Worker stopped");
    }
}

/// `concurrency` workers sharing one queue and handler.
pub struct WorkerPool {
    workers: Vec<QueueWorker>,
}

impl WorkerPool {
    pub fn new(
        name: &str,
        queue: &str,
        store: Arc<dyn StatusStore>,
        handler: Arc<dyn JobHandler>,
        settings: WorkerSettings,
    ) -> Self {
        let workers = (0..settings.concurrency.max(1))
            .map(|i| {
                QueueWorker::new(
                    format!("{name}-{i}"),
                    queue,
                    store.clone(),
                    handler.clone(),
                    settings.clone(),
                )
            })
            .collect();
        Self { workers }
    }

    pub fn len(&self) -> usize {
        self.workers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }

    /// Spawn every worker on the tokio runtime.
    pub fn start(self) -> RunningPool {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handles = self
            .workers
            .into_iter()
            .map(|worker| tokio::spawn(worker.run(shutdown_rx.clone())))
            .collect();
        RunningPool {
            shutdown: shutdown_tx,
            handles,
        }
    }
}

pub struct RunningPool {
    shutdown: watch::Sender<bool>,
    handles: Vec<JoinHandle<()>>,
}

impl RunningPool {
    /// Signal shutdown and wait for in-flight jobs to finish.
    pub async fn shutdown(self) {
        self.shutdown.send_replace(true);
        for handle in self.handles {
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "Worker task panicked");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::queue::{JobQueue, QueueSettings};
    use crate::services::store::MemoryStatusStore;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct AlwaysTransient {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl JobHandler for AlwaysTransient {
        async fn handle(&self, _job: &Job) -> Result<(), HandlerError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(HandlerError::Transient("storage timeout".to_string()))
        }
    }

    struct Rejecting;

    #[async_trait]
    impl JobHandler for Rejecting {
        async fn handle(&self, _job: &Job) -> Result<(), HandlerError> {
            Err(HandlerError::Permanent("bad payload".to_string()))
        }
    }

    fn fast_settings(max_attempts: u32) -> WorkerSettings {
        WorkerSettings {
            concurrency: 1,
            max_attempts,
            backoff_base: Duration::ZERO,
            backoff_max: Duration::ZERO,
            lease: Duration::from_secs(30),
            poll_interval: Duration::from_millis(5),
        }
    }

    #[test]
    fn test_backoff_is_exponential_and_bounded() {
        let settings = WorkerSettings {
            backoff_base: Duration::from_millis(100),
            backoff_max: Duration::from_millis(1000),
            ..WorkerSettings::default()
        };
        assert_eq!(settings.backoff(1), Duration::from_millis(100));
        assert_eq!(settings.backoff(2), Duration::from_millis(200));
        assert_eq!(settings.backoff(4), Duration::from_millis(800));
        assert_eq!(settings.backoff(5), Duration::from_millis(1000));
        assert_eq!(settings.backoff(100), Duration::from_millis(1000));
    }

    #[tokio::test]
    async fn test_transient_failures_stop_at_max_attempts() {
        let store = Arc::new(MemoryStatusStore::new());
        let queue = JobQueue::new(store.clone(), "q", QueueSettings::default());
        queue.enqueue("k", json!({})).await.unwrap();

        let handler = Arc::new(AlwaysTransient {
            calls: AtomicUsize::new(0),
        });
        let worker = QueueWorker::new("w", "q", store.clone(), handler.clone(), fast_settings(3));

        let mut outcomes = Vec::new();
        while let Some(outcome) = worker.run_once().await.unwrap() {
            outcomes.push(outcome);
        }

        assert_eq!(handler.calls.load(Ordering::SeqCst), 3);
        assert!(matches!(outcomes[0], JobOutcome::Retried(_)));
        assert!(matches!(outcomes[1], JobOutcome::Retried(_)));
        let JobOutcome::Failed(job) = &outcomes[2] else {
            panic!("expected failure, got {:?}", outcomes[2]);
        };
        assert_eq!(job.attempts, 3);
        assert_eq!(job.failure, Some(FailureReason::MaxAttemptsExceeded));

        let err = queue.outcome("k").await.unwrap_err();
        assert!(matches!(err, crate::services::queue::QueueError::MaxAttemptsExceeded { .. }));
    }

    #[tokio::test]
    async fn test_permanent_failure_is_not_retried() {
        let store = Arc::new(MemoryStatusStore::new());
        let queue = JobQueue::new(store.clone(), "q", QueueSettings::default());
        queue.enqueue("k", json!({})).await.unwrap();

        let worker = QueueWorker::new("w", "q", store.clone(), Arc::new(Rejecting), fast_settings(5));
        let outcome = worker.run_once().await.unwrap().unwrap();
        let JobOutcome::Failed(job) = outcome else {
            panic!("expected failure");
        };
        assert_eq!(job.attempts, 1);
        assert_eq!(job.failure, Some(FailureReason::Rejected));
        assert!(worker.run_once().await.unwrap().is_none());
    }

    #[test]
    fn test_only_unavailable_store_errors_are_retried() {
        let unavailable = HandlerError::from(StoreError::Unavailable("down".to_string()));
        assert!(matches!(unavailable, HandlerError::Transient(_)));

        let database = HandlerError::from(StoreError::Database(sqlx::Error::RowNotFound));
        assert!(matches!(database, HandlerError::Permanent(_)));

        let corrupt = HandlerError::from(StoreError::Corrupt("bad row".to_string()));
        assert!(matches!(corrupt, HandlerError::Permanent(_)));
    }

    #[tokio::test]
    async fn test_handler_database_error_fails_without_retry() {
        struct BrokenStore;
        #[async_trait]
        impl JobHandler for BrokenStore {
            async fn handle(&self, _job: &Job) -> Result<(), HandlerError> {
                Err(StoreError::Database(sqlx::Error::RowNotFound).into())
            }
        }

        let store = Arc::new(MemoryStatusStore::new());
        let queue = JobQueue::new(store.clone(), "q", QueueSettings::default());
        queue.enqueue("k", json!({})).await.unwrap();

        let worker = QueueWorker::new("w", "q", store.clone(), Arc::new(BrokenStore), fast_settings(5));
        let JobOutcome::Failed(job) = worker.run_once().await.unwrap().unwrap() else {
            panic!("expected failure");
        };
        assert_eq!(job.attempts, 1);
        assert_eq!(job.failure, Some(FailureReason::Rejected));
        assert!(worker.run_once().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_pool_shuts_down() {
        let store = Arc::new(MemoryStatusStore::new());
        let pool = WorkerPool::new(
            "test",
            "q",
            store,
            Arc::new(Rejecting),
            WorkerSettings {
                concurrency: 3,
                ..fast_settings(1)
            },
        );
        assert_eq!(pool.len(), 3);
        let running = pool.start();
        tokio::time::timeout(Duration::from_secs(2), running.shutdown())
            .await
            .expect("pool did not stop");
    }

    #[tokio::test]
    async fn test_completed_job_is_terminal() {
        struct Succeeding;
        #[async_trait]
        impl JobHandler for Succeeding {
            async fn handle(&self, _job: &Job) -> Result<(), HandlerError> {
                Ok(())
            }
        }

        let store = Arc::new(MemoryStatusStore::new());
        let queue = JobQueue::new(store.clone(), "q", QueueSettings::default());
        queue.enqueue("k", json!({})).await.unwrap();

        let worker = QueueWorker::new("w", "q", store.clone(), Arc::new(Succeeding), fast_settings(3));
        let outcome = worker.run_once().await.unwrap().unwrap();
        assert!(matches!(outcome, JobOutcome::Completed(ref j) if j.state == JobState::Done));

        // Re-enqueueing a finished key observes it rather than reviving it.
        let again = queue.enqueue("k", json!({})).await.unwrap();
        assert_eq!(again.state, JobState::Done);
        assert!(worker.run_once().await.unwrap().is_none());
    }
}
