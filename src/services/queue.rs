use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, Instant};

use crate::models::job::{FailureReason, Job, JobState, NewJob};
use crate::services::store::{StatusStore, StoreError};

/// Longest key accepted by [`JobQueue::enqueue`].
pub const MAX_KEY_LEN: usize = 128;

/// Caller-facing queue settings.
#[derive(Debug, Clone)]
pub struct QueueSettings {
    /// Automatic retries of an enqueue that hit a transient store error.
    pub enqueue_retries: u32,
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self { enqueue_retries: 1 }
    }
}

/// Store-backed job queue, deduplicated by key.
///
/// Enqueue is idempotent: a second enqueue with the same key returns the
/// existing job's current snapshot instead of creating another one.
pub struct JobQueue {
    store: Arc<dyn StatusStore>,
    name: String,
    settings: QueueSettings,
}

impl JobQueue {
    pub fn new(store: Arc<dyn StatusStore>, name: impl Into<String>, settings: QueueSettings) -> Self {
        Self {
            store,
            name: name.into(),
            settings,
        }
    }

    /// Enqueue a job, or observe the one already stored for `key`.
    pub async fn enqueue(&self, key: &str, payload: serde_json::Value) -> Result<Job, QueueError> {
        validate_key(key)?;

        let mut retries_left = self.settings.enqueue_retries;
        loop {
            let new = NewJob {
                queue: self.name.clone(),
                key: key.to_string(),
                payload: payload.clone(),
            };
            match self.store.insert_job(new).await {
                Ok(inserted) => {
                    let result = if inserted.is_created() { "created" } else { "existing" };
                    metrics::counter!("jobs_enqueued_total", "queue" => self.name.clone(), "result" => result)
                        .increment(1);
                    let job = inserted.into_inner();
                    tracing::debug!(queue = %self.name, key = %key, state = %job.state, result, "Enqueue");
                    return Ok(job);
                }
                Err(e) if e.is_transient() && retries_left > 0 => {
                    retries_left -= 1;
                    tracing::warn!(queue = %self.name, key = %key, error = %e, "Enqueue hit a transient store error, retrying");
                }
                Err(e) => return Err(QueueError::QueueUnavailable(e)),
            }
        }
    }

    /// Current snapshot of the job for `key`, if any.
    pub async fn status(&self, key: &str) -> Result<Option<Job>, QueueError> {
        self.store
            .get_job(&self.name, key)
            .await
            .map_err(QueueError::QueueUnavailable)
    }

    /// Snapshot of the job for `key`, with a FAILED job surfaced as an error.
    pub async fn outcome(&self, key: &str) -> Result<Option<Job>, QueueError> {
        match self.status(key).await? {
            Some(job) if job.state == JobState::Failed => Err(failed_job_error(&job)),
            other => Ok(other),
        }
    }

    /// Poll until the job for `key` is terminal or `timeout` elapses.
    /// Returns the latest snapshot either way.
    pub async fn wait_for_terminal(
        &self,
        key: &str,
        timeout: Duration,
        poll_interval: Duration,
    ) -> Result<Option<Job>, QueueError> {
        let deadline = Instant::now() + timeout;
        loop {
            let job = self.status(key).await?;
            let finished = job.as_ref().map_or(true, |j| j.state.is_terminal());
            if finished || Instant::now() >= deadline {
                return Ok(job);
            }
            sleep(poll_interval.min(deadline.saturating_duration_since(Instant::now()))).await;
        }
    }
}

fn failed_job_error(job: &Job) -> QueueError {
    match job.failure {
        Some(FailureReason::MaxAttemptsExceeded) => QueueError::MaxAttemptsExceeded {
            key: job.key.clone(),
        },
        _ => QueueError::Rejected {
            key: job.key.clone(),
        },
    }
}

/// Reject keys that cannot be stable identities.
pub fn validate_key(key: &str) -> Result<(), QueueError> {
    if key.trim().is_empty() {
        return Err(QueueError::InvalidArgument("key must not be empty".to_string()));
    }
    if key.len() > MAX_KEY_LEN {
        return Err(QueueError::InvalidArgument(format!(
            "key must be at most {MAX_KEY_LEN} bytes"
        )));
    }
    if key.chars().any(|c| c.is_control() || c.is_whitespace()) {
        return Err(QueueError::InvalidArgument(
            "key must not contain whitespace or control characters".to_string(),
        ));
    }
    Ok(())
}

#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("queue unavailable: {0}")]
    QueueUnavailable(#[source] StoreError),

    #[error("job {key} exhausted its attempts")]
    MaxAttemptsExceeded { key: String },

    #[error("job {key} was rejected")]
    Rejected { key: String },
}

impl QueueError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, QueueError::QueueUnavailable(e) if e.is_transient())
    }
}
