use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// Lifecycle state of a queued job.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Display, EnumString)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "snake_case")]
pub enum JobState {
    Queued,
    Processing,
    Done,
    Failed,
}

impl JobState {
    /// DONE and FAILED jobs are immutable.
    pub fn is_terminal(self) -> bool {
        matches!(self, JobState::Done | JobState::Failed)
    }
}

/// Why a job ended up FAILED.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum FailureReason {
    /// The payload was rejected by the handler; never retried.
    Rejected,
    /// Transient failures exhausted the configured attempts.
    MaxAttemptsExceeded,
}

/// A unit of queued work, unique per `(queue, key)`.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Job {
    pub queue: String,
    pub key: String,
    pub payload: serde_json::Value,
    pub state: JobState,
    pub attempts: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<FailureReason>,
    #[serde(skip)]
    pub last_error: Option<String>,
    #[serde(skip)]
    pub lease_owner: Option<String>,
    #[serde(skip)]
    pub lease_expires_at: Option<DateTime<Utc>>,
    #[serde(skip)]
    pub available_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Input for creating a job.
#[derive(Debug, Clone)]
pub struct NewJob {
    pub queue: String,
    pub key: String,
    pub payload: serde_json::Value,
}

/// A conditional change applied to a PROCESSING job by its lease owner.
#[derive(Debug, Clone, PartialEq)]
pub enum JobChange {
    /// PROCESSING -> DONE
    Complete,
    /// PROCESSING -> QUEUED, acquirable again at `available_at`.
    Retry {
        available_at: DateTime<Utc>,
        error: String,
    },
    /// PROCESSING -> FAILED
    Fail { reason: FailureReason, error: String },
}

impl JobChange {
    pub fn target_state(&self) -> JobState {
        match self {
            JobChange::Complete => JobState::Done,
            JobChange::Retry { .. } => JobState::Queued,
            JobChange::Fail { .. } => JobState::Failed,
        }
    }
}

/// Response body when a job has been accepted but is not finished yet.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JobAccepted {
    pub key: String,
    pub state: JobState,
}

impl From<&Job> for JobAccepted {
    fn from(job: &Job) -> Self {
        Self {
            key: job.key.clone(),
            state: job.state,
        }
    }
}
