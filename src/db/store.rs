//! Postgres-backed [`StatusStore`].
//!
//! Each operation is a single statement, so the conditional checks run
//! inside Postgres and hold across worker processes. Acquisition uses
//! `FOR UPDATE SKIP LOCKED` to hand each job to exactly one caller.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use std::time::Duration;

use crate::models::account::{AccountRecord, AccountStatus, NewAccount};
use crate::models::job::{FailureReason, Job, JobChange, NewJob};
use crate::models::task::{ScenarioKind, TaskInfo};
use crate::services::store::{
    check_account_transition, Inserted, StatusStore, StoreError, Transition,
};

const JOB_COLUMNS: &str = "queue, key, payload, state, attempts, failure, last_error, \
     lease_owner, lease_expires_at, available_at, created_at, updated_at";

const ACCOUNT_COLUMNS: &str =
    "id, box_id, status, name, account_type, meta, created_at, updated_at";

#[derive(Debug, Clone)]
pub struct PgStatusStore {
    pool: PgPool,
}

impl PgStatusStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl StatusStore for PgStatusStore {
    async fn insert_job(&self, job: NewJob) -> Result<Inserted<Job>, StoreError> {
        let inserted: Option<JobRow> = sqlx::query_as(&format!(
            "INSERT INTO jobs (queue, key, payload) VALUES ($1, $2, $3)
             ON CONFLICT (queue, key) DO NOTHING
             RETURNING {JOB_COLUMNS}"
        ))
        .bind(&job.queue)
        .bind(&job.key)
        .bind(&job.payload)
        .fetch_optional(&self.pool)
        .await?;

        match inserted {
            Some(row) => Ok(Inserted::Created(row.try_into_job()?)),
            None => {
                let existing = self.get_job(&job.queue, &job.key).await?.ok_or_else(|| {
                    StoreError::Corrupt(format!("job {} conflicted but is missing", job.key))
                })?;
                Ok(Inserted::Existing(existing))
            }
        }
    }

    async fn get_job(&self, queue: &str, key: &str) -> Result<Option<Job>, StoreError> {
        let row: Option<JobRow> = sqlx::query_as(&format!(
            "SELECT {JOB_COLUMNS} FROM jobs WHERE queue = $1 AND key = $2"
        ))
        .bind(queue)
        .bind(key)
        .fetch_optional(&self.pool)
        .await?;

        row.map(JobRow::try_into_job).transpose()
    }

    async fn acquire_next_job(
        &self,
        queue: &str,
        worker: &str,
        lease: Duration,
    ) -> Result<Option<Job>, StoreError> {
        let row: Option<JobRow> = sqlx::query_as(&format!(
            "UPDATE jobs
             SET state = 'processing',
                 attempts = attempts + 1,
                 lease_owner = $2,
                 lease_expires_at = NOW() + make_interval(secs => $3),
                 updated_at = NOW()
             WHERE (queue, key) = (
                 SELECT queue, key FROM jobs
                 WHERE queue = $1
                   AND ((state = 'queued' AND available_at <= NOW())
                        OR (state = 'processing' AND lease_expires_at < NOW()))
                 ORDER BY created_at ASC, key ASC
                 LIMIT 1
                 FOR UPDATE SKIP LOCKED
             )
             RETURNING {JOB_COLUMNS}"
        ))
        .bind(queue)
        .bind(worker)
        .bind(lease.as_secs_f64())
        .fetch_optional(&self.pool)
        .await?;

        row.map(JobRow::try_into_job).transpose()
    }

    async fn transition_job(
        &self,
        queue: &str,
        key: &str,
        lease_owner: &str,
        change: JobChange,
    ) -> Result<Transition<Job>, StoreError> {
        let target = change.target_state().to_string();
        let (available_at, failure, error): (Option<DateTime<Utc>>, Option<String>, Option<String>) =
            match change {
                JobChange::Complete => (None, None, None),
                JobChange::Retry {
                    available_at,
                    error,
                } => (Some(available_at), None, Some(error)),
                JobChange::Fail { reason, error } => (None, Some(reason.to_string()), Some(error)),
            };

        let row: Option<JobRow> = sqlx::query_as(&format!(
            "UPDATE jobs
             SET state = $4,
                 available_at = COALESCE($5, available_at),
                 failure = $6,
                 last_error = $7,
                 lease_owner = NULL,
                 lease_expires_at = NULL,
                 updated_at = NOW()
             WHERE queue = $1 AND key = $2 AND state = 'processing' AND lease_owner = $3
             RETURNING {JOB_COLUMNS}"
        ))
        .bind(queue)
        .bind(key)
        .bind(lease_owner)
        .bind(target)
        .bind(available_at)
        .bind(failure)
        .bind(error)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => Ok(Transition::Applied(row.try_into_job()?)),
            None => Ok(Transition::Conflict(self.get_job(queue, key).await?)),
        }
    }

    async fn create_account(
        &self,
        account: NewAccount,
    ) -> Result<Inserted<AccountRecord>, StoreError> {
        let inserted: Option<AccountRow> = sqlx::query_as(&format!(
            "INSERT INTO payments_account (id, box_id, status, name, account_type, meta)
             VALUES ($1, $2, 'PENDING', $3, $4, $5)
             ON CONFLICT (id) DO NOTHING
             RETURNING {ACCOUNT_COLUMNS}"
        ))
        .bind(&account.id)
        .bind(&account.box_id)
        .bind(&account.name)
        .bind(&account.account_type)
        .bind(&account.meta)
        .fetch_optional(&self.pool)
        .await?;

        match inserted {
            Some(row) => Ok(Inserted::Created(row.try_into_record()?)),
            None => {
                let existing = self.get_account(&account.id).await?.ok_or_else(|| {
                    StoreError::Corrupt(format!("account {} conflicted but is missing", account.id))
                })?;
                Ok(Inserted::Existing(existing))
            }
        }
    }

    async fn get_account(&self, id: &str) -> Result<Option<AccountRecord>, StoreError> {
        let row: Option<AccountRow> = sqlx::query_as(&format!(
            "SELECT {ACCOUNT_COLUMNS} FROM payments_account WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(AccountRow::try_into_record).transpose()
    }

    async fn transition_account(
        &self,
        id: &str,
        expected: AccountStatus,
        next: AccountStatus,
    ) -> Result<Transition<AccountRecord>, StoreError> {
        check_account_transition(expected, next)?;

        let row: Option<AccountRow> = sqlx::query_as(&format!(
            "UPDATE payments_account SET status = $3, updated_at = NOW()
             WHERE id = $1 AND status = $2
             RETURNING {ACCOUNT_COLUMNS}"
        ))
        .bind(id)
        .bind(expected.to_string())
        .bind(next.to_string())
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => Ok(Transition::Applied(row.try_into_record()?)),
            None => Ok(Transition::Conflict(self.get_account(id).await?)),
        }
    }

    async fn accounts_for_box(&self, box_id: &str) -> Result<Vec<AccountRecord>, StoreError> {
        let rows: Vec<AccountRow> = sqlx::query_as(&format!(
            "SELECT {ACCOUNT_COLUMNS} FROM payments_account WHERE box_id = $1 ORDER BY id"
        ))
        .bind(box_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(AccountRow::try_into_record).collect()
    }

    async fn tasks_for_box(&self, box_id: &str) -> Result<Vec<TaskInfo>, StoreError> {
        let rows: Vec<TaskRow> = sqlx::query_as(
            "SELECT task_id, task_name, scenario_kind, credits_earned
             FROM box_task WHERE box_id = $1 ORDER BY task_id",
        )
        .bind(box_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(TaskRow::into_task).collect())
    }

    async fn upsert_task(&self, box_id: &str, task: &TaskInfo) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO box_task (box_id, task_id, task_name, scenario_kind, credits_earned)
             VALUES ($1, $2, $3, $4, $5)
             ON CONFLICT (box_id, task_id) DO UPDATE
             SET task_name = EXCLUDED.task_name,
                 scenario_kind = EXCLUDED.scenario_kind,
                 credits_earned = EXCLUDED.credits_earned,
                 updated_at = NOW()",
        )
        .bind(box_id)
        .bind(&task.task_id)
        .bind(&task.task_name)
        .bind(task.scenario_kind.as_str())
        .bind(task.credits_earned)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn health_check(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

/// Internal row type for sqlx::FromRow.
#[derive(sqlx::FromRow)]
struct JobRow {
    queue: String,
    key: String,
    payload: serde_json::Value,
    state: String,
    attempts: i32,
    failure: Option<String>,
    last_error: Option<String>,
    lease_owner: Option<String>,
    lease_expires_at: Option<DateTime<Utc>>,
    available_at: DateTime<Utc>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl JobRow {
    fn try_into_job(self) -> Result<Job, StoreError> {
        let state = self
            .state
            .parse()
            .map_err(|_| StoreError::Corrupt(format!("job state {:?}", self.state)))?;
        let failure = self
            .failure
            .as_deref()
            .map(str::parse::<FailureReason>)
            .transpose()
            .map_err(|_| StoreError::Corrupt(format!("job failure {:?}", self.failure)))?;

        Ok(Job {
            queue: self.queue,
            key: self.key,
            payload: self.payload,
            state,
            attempts: self.attempts,
            failure,
            last_error: self.last_error,
            lease_owner: self.lease_owner,
            lease_expires_at: self.lease_expires_at,
            available_at: self.available_at,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct AccountRow {
    id: String,
    box_id: String,
    status: String,
    name: Option<String>,
    account_type: Option<String>,
    meta: Option<serde_json::Value>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl AccountRow {
    fn try_into_record(self) -> Result<AccountRecord, StoreError> {
        let status = self
            .status
            .parse()
            .map_err(|_| StoreError::Corrupt(format!("account status {:?}", self.status)))?;

        Ok(AccountRecord {
            id: self.id,
            box_id: self.box_id,
            status,
            name: self.name,
            account_type: self.account_type,
            meta: self.meta,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct TaskRow {
    task_id: String,
    task_name: String,
    scenario_kind: String,
    credits_earned: f64,
}

impl TaskRow {
    fn into_task(self) -> TaskInfo {
        TaskInfo {
            task_id: self.task_id,
            task_name: self.task_name,
            scenario_kind: ScenarioKind::from(self.scenario_kind),
            credits_earned: self.credits_earned,
        }
    }
}
