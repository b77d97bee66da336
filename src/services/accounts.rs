//! Account status reads and the PENDING -> VERIFIED transition.

use crate::models::account::{AccountRecord, AccountStatus};
use crate::models::job::{Job, JobState};
use crate::services::queue::{JobQueue, QueueError};
use crate::services::store::{StatusStore, StoreError, Transition};

/// Result of a verify call. Both variants are successes.
#[derive(Debug, Clone, PartialEq)]
pub enum VerifyOutcome {
    Verified(AccountRecord),
    AlreadyVerified(AccountRecord),
}

impl VerifyOutcome {
    pub fn into_record(self) -> AccountRecord {
        match self {
            VerifyOutcome::Verified(r) | VerifyOutcome::AlreadyVerified(r) => r,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum VerifyError {
    #[error("account {0} not found")]
    NotFound(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Mark a PENDING account VERIFIED. Losing the race to another verify is a
/// no-op success that returns the winning record.
pub async fn verify_account(store: &dyn StatusStore, id: &str) -> Result<VerifyOutcome, VerifyError> {
    let transition = store
        .transition_account(id, AccountStatus::Pending, AccountStatus::Verified)
        .await?;

    let outcome = match transition {
        Transition::Applied(record) => VerifyOutcome::Verified(record),
        Transition::Conflict(Some(record)) if record.status == AccountStatus::Verified => {
            VerifyOutcome::AlreadyVerified(record)
        }
        Transition::Conflict(Some(record)) => {
            return Err(VerifyError::Store(StoreError::InvalidTransition {
                from: record.status.to_string(),
                to: AccountStatus::Verified.to_string(),
            }))
        }
        Transition::Conflict(None) => return Err(VerifyError::NotFound(id.to_string())),
    };

    let result = match outcome {
        VerifyOutcome::Verified(_) => "verified",
        VerifyOutcome::AlreadyVerified(_) => "already_verified",
    };
    metrics::counter!("accounts_verified_total", "result" => result).increment(1);
    tracing::info!(account_id = %id, result, "Account verify");
    Ok(outcome)
}

/// What is known about an account id.
#[derive(Debug, Clone, PartialEq)]
pub enum AccountLookup {
    Found(AccountRecord),
    /// Registration is queued or processing.
    InFlight(Job),
    Missing,
}

/// Read an account, falling back to its registration job.
/// A FAILED registration surfaces as the queue's error.
pub async fn lookup_account(
    store: &dyn StatusStore,
    registrations: &JobQueue,
    id: &str,
) -> Result<AccountLookup, QueueError> {
    if let Some(record) = store
        .get_account(id)
        .await
        .map_err(QueueError::QueueUnavailable)?
    {
        return Ok(AccountLookup::Found(record));
    }

    match registrations.outcome(id).await? {
        Some(job) if job.state != JobState::Done => Ok(AccountLookup::InFlight(job)),
        _ => Ok(AccountLookup::Missing),
    }
}
