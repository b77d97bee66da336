use async_trait::async_trait;
use garde::Validate;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::models::account::NewAccount;
use crate::models::job::Job;
use crate::services::store::StatusStore;
use crate::services::worker::{HandlerError, JobHandler};

/// Queue carrying account registrations, keyed by account id.
pub const REGISTRATION_QUEUE: &str = "registration";

/// Payload of a registration job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistrationPayload {
    pub account: NewAccount,
}

/// Creates the PENDING account row owned by the registering box.
///
/// Creation is create-if-absent, so a job re-run after a lost lease does not
/// produce a second row.
pub struct RegistrationHandler {
    store: Arc<dyn StatusStore>,
}

impl RegistrationHandler {
    pub fn new(store: Arc<dyn StatusStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl JobHandler for RegistrationHandler {
    async fn handle(&self, job: &Job) -> Result<(), HandlerError> {
        let payload: RegistrationPayload = serde_json::from_value(job.payload.clone())
            .map_err(|e| HandlerError::Permanent(format!("malformed payload: {e}")))?;
        payload
            .account
            .validate()
            .map_err(|e| HandlerError::Permanent(format!("invalid account: {e}")))?;
        if payload.account.id != job.key {
            return Err(HandlerError::Permanent(format!(
                "account id {} does not match job key {}",
                payload.account.id, job.key
            )));
        }

        let inserted = self.store.create_account(payload.account).await?;
        tracing::info!(
            account_id = %job.key,
            created = inserted.is_created(),
            "Registration applied"
        );
        Ok(())
    }
}
