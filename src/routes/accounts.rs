use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use garde::Validate;

use crate::app_state::AppState;
use crate::models::account::RegisterAccountRequest;
use crate::models::job::{JobAccepted, JobState};
use crate::routes::box_id::BoxId;
use crate::routes::error::{ApiError, INVALID_REQUEST};
use crate::services::accounts::{self, AccountLookup};
use crate::services::registration::RegistrationPayload;

/// POST /accounts — register a payments account for the calling box.
///
/// Enqueues a registration keyed by the account id and waits briefly for it
/// to finish. Retransmissions observe the same job instead of creating one.
pub async fn register_account(
    State(state): State<AppState>,
    BoxId(box_id): BoxId,
    Json(request): Json<RegisterAccountRequest>,
) -> Result<Response, ApiError> {
    request.validate().map_err(|e| {
        tracing::warn!(error = %e, "Invalid account request");
        ApiError::InvalidArgument(INVALID_REQUEST)
    })?;

    let account = request.into_new_account(box_id);
    let key = account.id.clone();
    let payload = serde_json::to_value(RegistrationPayload { account }).map_err(|e| {
        tracing::error!(error = %e, "Failed to encode registration payload");
        ApiError::Internal("Could not enqueue task. Something went wrong")
    })?;

    let job = state.registrations.enqueue(&key, payload).await?;
    let job = if job.state.is_terminal() {
        job
    } else {
        state
            .registrations
            .wait_for_terminal(&key, state.enqueue_wait, state.poll_interval)
            .await?
            .unwrap_or(job)
    };

    match job.state {
        JobState::Done => {
            let record = state
                .store
                .get_account(&key)
                .await?
                .ok_or(ApiError::Internal("Could not enqueue task. Something went wrong"))?;
            Ok(Json(record).into_response())
        }
        JobState::Failed => {
            // Surfaces the failure reason as a logged, generic error.
            state.registrations.outcome(&key).await?;
            Err(ApiError::Internal("Could not enqueue task. Something went wrong"))
        }
        JobState::Queued | JobState::Processing => {
            Ok((StatusCode::ACCEPTED, Json(JobAccepted::from(&job))).into_response())
        }
    }
}

/// GET /accounts/{id} — current account record, or its registration state.
pub async fn get_account(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Response, ApiError> {
    match accounts::lookup_account(state.store.as_ref(), &state.registrations, &id).await? {
        AccountLookup::Found(record) => Ok(Json(record).into_response()),
        AccountLookup::InFlight(job) => {
            Ok((StatusCode::ACCEPTED, Json(JobAccepted::from(&job))).into_response())
        }
        AccountLookup::Missing => Err(ApiError::NotFound),
    }
}

/// PUT /accounts/{id}/verify — mark the account VERIFIED.
/// Verifying an already VERIFIED account returns it unchanged.
pub async fn verify_account(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Response, ApiError> {
    let outcome = accounts::verify_account(state.store.as_ref(), &id).await?;
    Ok(Json(outcome.into_record()).into_response())
}
