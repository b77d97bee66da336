use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use crate::services::accounts::VerifyError;
use crate::services::queue::QueueError;
use crate::services::store::StoreError;

/// Body of every 400. The validation detail is only logged.
pub const INVALID_REQUEST: &str = "Invalid account request";

/// Errors returned to HTTP callers. Internal causes are logged here and
/// replaced with a fixed message.
#[derive(Debug)]
pub enum ApiError {
    InvalidArgument(&'static str),
    MissingBoxId,
    NotFound,
    Internal(&'static str),
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::InvalidArgument(message) => (StatusCode::BAD_REQUEST, message.to_string()),
            ApiError::MissingBoxId => (
                StatusCode::UNAUTHORIZED,
                "Missing box identity".to_string(),
            ),
            ApiError::NotFound => (StatusCode::NOT_FOUND, "Not found".to_string()),
            ApiError::Internal(message) => (StatusCode::INTERNAL_SERVER_ERROR, message.to_string()),
        };
        (status, Json(ErrorBody { error: message })).into_response()
    }
}

impl From<QueueError> for ApiError {
    fn from(e: QueueError) -> Self {
        match e {
            QueueError::InvalidArgument(message) => {
                tracing::warn!(error = %message, "Rejected queue argument");
                ApiError::InvalidArgument(INVALID_REQUEST)
            }
            other => {
                tracing::error!(error = %other, "Queue operation failed");
                ApiError::Internal("Could not process the request. Something went wrong.")
            }
        }
    }
}

impl From<StoreError> for ApiError {
    fn from(e: StoreError) -> Self {
        tracing::error!(error = %e, "Store operation failed");
        ApiError::Internal("Something went wrong.")
    }
}

impl From<VerifyError> for ApiError {
    fn from(e: VerifyError) -> Self {
        match e {
            VerifyError::NotFound(_) => ApiError::NotFound,
            VerifyError::Store(e) => {
                tracing::error!(error = %e, "Account verification failed");
                ApiError::Internal("Could not update the account status. Something went wrong.")
            }
        }
    }
}
