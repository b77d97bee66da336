use axum::extract::FromRequestParts;
use axum::http::request::Parts;

use crate::routes::error::ApiError;

/// Header carrying the calling box's identity, set by the session layer.
pub const BOX_ID_HEADER: &str = "x-box-id";

/// Identity of the box making the request.
#[derive(Debug, Clone)]
pub struct BoxId(pub String);

impl<S> FromRequestParts<S> for BoxId
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .headers
            .get(BOX_ID_HEADER)
            .and_then(|value| value.to_str().ok())
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map(|value| BoxId(value.to_string()))
            .ok_or(ApiError::MissingBoxId)
    }
}
