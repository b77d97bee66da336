//! HTTP client for the sync server.

use std::time::Duration;

use crate::models::account::{AccountRecord, RegisterAccountRequest};
use crate::models::job::JobAccepted;
use crate::models::sync::SyncSnapshot;
use crate::routes::box_id::BOX_ID_HEADER;

/// Error type for sync server calls.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("HTTP request to sync server failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Sync server returned HTTP {status}: {body}")]
    Status { status: u16, body: String },
}

/// Result of a registration request.
#[derive(Debug, Clone, PartialEq)]
pub enum Registration {
    Registered(AccountRecord),
    Pending(JobAccepted),
}

/// Client for one box talking to the sync server.
#[derive(Clone)]
pub struct ServerApi {
    http: reqwest::Client,
    base_url: String,
    box_id: String,
}

impl ServerApi {
    pub fn new(base_url: &str, box_id: &str, timeout: Duration) -> Result<Self, ClientError> {
        let http = reqwest::Client::builder()
            .user_agent(concat!("fieldbox-sync/", env!("CARGO_PKG_VERSION")))
            .timeout(timeout)
            .build()?;

        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            box_id: box_id.to_string(),
        })
    }

    pub fn box_id(&self) -> &str {
        &self.box_id
    }

    /// Pull the full snapshot for this box.
    pub async fn pull(&self) -> Result<SyncSnapshot, ClientError> {
        let url = format!("{}/sync", self.base_url);
        let response = self
            .http
            .get(&url)
            .header(BOX_ID_HEADER, &self.box_id)
            .send()
            .await?;

        Ok(check(response).await?.json().await?)
    }

    /// Register an account. The server answers 202 while the job is in flight.
    pub async fn register_account(
        &self,
        request: &RegisterAccountRequest,
    ) -> Result<Registration, ClientError> {
        let url = format!("{}/accounts", self.base_url);
        let response = self
            .http
            .post(&url)
            .header(BOX_ID_HEADER, &self.box_id)
            .json(request)
            .send()
            .await?;

        let response = check(response).await?;
        if response.status() == reqwest::StatusCode::ACCEPTED {
            Ok(Registration::Pending(response.json().await?))
        } else {
            Ok(Registration::Registered(response.json().await?))
        }
    }
}

async fn check(response: reqwest::Response) -> Result<reqwest::Response, ClientError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(ClientError::Status {
        status: status.as_u16(),
        body,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_url_trailing_slash_is_dropped() {
        let api = ServerApi::new("http://localhost:3000/", "box-1", Duration::from_secs(1)).unwrap();
        assert_eq!(api.base_url, "http://localhost:3000");
        assert_eq!(api.box_id(), "box-1");
    }
}
