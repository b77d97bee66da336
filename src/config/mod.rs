use serde::Deserialize;
use std::time::Duration;

use crate::services::queue::QueueSettings;
use crate::services::worker::WorkerSettings;

/// Server and worker configuration, read from the environment.
#[derive(Debug, Deserialize)]
pub struct AppConfig {
    /// Server bind address (e.g., "0.0.0.0:3000"). Optional for worker processes.
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    /// PostgreSQL connection string
    pub database_url: String,

    /// Number of concurrent workers in one worker process
    #[serde(default = "default_worker_concurrency")]
    pub worker_concurrency: usize,

    /// Processing attempts before a transiently failing job is marked FAILED. At least 1.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,

    #[serde(default = "default_backoff_max_ms")]
    pub backoff_max_ms: u64,

    /// How long a worker owns a job before another worker may reclaim it
    #[serde(default = "default_lease_seconds")]
    pub lease_seconds: u64,

    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Automatic retries of a caller's enqueue on a transient store error
    #[serde(default = "default_enqueue_retries")]
    pub enqueue_retries: u32,

    /// How long `POST /accounts` waits for the registration to finish
    #[serde(default = "default_enqueue_wait_ms")]
    pub enqueue_wait_ms: u64,
}

fn default_bind_addr() -> String {
    "0.0.0.0:3000".to_string()
}

fn default_worker_concurrency() -> usize {
    4
}

fn default_max_attempts() -> u32 {
    5
}

fn default_backoff_base_ms() -> u64 {
    500
}

fn default_backoff_max_ms() -> u64 {
    30_000
}

fn default_lease_seconds() -> u64 {
    60
}

fn default_poll_interval_ms() -> u64 {
    1000
}

fn default_enqueue_retries() -> u32 {
    1
}

fn default_enqueue_wait_ms() -> u64 {
    5000
}

impl AppConfig {
    pub fn from_env() -> Result<Self, envy::Error> {
        dotenvy::dotenv().ok();
        envy::from_env::<Self>()?.validated()
    }

    fn validated(self) -> Result<Self, envy::Error> {
        if self.max_attempts < 1 {
            return Err(envy::Error::Custom(
                "MAX_ATTEMPTS must be at least 1".to_string(),
            ));
        }
        Ok(self)
    }

    pub fn queue_settings(&self) -> QueueSettings {
        QueueSettings {
            enqueue_retries: self.enqueue_retries,
        }
    }

    pub fn worker_settings(&self) -> WorkerSettings {
        WorkerSettings {
            concurrency: self.worker_concurrency,
            max_attempts: self.max_attempts,
            backoff_base: Duration::from_millis(self.backoff_base_ms),
            backoff_max: Duration::from_millis(self.backoff_max_ms),
            lease: Duration::from_secs(self.lease_seconds),
            poll_interval: Duration::from_millis(self.poll_interval_ms),
        }
    }

    pub fn enqueue_wait(&self) -> Duration {
        Duration::from_millis(self.enqueue_wait_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

/// Field-box client configuration, read from `BOX_*` variables.
#[derive(Debug, Deserialize)]
pub struct ClientConfig {
    /// Base URL of the server (e.g., "http://localhost:3000")
    pub server_url: String,

    /// Identity of this box
    pub box_id: String,

    #[serde(default = "default_sync_timeout_secs")]
    pub sync_timeout_secs: u64,
}

fn default_sync_timeout_secs() -> u64 {
    30
}

impl ClientConfig {
    pub fn from_env() -> Result<Self, envy::Error> {
        dotenvy::dotenv().ok();
        envy::prefixed("BOX_").from_env()
    }

    pub fn sync_timeout(&self) -> Duration {
        Duration::from_secs(self.sync_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_apply() {
        let vars = vec![("DATABASE_URL".to_string(), "postgres://localhost/fieldbox".to_string())];
        let config: AppConfig = envy::from_iter(vars).unwrap();

        assert_eq!(config.bind_addr, "0.0.0.0:3000");
        assert_eq!(config.enqueue_retries, 1);
        let worker = config.worker_settings();
        assert_eq!(worker.max_attempts, 5);
        assert_eq!(worker.lease, Duration::from_secs(60));
    }

    #[test]
    fn test_zero_max_attempts_is_rejected() {
        let vars = vec![
            ("DATABASE_URL".to_string(), "postgres://localhost/fieldbox".to_string()),
            ("MAX_ATTEMPTS".to_string(), "0".to_string()),
        ];
        let result = envy::from_iter::<_, AppConfig>(vars).and_then(AppConfig::validated);
        assert!(result.is_err());

        let vars = vec![
            ("DATABASE_URL".to_string(), "postgres://localhost/fieldbox".to_string()),
            ("MAX_ATTEMPTS".to_string(), "-1".to_string()),
        ];
        assert!(envy::from_iter::<_, AppConfig>(vars).is_err());
    }

    #[test]
    fn test_database_url_is_required() {
        let vars: Vec<(String, String)> = Vec::new();
        assert!(envy::from_iter::<_, AppConfig>(vars).is_err());
    }

    #[test]
    fn test_client_config_is_prefixed() {
        let vars = vec![
            ("BOX_SERVER_URL".to_string(), "http://server".to_string()),
            ("BOX_BOX_ID".to_string(), "b1".to_string()),
        ];
        let config: ClientConfig = envy::prefixed("BOX_").from_iter(vars).unwrap();
        assert_eq!(config.box_id, "b1");
        assert_eq!(config.sync_timeout(), Duration::from_secs(30));
    }
}
