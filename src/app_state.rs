use std::sync::Arc;
use std::time::Duration;

use crate::services::queue::JobQueue;
use crate::services::store::StatusStore;

/// Shared application state passed to all route handlers.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn StatusStore>,
    pub registrations: Arc<JobQueue>,
    /// How long a registration request waits for its job to finish.
    pub enqueue_wait: Duration,
    pub poll_interval: Duration,
}

impl AppState {
    pub fn new(
        store: Arc<dyn StatusStore>,
        registrations: JobQueue,
        enqueue_wait: Duration,
        poll_interval: Duration,
    ) -> Self {
        Self {
            store,
            registrations: Arc::new(registrations),
            enqueue_wait,
            poll_interval,
        }
    }
}
