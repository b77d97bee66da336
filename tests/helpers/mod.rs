//! Test helper utilities for in-process server tests

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::Request;
use axum::response::Response;
use fieldbox_sync::{
    app_state::AppState,
    services::{
        queue::{JobQueue, QueueSettings},
        registration::{RegistrationHandler, REGISTRATION_QUEUE},
        store::{MemoryStatusStore, StatusStore},
        worker::{RunningPool, WorkerPool, WorkerSettings},
    },
};

/// Worker settings tuned for tests: short polls and backoff.
pub fn fast_settings(concurrency: usize) -> WorkerSettings {
    WorkerSettings {
        concurrency,
        max_attempts: 3,
        backoff_base: Duration::from_millis(5),
        backoff_max: Duration::from_millis(20),
        lease: Duration::from_secs(5),
        poll_interval: Duration::from_millis(5),
    }
}

/// Application state over a fresh memory store.
pub fn memory_state(enqueue_wait: Duration) -> (AppState, Arc<MemoryStatusStore>) {
    let store = Arc::new(MemoryStatusStore::new());
    let registrations = JobQueue::new(store.clone(), REGISTRATION_QUEUE, QueueSettings::default());
    let state = AppState::new(
        store.clone(),
        registrations,
        enqueue_wait,
        Duration::from_millis(5),
    );
    (state, store)
}

/// Start registration workers over `store`.
pub fn start_registration_workers(store: Arc<dyn StatusStore>, concurrency: usize) -> RunningPool {
    let handler = Arc::new(RegistrationHandler::new(store.clone()));
    WorkerPool::new(
        "test-worker",
        REGISTRATION_QUEUE,
        store,
        handler,
        fast_settings(concurrency),
    )
    .start()
}

pub fn json_request(method: &str, uri: &str, box_id: Option<&str>, body: Option<serde_json::Value>) -> Request<Body> {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(box_id) = box_id {
        builder = builder.header("x-box-id", box_id);
    }
    match body {
        Some(body) => builder
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    }
}

pub async fn body_json(response: Response) -> serde_json::Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}
