pub mod accounts;
pub mod box_id;
pub mod error;
pub mod health;
pub mod metrics;
pub mod sync;

use axum::routing::{get, post, put};
use axum::Router;

use crate::app_state::AppState;

/// API routes over the shared state. Middleware and `/metrics` are added by the binary.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health::health_check))
        .route("/accounts", post(accounts::register_account))
        .route("/accounts/{id}", get(accounts::get_account))
        .route("/accounts/{id}/verify", put(accounts::verify_account))
        .route("/sync", get(sync::pull))
        .with_state(state)
}
