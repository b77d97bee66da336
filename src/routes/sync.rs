use axum::extract::State;
use axum::Json;

use crate::app_state::AppState;
use crate::models::sync::SyncSnapshot;
use crate::routes::box_id::BoxId;
use crate::routes::error::ApiError;

/// GET /sync — latest tasks and account statuses for the calling box.
pub async fn pull(
    State(state): State<AppState>,
    BoxId(box_id): BoxId,
) -> Result<Json<SyncSnapshot>, ApiError> {
    let tasks = state.store.tasks_for_box(&box_id).await?;
    let accounts = state.store.accounts_for_box(&box_id).await?;

    tracing::debug!(
        box_id = %box_id,
        tasks = tasks.len(),
        accounts = accounts.len(),
        "Serving sync snapshot"
    );

    Ok(Json(SyncSnapshot { tasks, accounts }))
}
