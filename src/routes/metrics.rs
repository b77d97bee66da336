use axum::extract::State;
use axum::response::IntoResponse;
use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::Arc;

/// GET /metrics — queue and verification metrics in Prometheus text format.
pub async fn prometheus_metrics(State(handle): State<Arc<PrometheusHandle>>) -> impl IntoResponse {
    handle.render()
}

/// Register descriptions for every metric the server and workers emit.
pub fn describe() {
    metrics::describe_counter!(
        "jobs_enqueued_total",
        "Enqueue calls, labelled by whether they created a job or observed an existing one"
    );
    metrics::describe_counter!("jobs_completed_total", "Jobs that reached DONE");
    metrics::describe_counter!("jobs_retried_total", "Jobs re-queued after a transient failure");
    metrics::describe_counter!("jobs_failed_total", "Jobs that reached FAILED");
    metrics::describe_histogram!(
        "job_processing_seconds",
        "Time spent in a job handler per attempt"
    );
    metrics::describe_counter!(
        "accounts_verified_total",
        "Verify calls, labelled by whether they applied or found the account already verified"
    );
}
