//! Post-mortem notes for quarantined jobs.
//!
//! The summary is written off the worker's critical path: a slow broker must
//! never back-pressure job execution, and a lost summary only costs a nicer
//! DLQ triage note.

use std::sync::Arc;

use jobq_common::broker::Broker;
use jobq_common::jobstore::Job;
use jobq_common::router;
use tracing::{error, info};

/// Build the human-readable failure note stored next to a DLQ entry.
/// Stands in for a real model call; the inputs are the prompt it would get.
pub fn summarize_failure(job: &Job) -> String {
    format!(
        "Job {} of type '{}' failed permanently after {} attempts. Last payload: {}",
        job.id, job.job_type, job.retry_count, job.payload.0,
    )
}

/// Store the summary under `dlq_summary:{id}`. Failures are logged, never
/// propagated.
pub async fn write_summary(broker: Arc<dyn Broker>, job: &Job) {
    let summary = summarize_failure(job);
    let key = router::summary_key(job.id);

    match broker.put(&key, &summary).await {
        Ok(()) => info!(job_id = %job.id, "stored post-mortem summary"),
        Err(error) => error!(job_id = %job.id, "failed to store post-mortem summary: {}", error),
    }
}

/// Fire-and-forget variant used by the failure handler.
pub fn spawn(broker: Arc<dyn Broker>, job: Job) {
    tokio::spawn(async move {
        write_summary(broker, &job).await;
    });
}
