//! Retry/DLQ policy applied after a failed attempt.

use std::sync::Arc;

use jobq_common::broker::Broker;
use jobq_common::jobstore::{Job, JobStatus, JobStore};
use jobq_common::router;
use tracing::{error, info, warn};

use crate::postmortem;

/// Record a failed attempt on the locally held job copy and route it either
/// back to its lane or into the DLQ.
pub async fn handle_failure(
    store: &Arc<JobStore>,
    broker: &Arc<dyn Broker>,
    lane: &str,
    mut job: Job,
    elapsed_ms: i64,
) {
    job.retry_count += 1;
    job.duration_ms = Some(elapsed_ms);

    if job.retry_count > job.max_retries {
        quarantine(store, broker, lane, job).await;
    } else {
        retry(store, broker, lane, job).await;
    }
}

async fn retry(store: &Arc<JobStore>, broker: &Arc<dyn Broker>, lane: &str, job: Job) {
    info!(
        job_id = %job.id,
        "retrying job ({}/{})", job.retry_count, job.max_retries
    );

    match store
        .mark_retryable(job.id, job.retry_count, job.duration_ms.unwrap_or(0))
        .await
    {
        Ok(true) => {}
        Ok(false) => {
            warn!(job_id = %job.id, "lease lost before retry could be recorded");
            return;
        }
        Err(error) => {
            error!(job_id = %job.id, "failed to record retry: {}", error);
            return;
        }
    }

    // Retries stay on the worker's own lane. If this push fails the row is
    // queued in the store but absent from the broker; the reaper closes that
    // gap once the row goes stale.
    if let Err(error) = broker.push(lane, &job.id.to_string()).await {
        error!(job_id = %job.id, lane = %lane, "failed to re-enqueue retry: {}", error);
    }
}

async fn quarantine(store: &Arc<JobStore>, broker: &Arc<dyn Broker>, lane: &str, mut job: Job) {
    warn!(
        job_id = %job.id,
        "job failed permanently after {} attempts; moving to DLQ", job.retry_count
    );

    match store
        .mark_failed(job.id, job.retry_count, job.duration_ms.unwrap_or(0))
        .await
    {
        Ok(true) => {}
        Ok(false) => {
            warn!(job_id = %job.id, "lease lost before quarantine could be recorded");
            return;
        }
        Err(error) => {
            error!(job_id = %job.id, "failed to record quarantine: {}", error);
            return;
        }
    }

    // DLQ entries carry the full snapshot so post-mortem tooling does not
    // need store access.
    job.status = JobStatus::Failed;
    match serde_json::to_string(&job) {
        Ok(snapshot) => {
            if let Err(error) = broker.push(router::LANE_DLQ, &snapshot).await {
                error!(job_id = %job.id, "failed to write DLQ entry: {}", error);
            }
        }
        Err(error) => error!(job_id = %job.id, "failed to serialize DLQ snapshot: {}", error),
    }

    metrics::counter!(
        "jobs_processed_total",
        &[("lane", lane.to_owned()), ("status", "failed".to_owned())]
    )
    .increment(1);

    postmortem::spawn(broker.clone(), job);
}
