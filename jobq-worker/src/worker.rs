use std::sync::Arc;
use std::time;

use jobq_common::broker::Broker;
use jobq_common::jobstore::{Job, JobStore};
use jobq_common::registry::ProcessorRegistry;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::failure;

/// How long one blocking pop may wait before the loop re-checks cancellation.
const POP_TIMEOUT: time::Duration = time::Duration::from_secs(5);
/// Pause after a broker error before the next pop.
const BROKER_ERROR_BACKOFF: time::Duration = time::Duration::from_secs(1);

/// A worker leasing jobs from one lane, one at a time.
///
/// The lease is not the popped lane entry: the broker has no acknowledgement
/// semantics, so the pop only nominates a candidate. Ownership of the attempt
/// is decided by `JobStore::claim`, which is why duplicate lane entries and
/// reaper races are safe.
pub struct Worker {
    /// Identifier within the pool, for logs.
    id: u32,
    /// The lane this worker leases jobs from.
    lane: String,
    store: Arc<JobStore>,
    broker: Arc<dyn Broker>,
    registry: Arc<ProcessorRegistry>,
    /// Cancelled on pool scale-down or process shutdown.
    token: CancellationToken,
}

impl Worker {
    pub fn new(
        id: u32,
        lane: String,
        store: Arc<JobStore>,
        broker: Arc<dyn Broker>,
        registry: Arc<ProcessorRegistry>,
        token: CancellationToken,
    ) -> Self {
        Self {
            id,
            lane,
            store,
            broker,
            registry,
            token,
        }
    }

    /// Run until cancelled, leasing and executing one job per iteration.
    pub async fn run(self) {
        info!(worker_id = self.id, lane = %self.lane, "worker started");

        loop {
            let popped = tokio::select! {
                _ = self.token.cancelled() => break,
                popped = self.broker.blocking_pop(&self.lane, POP_TIMEOUT) => popped,
            };

            match popped {
                Ok(Some(entry)) => self.process_one(&entry).await,
                // Pop timed out; loop to re-check cancellation.
                Ok(None) => continue,
                Err(error) => {
                    error!(worker_id = self.id, lane = %self.lane, "blocking pop failed: {}", error);
                    tokio::time::sleep(BROKER_ERROR_BACKOFF).await;
                }
            }
        }

        info!(worker_id = self.id, lane = %self.lane, "worker stopped");
    }

    /// Lease the popped job id and run the attempt.
    async fn process_one(&self, entry: &str) {
        let id = match Uuid::parse_str(entry) {
            Ok(id) => id,
            Err(_) => {
                warn!(lane = %self.lane, "discarding lane entry that is not a job id: {}", entry);
                return;
            }
        };

        let job = match self.store.claim(id).await {
            Ok(Some(job)) => job,
            Ok(None) => {
                // Row deleted, insert never committed, or another worker or
                // the reaper already owns this attempt.
                debug!(worker_id = self.id, job_id = %id, "lease not acquired");
                return;
            }
            Err(error) => {
                error!(worker_id = self.id, job_id = %id, "failed to claim job: {}", error);
                return;
            }
        };

        self.execute(job).await;
    }

    /// Run the processor for a claimed job and commit the outcome.
    async fn execute(&self, job: Job) {
        let labels = [
            ("lane", self.lane.clone()),
            ("type", job.job_type.clone()),
        ];

        let start = tokio::time::Instant::now();

        let result = match self.registry.get(&job.job_type) {
            Some(processor) => processor.process(&self.token, &job).await,
            None => Err(anyhow::anyhow!(
                "no processor registered for job type: {}",
                job.job_type
            )),
        };

        let elapsed = start.elapsed();
        metrics::histogram!("job_duration_seconds", &labels).record(elapsed.as_secs_f64());
        let elapsed_ms = elapsed.as_millis() as i64;

        match result {
            Ok(()) => match self.store.mark_completed(job.id, elapsed_ms).await {
                Ok(true) => {
                    metrics::counter!(
                        "jobs_processed_total",
                        &[
                            ("lane", self.lane.clone()),
                            ("status", "completed".to_owned()),
                        ]
                    )
                    .increment(1);
                    info!(worker_id = self.id, job_id = %job.id, "job completed");
                }
                Ok(false) => {
                    warn!(job_id = %job.id, "lease lost before completion could be recorded")
                }
                Err(error) => {
                    error!(job_id = %job.id, "failed to record completion: {}", error)
                }
            },
            Err(error) => {
                warn!(worker_id = self.id, job_id = %job.id, "job attempt failed: {}", error);
                metrics::counter!("job_failures_total", &labels).increment(1);
                failure::handle_failure(&self.store, &self.broker, &self.lane, job, elapsed_ms)
                    .await;
            }
        }
    }
}
