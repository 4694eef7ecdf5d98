//! Recovery of jobs orphaned by dead workers.
//!
//! A worker that crashes mid-execution leaves its job in `running` forever;
//! nothing local notices. The reaper notices globally: any running row whose
//! heartbeat went stale is reset to `queued` and its id pushed back onto the
//! lane its type routes to, inside one transaction per row.

use std::sync::Arc;

use jobq_common::broker::Broker;
use jobq_common::jobstore::{JobStore, StoreError};
use jobq_common::router;
use tracing::{error, info, warn};

pub struct Reaper {
    store: Arc<JobStore>,
    broker: Arc<dyn Broker>,
    /// Threshold for declaring a running row orphaned. A policy knob, not a
    /// correctness parameter: it must exceed the longest legitimate job.
    stuck_after: chrono::Duration,
}

impl Reaper {
    pub fn new(store: Arc<JobStore>, broker: Arc<dyn Broker>, stuck_after: chrono::Duration) -> Self {
        Self {
            store,
            broker,
            stuck_after,
        }
    }

    /// One sweep. Returns the number of jobs recovered; rows that fail to
    /// recover are skipped and picked up again on the next sweep.
    pub async fn reap(&self) -> Result<usize, StoreError> {
        let stuck = self.store.stuck(self.stuck_after).await?;

        if stuck.is_empty() {
            info!("no stuck jobs found");
            return Ok(0);
        }

        warn!(count = stuck.len(), "found stuck jobs");

        let mut reaped = 0;
        for job in stuck {
            // One transaction per row, so a single failure does not hold
            // back the rest of the sweep.
            let mut tx = match self.store.begin().await {
                Ok(tx) => tx,
                Err(error) => {
                    error!(job_id = %job.id, "failed to open reap transaction: {}", error);
                    continue;
                }
            };

            match self.store.requeue_in_tx(&mut tx, job.id).await {
                Ok(true) => {}
                // The row moved on since the scan; leave it alone.
                Ok(false) => {
                    tx.rollback().await.ok();
                    continue;
                }
                Err(error) => {
                    error!(job_id = %job.id, "failed to requeue stuck job: {}", error);
                    tx.rollback().await.ok();
                    continue;
                }
            }

            let lane = router::route(&job.job_type);
            if let Err(error) = self.broker.push(lane, &job.id.to_string()).await {
                error!(job_id = %job.id, "failed to re-enqueue reaped job: {}", error);
                tx.rollback().await.ok();
                continue;
            }

            if let Err(error) = tx.commit().await {
                error!(job_id = %job.id, "failed to commit reap transaction: {}", error);
                continue;
            }

            metrics::counter!("jobs_reaped_total", &[("lane", lane.to_owned())]).increment(1);
            info!(job_id = %job.id, lane, "reaped and re-queued job");
            reaped += 1;
        }

        Ok(reaped)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use jobq_common::broker::MockBroker;
    use jobq_common::jobstore::{JobStatus, NewJob};
    use jobq_common::test_utils::seed_project;
    use serde_json::json;
    use sqlx::PgPool;
    use uuid::Uuid;

    async fn running_job(store: &JobStore, project_id: Uuid, job_type: &str) -> Uuid {
        let job = store
            .insert(NewJob::new(job_type, json!({}), project_id))
            .await
            .expect("failed to insert job");
        store
            .claim(job.id)
            .await
            .expect("claim errored")
            .expect("claim should win");
        job.id
    }

    async fn backdate(db: &PgPool, id: Uuid) {
        sqlx::query("UPDATE jobs SET updated_at = NOW() - INTERVAL '2 hours' WHERE id = $1")
            .bind(id)
            .execute(db)
            .await
            .expect("failed to backdate job");
    }

    #[sqlx::test(migrations = "../migrations")]
    async fn test_reaps_a_stale_running_row(db: PgPool) {
        let store = Arc::new(JobStore::new_from_pool(db.clone()));
        let mock = Arc::new(MockBroker::new());
        let broker: Arc<dyn Broker> = mock.clone();
        let project_id = seed_project(&db).await;

        let id = running_job(&store, project_id,"email").await;
        backdate(&db, id).await;

        let reaper = Reaper::new(store.clone(), broker, chrono::Duration::hours(1));
        let reaped = reaper.reap().await.expect("reap sweep errored");
        assert_eq!(reaped, 1);

        let fetched = store
            .fetch(id)
            .await
            .expect("failed to fetch job")
            .expect("job not found");
        assert_eq!(fetched.status, JobStatus::Queued);

        // The id re-enters the lane its type routes to.
        assert_eq!(mock.lane(router::LANE_PRIORITY_1), vec![id.to_string()]);
    }

    #[sqlx::test(migrations = "../migrations")]
    async fn test_fresh_running_rows_are_left_alone(db: PgPool) {
        let store = Arc::new(JobStore::new_from_pool(db.clone()));
        let mock = Arc::new(MockBroker::new());
        let broker: Arc<dyn Broker> = mock.clone();
        let project_id = seed_project(&db).await;

        let id = running_job(&store, project_id,"pdf").await;

        let reaper = Reaper::new(store.clone(), broker, chrono::Duration::hours(1));
        let reaped = reaper.reap().await.expect("reap sweep errored");
        assert_eq!(reaped, 0);

        let fetched = store
            .fetch(id)
            .await
            .expect("failed to fetch job")
            .expect("job not found");
        assert_eq!(fetched.status, JobStatus::Running);
        assert!(mock.lane(router::LANE_PRIORITY_2).is_empty());
    }

    #[sqlx::test(migrations = "../migrations")]
    async fn test_empty_sweep_reaps_nothing(db: PgPool) {
        let store = Arc::new(JobStore::new_from_pool(db));
        let broker: Arc<dyn Broker> = Arc::new(MockBroker::new());

        let reaper = Reaper::new(store, broker, chrono::Duration::hours(1));
        assert_eq!(reaper.reap().await.expect("reap sweep errored"), 0);
    }
}
