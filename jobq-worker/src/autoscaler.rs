//! Depth-driven scaling for one pool.
//!
//! A bang-bang controller with asymmetric steps: grow by two, shrink by one,
//! preferring availability over cost. No prediction, no proportional gain.

use std::sync::Arc;
use std::time::Duration;

use jobq_common::broker::Broker;
use jobq_common::health::HealthHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::pool::Pool;

const TICK_INTERVAL: Duration = Duration::from_secs(5);
const SCALE_UP_DEPTH: u64 = 20;
const SCALE_DOWN_DEPTH: u64 = 5;
const SCALE_UP_STEP: usize = 2;
const SCALE_DOWN_STEP: usize = 1;

pub struct Autoscaler {
    pool: Arc<Pool>,
    broker: Arc<dyn Broker>,
    /// Reported on every tick so a wedged controller fails the liveness probe.
    liveness: HealthHandle,
}

impl Autoscaler {
    pub fn new(pool: Arc<Pool>, broker: Arc<dyn Broker>, liveness: HealthHandle) -> Self {
        Self {
            pool,
            broker,
            liveness,
        }
    }

    /// Tick until cancelled.
    pub async fn run(self, token: CancellationToken) {
        let mut interval = tokio::time::interval(TICK_INTERVAL);
        info!("autoscaler started");

        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                _ = interval.tick() => {
                    self.liveness.report_healthy().await;
                    self.tick().await;
                }
            }
        }

        info!("autoscaler stopped");
    }

    async fn tick(&self) {
        let (num_workers, lane) = self.pool.stats();

        let depth = match self.broker.depth(&lane).await {
            Ok(depth) => depth,
            Err(error) => {
                error!(lane = %lane, "failed to read lane depth: {}", error);
                return;
            }
        };

        metrics::gauge!("queue_length", &[("lane", lane.clone())]).set(depth as f64);
        debug!(lane = %lane, depth, workers = num_workers, "checked lane depth");

        if depth > SCALE_UP_DEPTH {
            self.pool.scale_up(SCALE_UP_STEP);
        } else if depth < SCALE_DOWN_DEPTH {
            self.pool.scale_down(SCALE_DOWN_STEP);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use jobq_common::broker::MockBroker;
    use jobq_common::health::HealthRegistry;
    use jobq_common::jobstore::JobStore;
    use jobq_common::registry::ProcessorRegistry;
    use sqlx::PgPool;

    const LANE: &str = "queue:priority:2";

    async fn autoscaler_on(db: PgPool, broker: Arc<MockBroker>, min: usize) -> Autoscaler {
        let pool = Pool::new(
            LANE.to_owned(),
            min,
            10,
            Arc::new(JobStore::new_from_pool(db)),
            broker.clone(),
            Arc::new(ProcessorRegistry::new()),
            &CancellationToken::new(),
        );
        let liveness = HealthRegistry::new("liveness")
            .register("autoscaler".to_owned(), chrono::Duration::seconds(30))
            .await;
        Autoscaler::new(pool, broker, liveness)
    }

    #[sqlx::test(migrations = "../migrations")]
    async fn test_deep_lane_scales_up_by_two(db: PgPool) {
        let broker = Arc::new(MockBroker::new());
        // Entries are not job ids, but depth is all the controller reads.
        for i in 0..30 {
            broker
                .push(LANE, &format!("entry-{}", i))
                .await
                .expect("push failed");
        }

        // min = 0: no worker drains the lane underneath the depth read.
        let autoscaler = autoscaler_on(db, broker, 0).await;
        assert_eq!(autoscaler.pool.stats().0, 0);

        autoscaler.tick().await;
        assert_eq!(autoscaler.pool.stats().0, 2);

        autoscaler.pool.shutdown().await;
    }

    #[sqlx::test(migrations = "../migrations")]
    async fn test_shallow_lane_scales_down_to_the_floor(db: PgPool) {
        let broker = Arc::new(MockBroker::new());
        let autoscaler = autoscaler_on(db, broker, 2).await;
        autoscaler.pool.scale_up(2);
        assert_eq!(autoscaler.pool.stats().0, 4);

        autoscaler.tick().await;
        assert_eq!(autoscaler.pool.stats().0, 3);

        autoscaler.tick().await;
        assert_eq!(autoscaler.pool.stats().0, 2);

        // The floor holds.
        autoscaler.tick().await;
        assert_eq!(autoscaler.pool.stats().0, 2);

        autoscaler.pool.shutdown().await;
    }

    #[sqlx::test(migrations = "../migrations")]
    async fn test_mid_band_depth_changes_nothing(db: PgPool) {
        let broker = Arc::new(MockBroker::new());
        for i in 0..10 {
            broker
                .push(LANE, &format!("entry-{}", i))
                .await
                .expect("push failed");
        }

        // Depth 10 sits between both thresholds: neither step fires.
        let autoscaler = autoscaler_on(db, broker, 0).await;
        assert_eq!(autoscaler.pool.stats().0, 0);

        autoscaler.tick().await;
        assert_eq!(autoscaler.pool.stats().0, 0);

        autoscaler.pool.shutdown().await;
    }
}
