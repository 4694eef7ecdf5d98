//! A dynamically sized set of workers bound to one lane.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use jobq_common::broker::Broker;
use jobq_common::jobstore::JobStore;
use jobq_common::registry::ProcessorRegistry;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::info;

use crate::worker::Worker;

pub struct Pool {
    /// The lane every worker in this pool leases from.
    lane: String,
    min: usize,
    max: usize,
    store: Arc<JobStore>,
    broker: Arc<dyn Broker>,
    registry: Arc<ProcessorRegistry>,
    /// Parent of every worker's token; cancelled on shutdown.
    token: CancellationToken,
    /// Wait-group over worker tasks, drained by `shutdown`.
    tracker: TaskTracker,
    state: Mutex<PoolState>,
}

struct PoolState {
    /// Cancellation handle per live worker.
    workers: HashMap<u32, CancellationToken>,
    next_worker_id: u32,
}

impl Pool {
    /// Create a pool bound to `lane` and staff it with `min` workers.
    pub fn new(
        lane: String,
        min: usize,
        max: usize,
        store: Arc<JobStore>,
        broker: Arc<dyn Broker>,
        registry: Arc<ProcessorRegistry>,
        parent: &CancellationToken,
    ) -> Arc<Pool> {
        let pool = Arc::new(Pool {
            lane,
            min,
            max,
            store,
            broker,
            registry,
            token: parent.child_token(),
            tracker: TaskTracker::new(),
            state: Mutex::new(PoolState {
                workers: HashMap::new(),
                next_worker_id: 1,
            }),
        });
        pool.scale_up(min);
        pool
    }

    /// Add up to `n` workers, clamped at the max.
    pub fn scale_up(self: &Arc<Self>, n: usize) {
        let mut state = self.state.lock().expect("pool lock poisoned");

        for _ in 0..n {
            if state.workers.len() >= self.max {
                break;
            }

            let worker_id = state.next_worker_id;
            state.next_worker_id += 1;

            let token = self.token.child_token();
            state.workers.insert(worker_id, token.clone());

            let worker = Worker::new(
                worker_id,
                self.lane.clone(),
                self.store.clone(),
                self.broker.clone(),
                self.registry.clone(),
                token,
            );
            let pool = self.clone();
            self.tracker.spawn(async move {
                worker.run().await;
                pool.remove_worker(worker_id);
            });
        }

        let count = state.workers.len();
        drop(state);

        self.report_workers_active(count);
        info!(lane = %self.lane, total_workers = count, "scaled up");
    }

    /// Cancel up to `n` workers, clamped at the min. Which workers are
    /// selected is unspecified; they are interchangeable.
    pub fn scale_down(&self, n: usize) {
        let mut state = self.state.lock().expect("pool lock poisoned");

        let mut cancelled = 0;
        let ids: Vec<u32> = state.workers.keys().copied().collect();
        for id in ids {
            if cancelled >= n || state.workers.len() <= self.min {
                break;
            }
            if let Some(token) = state.workers.remove(&id) {
                // The worker exits at its next loop iteration, after any
                // in-flight attempt winds down.
                token.cancel();
                cancelled += 1;
            }
        }

        let count = state.workers.len();
        drop(state);

        self.report_workers_active(count);
        info!(lane = %self.lane, total_workers = count, "scaled down");
    }

    /// Cancel every worker and block until all of them have returned.
    pub async fn shutdown(&self) {
        info!(lane = %self.lane, "shutting down worker pool");
        self.token.cancel();
        self.tracker.close();
        self.tracker.wait().await;
        info!(lane = %self.lane, "worker pool shut down");
    }

    /// Current worker count and bound lane.
    pub fn stats(&self) -> (usize, String) {
        let state = self.state.lock().expect("pool lock poisoned");
        (state.workers.len(), self.lane.clone())
    }

    /// Exited workers unregister themselves; a worker cancelled by
    /// `scale_down` is usually gone from the map already.
    fn remove_worker(&self, worker_id: u32) {
        let mut state = self.state.lock().expect("pool lock poisoned");
        if state.workers.remove(&worker_id).is_some() {
            let count = state.workers.len();
            drop(state);
            self.report_workers_active(count);
        }
    }

    fn report_workers_active(&self, count: usize) {
        metrics::gauge!("workers_active", &[("lane", self.lane.clone())]).set(count as f64);
    }
}
