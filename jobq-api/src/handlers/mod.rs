use std::sync::Arc;

use axum::{routing, Router};

use jobq_common::broker::Broker;
use jobq_common::jobstore::JobStore;

mod jobs;

/// Shared state for the job handlers: the two stores every submission
/// touches, in commit order.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<JobStore>,
    pub broker: Arc<dyn Broker>,
}

pub fn add_routes(router: Router, store: Arc<JobStore>, broker: Arc<dyn Broker>) -> Router {
    let state = AppState { store, broker };

    router
        .route("/", routing::get(index))
        .route(
            "/api/jobs",
            routing::post(jobs::post)
                .get(jobs::list)
                .with_state(state.clone()),
        )
        .route(
            "/api/jobs/:id",
            routing::get(jobs::get).with_state(state),
        )
}

pub async fn index() -> &'static str {
    "jobq api"
}
