//! Sweep the store for jobs orphaned by dead workers and re-queue them.

use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use config::Config;
use envconfig::Envconfig;
use eyre::Result;
use futures::future::{select, Either};
use reaper::Reaper;
use tokio::sync::Semaphore;

use jobq_common::broker::{Broker, RedisBroker};
use jobq_common::jobstore::JobStore;
use jobq_common::metrics::setup_metrics_routes;

mod config;
mod handlers;
mod reaper;

async fn listen(app: Router, bind: String) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(bind).await?;

    axum::serve(listener, app).await?;

    Ok(())
}

async fn reap_loop(reaper: Reaper, interval_secs: u64) {
    let semaphore = Semaphore::new(1);
    let mut interval = tokio::time::interval(Duration::from_secs(interval_secs));

    loop {
        let _permit = semaphore.acquire().await;
        interval.tick().await;
        if let Err(error) = reaper.reap().await {
            tracing::error!("reap sweep failed: {}", error);
        }
        drop(_permit);
    }
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt::init();

    let config = Config::init_from_env().expect("failed to load configuration from env");

    let store = Arc::new(
        JobStore::new(&config.database_url, config.max_pg_connections)
            .await
            .expect("failed to connect to the job store"),
    );
    let broker: Arc<dyn Broker> = Arc::new(
        RedisBroker::new(config.redis_url.clone()).expect("failed to create broker client"),
    );

    let reaper = Reaper::new(
        store,
        broker,
        chrono::Duration::seconds(config.stuck_after_secs as i64),
    );
    let reap_loop = Box::pin(reap_loop(reaper, config.reap_interval_secs));

    let app = setup_metrics_routes(handlers::app());
    let http_server = Box::pin(listen(app, config.bind()));

    match select(http_server, reap_loop).await {
        Either::Left((listen_result, _)) => match listen_result {
            Ok(_) => {}
            Err(e) => tracing::error!("failed to start jobq-janitor http server, {}", e),
        },
        Either::Right((_, _)) => {
            tracing::error!("jobq-janitor reap loop exited")
        }
    };
}
