//! Consume lane entries to execute background jobs.

use std::future::ready;
use std::sync::Arc;

use axum::routing::get;
use axum::Router;
use envconfig::Envconfig;
use tokio_util::sync::CancellationToken;
use tracing::info;

use jobq_common::broker::{Broker, RedisBroker};
use jobq_common::health::HealthRegistry;
use jobq_common::jobstore::JobStore;
use jobq_common::metrics::{serve, setup_metrics_routes};
use jobq_common::registry::ProcessorRegistry;
use jobq_worker::autoscaler::Autoscaler;
use jobq_worker::config::Config;
use jobq_worker::error::WorkerError;
use jobq_worker::pool::Pool;
use jobq_worker::processors::{EmailSender, ReceiptGenerator, TextSummarizer};

#[tokio::main]
async fn main() -> Result<(), WorkerError> {
    tracing_subscriber::fmt::init();

    let config = Config::init_from_env().expect("invalid configuration:");

    let store = Arc::new(JobStore::new(&config.database_url, config.max_pg_connections).await?);
    let broker: Arc<dyn Broker> = Arc::new(RedisBroker::new(config.redis_url.clone())?);

    // Register processors before any pool exists; the registry is immutable
    // from here on.
    let mut registry = ProcessorRegistry::new();
    registry.register("email", Arc::new(EmailSender::default()));
    registry.register("pdf", Arc::new(ReceiptGenerator::default()));
    registry.register("ai_summary", Arc::new(TextSummarizer::default()));
    let registry = Arc::new(registry);

    let liveness = HealthRegistry::new("liveness");
    let token = CancellationToken::new();

    let mut pools = Vec::new();
    for lane in &config.lanes.0 {
        let pool = Pool::new(
            lane.clone(),
            config.min_workers,
            config.max_workers,
            store.clone(),
            broker.clone(),
            registry.clone(),
            &token,
        );

        let scaler_liveness = liveness
            .register(format!("autoscaler:{}", lane), chrono::Duration::seconds(60))
            .await;
        let scaler = Autoscaler::new(pool.clone(), broker.clone(), scaler_liveness);
        tokio::spawn(scaler.run(token.child_token()));

        pools.push(pool);
    }

    let liveness_routes = liveness.clone();
    let router = Router::new()
        .route("/", get(index))
        .route("/_readiness", get(index))
        .route(
            "/_liveness",
            get(move || ready(liveness_routes.get_status())),
        );
    let router = setup_metrics_routes(router);
    let bind = config.bind();
    tokio::task::spawn(async move {
        serve(router, &bind)
            .await
            .expect("failed to start serving metrics");
    });

    info!("worker pools started");
    shutdown_signal().await;
    info!("shutting down gracefully");

    token.cancel();
    for pool in pools {
        pool.shutdown().await;
    }

    info!("shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let mut terminate = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
        .expect("failed to install SIGTERM handler");

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {},
        _ = terminate.recv() => {},
    }
}

pub async fn index() -> &'static str {
    "jobq worker"
}
