//! Accept job submissions and expose the read surface over HTTP.

use std::sync::Arc;

use axum::Router;
use config::Config;
use envconfig::Envconfig;
use eyre::Result;

use jobq_common::broker::{Broker, RedisBroker};
use jobq_common::jobstore::JobStore;
use jobq_common::metrics::setup_metrics_routes;

mod config;
mod handlers;

async fn listen(app: Router, bind: String) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(bind).await?;

    axum::serve(listener, app).await?;

    Ok(())
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt::init();

    let config = Config::init_from_env().expect("failed to load configuration from env");

    let store = Arc::new(
        JobStore::new(&config.database_url, config.max_pg_connections)
            .await
            .expect("failed to initialize job store"),
    );
    let broker: Arc<dyn Broker> = Arc::new(
        RedisBroker::new(config.redis_url.clone()).expect("failed to create broker client"),
    );

    let app = handlers::add_routes(Router::new(), store, broker);
    let app = setup_metrics_routes(app);

    match listen(app, config.bind()).await {
        Ok(_) => {}
        Err(e) => tracing::error!("failed to start jobq-api http server, {}", e),
    }
}
