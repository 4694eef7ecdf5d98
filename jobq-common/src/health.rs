//! Liveness reporting for the long-running loops of the service.
//!
//! Workers, autoscalers and the reaper are all periodic loops; the process
//! can only be trusted with jobs while every loop keeps ticking. Each loop
//! registers against a `HealthRegistry` and must report healthy more often
//! than its deadline, otherwise the aggregate status turns unhealthy and the
//! liveness probe fails.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use chrono::{DateTime, Duration, Utc};
use tokio::sync::mpsc;
use tracing::warn;

#[derive(Default, Debug)]
pub struct HealthStatus {
    /// The overall status: true if all components are healthy
    pub healthy: bool,
    /// Current status of each registered component, for display
    pub components: HashMap<String, ComponentStatus>,
}

impl IntoResponse for HealthStatus {
    /// Computes the axum status code based on the overall health status,
    /// and prints each component status in the body for debugging.
    fn into_response(self) -> Response {
        let body = format!("{:?}", self);
        match self.healthy {
            true => (StatusCode::OK, body),
            false => (StatusCode::INTERNAL_SERVER_ERROR, body),
        }
        .into_response()
    }
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub enum ComponentStatus {
    /// Automatically set when a component is newly registered
    Starting,
    /// Recently reported healthy, will need to report again before the date
    HealthyUntil(DateTime<Utc>),
    /// Reported unhealthy
    Unhealthy,
    /// Automatically set when the HealthyUntil deadline is reached
    Stalled,
}

struct HealthMessage {
    component: String,
    status: ComponentStatus,
}

pub struct HealthHandle {
    component: String,
    deadline: Duration,
    sender: mpsc::Sender<HealthMessage>,
}

impl HealthHandle {
    /// Asynchronously report healthy, returns when the message is queued.
    /// Must be called more frequently than the configured deadline.
    pub async fn report_healthy(&self) {
        self.report_status(ComponentStatus::HealthyUntil(Utc::now() + self.deadline))
            .await
    }

    /// Asynchronously report component status, returns when the message is queued.
    pub async fn report_status(&self, status: ComponentStatus) {
        let message = HealthMessage {
            component: self.component.clone(),
            status,
        };
        if let Err(err) = self.sender.send(message).await {
            warn!("failed to report health status: {}", err)
        }
    }
}

#[derive(Clone)]
pub struct HealthRegistry {
    name: String,
    components: Arc<RwLock<HashMap<String, ComponentStatus>>>,
    sender: mpsc::Sender<HealthMessage>,
}

impl HealthRegistry {
    pub fn new(name: &str) -> HealthRegistry {
        let (sender, mut receiver) = mpsc::channel::<HealthMessage>(16);
        let components: Arc<RwLock<HashMap<String, ComponentStatus>>> = Default::default();

        let read_components = components.clone();
        tokio::spawn(async move {
            while let Some(message) = receiver.recv().await {
                read_components
                    .write()
                    .expect("health registry lock poisoned")
                    .insert(message.component, message.status);
            }
        });

        HealthRegistry {
            name: name.to_owned(),
            components,
            sender,
        }
    }

    /// Register a new component, returning the handle it reports through.
    /// The returned status is Starting until the first report.
    pub async fn register(&self, component: String, deadline: Duration) -> HealthHandle {
        let handle = HealthHandle {
            component: component.clone(),
            deadline,
            sender: self.sender.clone(),
        };
        self.components
            .write()
            .expect("health registry lock poisoned")
            .insert(component, ComponentStatus::Starting);
        handle
    }

    /// Aggregate status: healthy iff every registered component reported
    /// healthy recently enough.
    pub fn get_status(&self) -> HealthStatus {
        let components = self
            .components
            .read()
            .expect("health registry lock poisoned");

        let now = Utc::now();
        let mut result = HealthStatus {
            healthy: !components.is_empty(),
            components: HashMap::with_capacity(components.len()),
        };

        for (name, status) in components.iter() {
            let status = match status {
                ComponentStatus::HealthyUntil(until) if *until < now => ComponentStatus::Stalled,
                healthy_or_not => healthy_or_not.clone(),
            };
            if !matches!(status, ComponentStatus::HealthyUntil(_)) {
                result.healthy = false;
            }
            result.components.insert(name.clone(), status);
        }

        if !result.healthy {
            warn!(
                "{} health check failed: {:?}",
                self.name, result.components
            );
        }

        result
    }
}
