use std::time::Duration;

use async_trait::async_trait;
use jobq_common::jobstore::Job;
use jobq_common::registry::Processor;
use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Stand-in for the SMTP round trip.
const SEND_LATENCY: Duration = Duration::from_millis(10);

#[derive(Deserialize)]
struct EmailPayload {
    to: String,
    #[serde(default)]
    subject: String,
}

/// Simulated email delivery.
#[derive(Default)]
pub struct EmailSender;

#[async_trait]
impl Processor for EmailSender {
    async fn process(&self, token: &CancellationToken, job: &Job) -> anyhow::Result<()> {
        let payload: EmailPayload = serde_json::from_value(job.payload.0.clone())?;
        if payload.to.is_empty() {
            anyhow::bail!("email payload has no recipient");
        }

        tokio::select! {
            _ = token.cancelled() => anyhow::bail!("send cancelled"),
            _ = tokio::time::sleep(SEND_LATENCY) => {}
        }

        info!(job_id = %job.id, to = %payload.to, subject = %payload.subject, "email sent");
        Ok(())
    }
}
