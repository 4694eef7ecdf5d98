use std::path::PathBuf;

use async_trait::async_trait;
use jobq_common::jobstore::Job;
use jobq_common::registry::Processor;
use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tracing::info;

#[derive(Deserialize)]
struct ReceiptPayload {
    to: String,
    item: String,
    amount: f64,
    #[serde(default)]
    is_paid: bool,
}

/// Renders receipts to a local directory. A real deployment would hand the
/// artifact to object storage.
pub struct ReceiptGenerator {
    output_dir: PathBuf,
}

impl ReceiptGenerator {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
        }
    }
}

impl Default for ReceiptGenerator {
    fn default() -> Self {
        Self::new(std::env::temp_dir())
    }
}

#[async_trait]
impl Processor for ReceiptGenerator {
    async fn process(&self, token: &CancellationToken, job: &Job) -> anyhow::Result<()> {
        let payload: ReceiptPayload = serde_json::from_value(job.payload.0.clone())?;

        if token.is_cancelled() {
            anyhow::bail!("receipt rendering cancelled");
        }

        let receipt = format!(
            "Receipt\n\nTo: {}\nItem: {}\nAmount: ${:.2}\nStatus: {}\n",
            payload.to,
            payload.item,
            payload.amount,
            if payload.is_paid { "PAID" } else { "UNPAID" },
        );

        let path = self.output_dir.join(format!("receipt-{}.txt", job.id));
        tokio::fs::write(&path, receipt).await?;

        info!(job_id = %job.id, path = %path.display(), "receipt rendered");
        Ok(())
    }
}
