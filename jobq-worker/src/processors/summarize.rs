use std::time::Duration;

use async_trait::async_trait;
use jobq_common::jobstore::Job;
use jobq_common::registry::Processor;
use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Stand-in for the model round trip.
const MODEL_LATENCY: Duration = Duration::from_millis(20);

const SUMMARY_WORDS: usize = 12;

#[derive(Deserialize)]
struct SummaryPayload {
    text: String,
}

/// Simulated text summarization.
#[derive(Default)]
pub struct TextSummarizer;

#[async_trait]
impl Processor for TextSummarizer {
    async fn process(&self, token: &CancellationToken, job: &Job) -> anyhow::Result<()> {
        let payload: SummaryPayload = serde_json::from_value(job.payload.0.clone())?;
        if payload.text.is_empty() {
            anyhow::bail!("summary payload has no text");
        }

        tokio::select! {
            _ = token.cancelled() => anyhow::bail!("summarization cancelled"),
            _ = tokio::time::sleep(MODEL_LATENCY) => {}
        }

        let summary: String = payload
            .text
            .split_whitespace()
            .take(SUMMARY_WORDS)
            .collect::<Vec<_>>()
            .join(" ");

        info!(job_id = %job.id, summary = %summary, "text summarized");
        Ok(())
    }
}
