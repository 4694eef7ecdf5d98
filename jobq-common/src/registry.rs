//! Processor registry: the mapping from job type to executable handler.
//!
//! The registry is populated once at process start, before any pool is
//! created, then shared immutably behind an `Arc`. There is no late
//! registration, which is what makes lock-free reads safe.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::jobstore::Job;

/// A plug-in handler executing one kind of job.
#[async_trait]
pub trait Processor: Send + Sync {
    /// Run one attempt to completion or error. Implementations receive the
    /// worker's cancellation token and are expected to return promptly once
    /// it fires; the core provides no hard kill.
    async fn process(&self, token: &CancellationToken, job: &Job) -> anyhow::Result<()>;
}

#[derive(Default)]
pub struct ProcessorRegistry {
    processors: HashMap<String, Arc<dyn Processor>>,
}

impl ProcessorRegistry {
    pub fn new() -> ProcessorRegistry {
        ProcessorRegistry::default()
    }

    /// Associate a job type with a processor.
    pub fn register(&mut self, job_type: &str, processor: Arc<dyn Processor>) {
        self.processors.insert(job_type.to_owned(), processor);
    }

    /// Look up the processor for a job type.
    pub fn get(&self, job_type: &str) -> Option<Arc<dyn Processor>> {
        self.processors.get(job_type).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NoopProcessor;

    #[async_trait]
    impl Processor for NoopProcessor {
        async fn process(&self, _token: &CancellationToken, _job: &Job) -> anyhow::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_register_and_get() {
        let mut registry = ProcessorRegistry::new();
        registry.register("email", Arc::new(NoopProcessor));

        assert!(registry.get("email").is_some());
        assert!(registry.get("pdf").is_none());
    }
}
