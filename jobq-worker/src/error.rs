use jobq_common::broker;
use jobq_common::jobstore;
use thiserror::Error;

/// Enumeration of errors that can abort the worker binary.
#[derive(Error, Debug)]
pub enum WorkerError {
    #[error("a store error occurred: {0}")]
    StoreError(#[from] jobstore::StoreError),
    #[error("a broker error occurred: {0}")]
    BrokerError(#[from] broker::BrokerError),
}
