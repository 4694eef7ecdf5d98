pub mod autoscaler;
pub mod config;
pub mod error;
pub mod failure;
pub mod pool;
pub mod postmortem;
pub mod processors;
pub mod worker;
