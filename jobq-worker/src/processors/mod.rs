//! Built-in processors.
//!
//! These stand in for the real integrations behind each job type. The core
//! only relies on the execution contract: run one attempt to success or
//! error, and return promptly once the worker's token is cancelled.

mod email;
mod receipt;
mod summarize;

pub use email::EmailSender;
pub use receipt::ReceiptGenerator;
pub use summarize::TextSummarizer;
