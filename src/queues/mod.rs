//! Queue client variants.
//!
//! - [`sqs`] - AWS SQS client over the HTTP query API
//! - [`memory`] - in-memory implementation for testing and development

pub mod memory;
pub mod sqs;

pub use memory::MemoryMessageQueue;
pub use sqs::SqsMessageQueue;
