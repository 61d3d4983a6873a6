//! # SQS Messaging
//!
//! Asynchronous message queue client for AWS SQS with at-least-once delivery
//! semantics, lease-based message handling, and dead-letter escalation.
//!
//! This library provides:
//! - A provider-agnostic [`MessageQueue`] trait with send, peek,
//!   receive-with-lease, complete/abandon/dead-letter, and a polling listen
//!   loop
//! - An AWS SQS client over the HTTP query API with Signature V4 signing,
//!   FIFO queue and content-based deduplication support
//! - An in-memory implementation for testing and local development
//! - Connection resolution from configuration, including ARN
//!   composition/decomposition
//! - Counter hooks for operation telemetry
//!
//! ## Module Organization
//!
//! - [`error`] - Error types for all queue operations
//! - [`envelope`] - Message envelope and receipt handles
//! - [`settings`] - Configuration structures and loaders
//! - [`connect`] - AWS connection parameters and resolver
//! - [`counters`] - Telemetry counter hooks
//! - [`queue`] - Queue client traits
//! - [`queues`] - SQS and in-memory client implementations
//! - [`factory`] - Factory for stamping out configured clients

// Module declarations
pub mod connect;
pub mod counters;
pub mod envelope;
pub mod error;
pub mod factory;
pub mod queue;
pub mod queues;
pub mod settings;

// Re-export commonly used types at crate root for convenience
pub use connect::{AwsConnectionParams, AwsConnectionResolver};
pub use counters::{CachedCounters, LogCounters, MessageCounters, NullCounters};
pub use envelope::{MessageEnvelope, ReceiptHandle};
pub use error::{ConfigurationError, QueueError};
pub use factory::SqsMessageQueueFactory;
pub use queue::{MessageQueue, MessageReceiver};
pub use queues::{MemoryMessageQueue, SqsMessageQueue};
pub use settings::{ConnectionSettings, CredentialSettings, OptionsSettings, QueueSettings};
