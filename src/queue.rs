//! Queue client traits: the provider-agnostic capability surface.
//!
//! Every queue variant implements [`MessageQueue`]: open/close lifecycle,
//! send, non-destructive peek, receive-with-lease, lease renewal, abandon,
//! complete, dead-letter move, purge, approximate count, and a continuous
//! listen loop. The same trait object is handed back into the receiver
//! callback so it can resolve the messages it is given.

use crate::envelope::MessageEnvelope;
use crate::error::QueueError;
use async_trait::async_trait;
use chrono::Duration;

/// Uniform contract for message queue clients.
///
/// A client instance owns one logical queue on one provider connection.
/// Operational methods other than `open`/`close`/`is_open` fail with
/// [`QueueError::NotOpened`] until the queue has been opened.
#[async_trait]
pub trait MessageQueue: Send + Sync {
    /// Name of this queue client instance
    fn name(&self) -> &str;

    /// Resolve the connection, provision queue resources, and transition to
    /// the open state. Idempotent provisioning: an already existing queue is
    /// not an error.
    async fn open(&self, correlation_id: Option<&str>) -> Result<(), QueueError>;

    /// Cancel any active listen loop and transition to closed. Idempotent.
    async fn close(&self, correlation_id: Option<&str>) -> Result<(), QueueError>;

    /// Whether the queue is currently open
    async fn is_open(&self) -> bool;

    /// Send an envelope. Stamps `sent_time` and updates `message_id` from the
    /// provider's send acknowledgement. Transient failures propagate; this
    /// layer performs no retry.
    async fn send(
        &self,
        correlation_id: Option<&str>,
        envelope: &mut MessageEnvelope,
    ) -> Result<(), QueueError>;

    /// Inspect the next message without consuming it or taking a lease
    async fn peek(&self, correlation_id: Option<&str>)
        -> Result<Option<MessageEnvelope>, QueueError>;

    /// Inspect up to `count` messages without consuming them
    async fn peek_batch(
        &self,
        correlation_id: Option<&str>,
        count: u32,
    ) -> Result<Vec<MessageEnvelope>, QueueError>;

    /// Receive one message under the default lease, waiting up to
    /// `wait_timeout` for one to arrive. `Ok(None)` means no message was
    /// available, not an error.
    async fn receive(
        &self,
        correlation_id: Option<&str>,
        wait_timeout: Duration,
    ) -> Result<Option<MessageEnvelope>, QueueError>;

    /// Extend the lease on a received envelope. No-op when the envelope holds
    /// no receipt.
    async fn renew_lock(
        &self,
        envelope: &mut MessageEnvelope,
        lock_timeout: Duration,
    ) -> Result<(), QueueError>;

    /// Return the message to the queue for immediate redelivery and clear the
    /// receipt
    async fn abandon(&self, envelope: &mut MessageEnvelope) -> Result<(), QueueError>;

    /// Acknowledge successful processing: delete the message and clear the
    /// receipt. No-op when the receipt is already cleared.
    async fn complete(&self, envelope: &mut MessageEnvelope) -> Result<(), QueueError>;

    /// Move the message to the dead-letter queue (or discard it with a
    /// warning when none is configured), remove it from the primary queue,
    /// and clear the receipt
    async fn move_to_dead_letter(&self, envelope: &mut MessageEnvelope) -> Result<(), QueueError>;

    /// Run a blocking consumption loop, invoking `receiver` for each message
    /// until [`MessageQueue::end_listen`] cancels it. Receiver errors are
    /// logged and never terminate the loop.
    async fn listen(
        &self,
        correlation_id: Option<&str>,
        receiver: &dyn MessageReceiver,
    ) -> Result<(), QueueError>;

    /// Signal the active listen loop to stop. The loop observes the signal at
    /// the top of its next iteration.
    fn end_listen(&self, correlation_id: Option<&str>);

    /// Remove all messages from the queue
    async fn clear(&self, correlation_id: Option<&str>) -> Result<(), QueueError>;

    /// Approximate number of messages in the queue. Eventually consistent,
    /// never exact.
    async fn message_count(&self) -> Result<u64, QueueError>;
}

/// Callback invoked by [`MessageQueue::listen`] for each received message.
///
/// The queue reference allows the receiver to complete, abandon, renew, or
/// dead-letter the envelope it was handed. An error return is logged by the
/// listen loop and the message is left to its lease; the framework neither
/// completes nor abandons it.
#[async_trait]
pub trait MessageReceiver: Send + Sync {
    async fn receive_message(
        &self,
        envelope: &mut MessageEnvelope,
        queue: &dyn MessageQueue,
    ) -> Result<(), anyhow::Error>;
}
