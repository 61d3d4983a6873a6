//! In-memory queue client for testing and local development.
//!
//! Implements the full [`MessageQueue`] contract against process-local state:
//! FIFO delivery order, receive-with-lease with expiry-driven redelivery, an
//! optional linked dead-letter queue, and the same counter and logging
//! surface as the provider-backed clients. Nothing survives a restart.

use crate::counters::{LogCounters, MessageCounters};
use crate::envelope::{MessageEnvelope, ReceiptHandle};
use crate::error::QueueError;
use crate::queue::{MessageQueue, MessageReceiver};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tracing::{debug, error, trace, warn};

#[cfg(test)]
#[path = "memory_tests.rs"]
mod tests;

/// Lease applied by `receive` until the caller resolves the message
const DEFAULT_LEASE: Duration = Duration::milliseconds(60_000);

/// Poll granularity for `receive` while waiting for a message
const RECEIVE_POLL: std::time::Duration = std::time::Duration::from_millis(10);

/// Batch size used by the drain fallback in `clear`
const DRAIN_BATCH_SIZE: usize = 10;
const DRAIN_STOP_THRESHOLD: usize = 9;

/// A received message held invisible until completed, abandoned, or expired
#[derive(Debug, Clone)]
struct Lease {
    envelope: MessageEnvelope,
    expires_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct QueueState {
    messages: VecDeque<MessageEnvelope>,
    in_flight: HashMap<u64, Lease>,
    next_token: u64,
}

impl QueueState {
    /// Return expired leases to the visible queue, preserving arrival order
    /// ahead of newer messages
    fn reclaim_expired(&mut self, now: DateTime<Utc>) {
        let expired: Vec<u64> = self
            .in_flight
            .iter()
            .filter(|(_, lease)| lease.expires_at <= now)
            .map(|(token, _)| *token)
            .collect();
        for token in expired {
            if let Some(lease) = self.in_flight.remove(&token) {
                self.messages.push_front(lease.envelope);
            }
        }
    }
}

type SharedState = Arc<Mutex<QueueState>>;

/// In-memory implementation of [`MessageQueue`].
///
/// Receipt handles encode how the message was obtained: `lease:{token}` for
/// received messages under a lease, `msg:{message_id}` for peeked messages
/// that are still visible in the queue.
pub struct MemoryMessageQueue {
    name: String,
    interval: std::time::Duration,
    counters: Arc<dyn MessageCounters>,
    state: SharedState,
    dead_state: Option<SharedState>,
    opened: AtomicBool,
    reject_purge: AtomicBool,
    cancel: Mutex<Arc<AtomicBool>>,
}

impl MemoryMessageQueue {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            interval: std::time::Duration::from_millis(10),
            counters: Arc::new(LogCounters),
            state: Arc::new(Mutex::new(QueueState::default())),
            dead_state: None,
            opened: AtomicBool::new(false),
            reject_purge: AtomicBool::new(false),
            cancel: Mutex::new(Arc::new(AtomicBool::new(false))),
        }
    }

    /// Route dead-lettered messages into `dead_queue`'s storage
    pub fn with_dead_letter(mut self, dead_queue: &MemoryMessageQueue) -> Self {
        self.dead_state = Some(dead_queue.state.clone());
        self
    }

    /// Replace the telemetry hook
    pub fn with_counters(mut self, counters: Arc<dyn MessageCounters>) -> Self {
        self.counters = counters;
        self
    }

    /// Make `clear` take the batched drain path instead of purging in place,
    /// mimicking a provider that rejects back-to-back purges
    pub fn reject_purge(&self, reject: bool) {
        self.reject_purge.store(reject, Ordering::SeqCst);
    }

    fn counter(&self, event: &str) -> String {
        format!("queue.{}.{}", self.name, event)
    }

    fn ensure_opened(&self) -> Result<(), QueueError> {
        if self.opened.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(QueueError::NotOpened)
        }
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, QueueState> {
        self.state.lock().expect("queue state lock poisoned")
    }

    /// Take the next visible message under a fresh lease
    fn take_next(&self) -> Option<MessageEnvelope> {
        let mut state = self.lock_state();
        state.reclaim_expired(Utc::now());

        let mut envelope = state.messages.pop_front()?;
        let token = state.next_token;
        state.next_token += 1;
        state.in_flight.insert(
            token,
            Lease {
                envelope: envelope.clone(),
                expires_at: Utc::now() + DEFAULT_LEASE,
            },
        );
        envelope.receipt = Some(ReceiptHandle::new(format!("lease:{}", token)));
        Some(envelope)
    }

    fn parse_lease_token(receipt: &ReceiptHandle) -> Option<u64> {
        receipt.as_str().strip_prefix("lease:")?.parse().ok()
    }

    fn parse_message_id(receipt: &ReceiptHandle) -> Option<&str> {
        receipt.as_str().strip_prefix("msg:")
    }
}

impl fmt::Debug for MemoryMessageQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryMessageQueue")
            .field("name", &self.name)
            .finish()
    }
}

#[async_trait]
impl MessageQueue for MemoryMessageQueue {
    fn name(&self) -> &str {
        &self.name
    }

    async fn open(&self, correlation_id: Option<&str>) -> Result<(), QueueError> {
        self.opened.store(true, Ordering::SeqCst);
        debug!(
            correlation_id = correlation_id.unwrap_or(""),
            queue = %self.name,
            "Opened queue"
        );
        Ok(())
    }

    async fn close(&self, correlation_id: Option<&str>) -> Result<(), QueueError> {
        self.end_listen(correlation_id);
        self.opened.store(false, Ordering::SeqCst);
        trace!(
            correlation_id = correlation_id.unwrap_or(""),
            queue = %self.name,
            "Closed queue"
        );
        Ok(())
    }

    async fn is_open(&self) -> bool {
        self.opened.load(Ordering::SeqCst)
    }

    async fn send(
        &self,
        correlation_id: Option<&str>,
        envelope: &mut MessageEnvelope,
    ) -> Result<(), QueueError> {
        self.ensure_opened()?;

        envelope.sent_time = Some(Utc::now());

        let mut stored = envelope.clone();
        stored.receipt = None;
        self.lock_state().messages.push_back(stored);

        self.counters.increment_one(&self.counter("sent_messages"));
        debug!(
            correlation_id = correlation_id.unwrap_or(""),
            queue = %self.name,
            envelope = %envelope,
            "Sent message"
        );
        Ok(())
    }

    async fn peek(
        &self,
        correlation_id: Option<&str>,
    ) -> Result<Option<MessageEnvelope>, QueueError> {
        let messages = self.peek_batch(correlation_id, 1).await?;
        Ok(messages.into_iter().next())
    }

    async fn peek_batch(
        &self,
        correlation_id: Option<&str>,
        count: u32,
    ) -> Result<Vec<MessageEnvelope>, QueueError> {
        self.ensure_opened()?;

        let mut state = self.lock_state();
        state.reclaim_expired(Utc::now());

        let messages: Vec<MessageEnvelope> = state
            .messages
            .iter()
            .take(count as usize)
            .map(|stored| {
                let mut envelope = stored.clone();
                envelope.receipt = Some(ReceiptHandle::new(format!(
                    "msg:{}",
                    envelope.message_id.as_deref().unwrap_or("")
                )));
                envelope
            })
            .collect();

        trace!(
            correlation_id = correlation_id.unwrap_or(""),
            queue = %self.name,
            count = messages.len(),
            "Peeked messages"
        );
        Ok(messages)
    }

    async fn receive(
        &self,
        correlation_id: Option<&str>,
        wait_timeout: Duration,
    ) -> Result<Option<MessageEnvelope>, QueueError> {
        self.ensure_opened()?;

        let deadline = Utc::now() + wait_timeout;
        let envelope = loop {
            match self.take_next() {
                Some(envelope) => break Some(envelope),
                None if Utc::now() >= deadline => break None,
                None => tokio::time::sleep(RECEIVE_POLL).await,
            }
        };

        if let Some(ref envelope) = envelope {
            self.counters
                .increment_one(&self.counter("received_messages"));
            debug!(
                correlation_id = correlation_id.unwrap_or(""),
                queue = %self.name,
                envelope = %envelope,
                "Received message"
            );
        }
        Ok(envelope)
    }

    async fn renew_lock(
        &self,
        envelope: &mut MessageEnvelope,
        lock_timeout: Duration,
    ) -> Result<(), QueueError> {
        self.ensure_opened()?;

        let Some(ref receipt) = envelope.receipt else {
            return Ok(());
        };
        if let Some(token) = Self::parse_lease_token(receipt) {
            let mut state = self.lock_state();
            if let Some(lease) = state.in_flight.get_mut(&token) {
                lease.expires_at = Utc::now() + lock_timeout;
                trace!(queue = %self.name, envelope = %envelope, "Renewed message lock");
            }
        }
        Ok(())
    }

    async fn abandon(&self, envelope: &mut MessageEnvelope) -> Result<(), QueueError> {
        self.ensure_opened()?;

        let Some(receipt) = envelope.receipt.take() else {
            return Ok(());
        };
        if let Some(token) = Self::parse_lease_token(&receipt) {
            let mut state = self.lock_state();
            if let Some(lease) = state.in_flight.remove(&token) {
                state.messages.push_front(lease.envelope);
                trace!(queue = %self.name, envelope = %envelope, "Abandoned message");
            }
        }
        Ok(())
    }

    async fn complete(&self, envelope: &mut MessageEnvelope) -> Result<(), QueueError> {
        self.ensure_opened()?;

        let Some(receipt) = envelope.receipt.take() else {
            return Ok(());
        };
        let mut state = self.lock_state();
        if let Some(token) = Self::parse_lease_token(&receipt) {
            state.in_flight.remove(&token);
        } else if let Some(message_id) = Self::parse_message_id(&receipt) {
            // Peeked receipt: the message is still visible in the queue
            state
                .messages
                .retain(|stored| stored.message_id.as_deref() != Some(message_id));
        }
        trace!(queue = %self.name, envelope = %envelope, "Completed message");
        Ok(())
    }

    async fn move_to_dead_letter(&self, envelope: &mut MessageEnvelope) -> Result<(), QueueError> {
        self.ensure_opened()?;

        let Some(receipt) = envelope.receipt.take() else {
            return Ok(());
        };

        {
            let mut state = self.lock_state();
            if let Some(token) = Self::parse_lease_token(&receipt) {
                state.in_flight.remove(&token);
            } else if let Some(message_id) = Self::parse_message_id(&receipt) {
                state
                    .messages
                    .retain(|stored| stored.message_id.as_deref() != Some(message_id));
            }
        }

        if let Some(ref dead_state) = self.dead_state {
            let mut dead_copy = envelope.clone();
            dead_copy.receipt = None;
            dead_state
                .lock()
                .expect("queue state lock poisoned")
                .messages
                .push_back(dead_copy);
        } else {
            warn!(
                queue = %self.name,
                envelope = %envelope,
                "No dead letter queue is defined. The message is discarded."
            );
        }

        self.counters.increment_one(&self.counter("dead_messages"));
        trace!(queue = %self.name, envelope = %envelope, "Moved message to dead letter queue");
        Ok(())
    }

    async fn listen(
        &self,
        correlation_id: Option<&str>,
        receiver: &dyn MessageReceiver,
    ) -> Result<(), QueueError> {
        self.ensure_opened()?;

        debug!(
            correlation_id = correlation_id.unwrap_or(""),
            queue = %self.name,
            "Started listening for messages"
        );

        // Fresh signal per listen call so a cancelled loop can be restarted
        let cancel = Arc::new(AtomicBool::new(false));
        *self.cancel.lock().expect("cancel lock poisoned") = cancel.clone();

        while !cancel.load(Ordering::SeqCst) {
            if !self.opened.load(Ordering::SeqCst) {
                break;
            }

            match self.take_next() {
                Some(mut envelope) => {
                    self.counters
                        .increment_one(&self.counter("received_messages"));
                    debug!(
                        correlation_id = correlation_id.unwrap_or(""),
                        queue = %self.name,
                        envelope = %envelope,
                        "Received message"
                    );

                    // A failing message must never stop the loop; its lease
                    // simply runs out unless the receiver resolved it
                    if let Err(callback_error) = receiver.receive_message(&mut envelope, self).await
                    {
                        error!(
                            correlation_id = correlation_id.unwrap_or(""),
                            queue = %self.name,
                            error = %callback_error,
                            "Failed to process the message"
                        );
                    }
                }
                None => tokio::time::sleep(self.interval).await,
            }
        }

        Ok(())
    }

    fn end_listen(&self, correlation_id: Option<&str>) {
        self.cancel
            .lock()
            .expect("cancel lock poisoned")
            .store(true, Ordering::SeqCst);
        trace!(
            correlation_id = correlation_id.unwrap_or(""),
            queue = %self.name,
            "Requested end of listening"
        );
    }

    async fn clear(&self, correlation_id: Option<&str>) -> Result<(), QueueError> {
        self.ensure_opened()?;

        if self.reject_purge.load(Ordering::SeqCst) {
            // Drain path used when the provider refuses a purge. Draining
            // through leases keeps it independent of message ids.
            loop {
                let mut drained = 0;
                while drained < DRAIN_BATCH_SIZE {
                    let Some(mut envelope) = self.take_next() else {
                        break;
                    };
                    self.complete(&mut envelope).await?;
                    drained += 1;
                }
                if drained < DRAIN_STOP_THRESHOLD {
                    break;
                }
            }
        } else {
            let mut state = self.lock_state();
            state.messages.clear();
            state.in_flight.clear();
        }

        trace!(
            correlation_id = correlation_id.unwrap_or(""),
            queue = %self.name,
            "Cleared queue"
        );
        Ok(())
    }

    async fn message_count(&self) -> Result<u64, QueueError> {
        self.ensure_opened()?;

        let mut state = self.lock_state();
        state.reclaim_expired(Utc::now());
        Ok(state.messages.len() as u64)
    }
}
