//! Factory for constructing configured queue clients.
//!
//! Applications that consume several queues configure the factory once and
//! stamp out a client per queue name; each client still owns its own
//! connection and open/close lifecycle.

use crate::counters::{LogCounters, MessageCounters};
use crate::queues::SqsMessageQueue;
use crate::settings::QueueSettings;
use std::sync::Arc;

#[cfg(test)]
#[path = "factory_tests.rs"]
mod tests;

/// Creates [`SqsMessageQueue`] clients that share one configuration.
///
/// The queue name passed to [`create`](Self::create) overrides any queue name
/// in the shared settings, so one credential/region block serves any number
/// of queues.
#[derive(Clone)]
pub struct SqsMessageQueueFactory {
    settings: QueueSettings,
    counters: Arc<dyn MessageCounters>,
}

impl SqsMessageQueueFactory {
    pub fn new(settings: QueueSettings) -> Self {
        Self {
            settings,
            counters: Arc::new(LogCounters),
        }
    }

    /// Use the given telemetry hook for every created client
    pub fn with_counters(mut self, counters: Arc<dyn MessageCounters>) -> Self {
        self.counters = counters;
        self
    }

    /// Build a client for the named queue
    pub fn create(&self, name: impl Into<String>) -> SqsMessageQueue {
        let name = name.into();

        let mut settings = self.settings.clone();
        // The created client targets its own queue, not the shared default
        settings.connection.queue = Some(name.clone());
        settings.connection.resource = None;
        settings.connection.arn = None;

        SqsMessageQueue::with_settings(name, settings).with_counters(self.counters.clone())
    }
}

impl std::fmt::Debug for SqsMessageQueueFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqsMessageQueueFactory").finish()
    }
}
