//! Telemetry call-out contract for queue operations.
//!
//! The queue client reports operation counts through this trait; wiring the
//! counters to an actual telemetry backend is the embedding application's
//! concern. Counter names follow the `queue.{name}.{event}` convention:
//! `sent_messages`, `received_messages`, `dead_messages`.

use tracing::debug;

/// Operation counter hook invoked by queue clients
pub trait MessageCounters: Send + Sync {
    /// Increment the named counter by one
    fn increment_one(&self, counter: &str);
}

/// Counters that emit a debug trace per increment
#[derive(Debug, Default)]
pub struct LogCounters;

impl MessageCounters for LogCounters {
    fn increment_one(&self, counter: &str) {
        debug!(counter, "Incremented counter");
    }
}

/// Counters that discard all increments
#[derive(Debug, Default)]
pub struct NullCounters;

impl MessageCounters for NullCounters {
    fn increment_one(&self, _counter: &str) {}
}

/// Counters that accumulate values in memory.
///
/// Useful as a staging area for a batching exporter and for inspecting
/// operation counts in tests.
#[derive(Debug, Default)]
pub struct CachedCounters {
    counts: std::sync::Mutex<std::collections::HashMap<String, u64>>,
}

impl CachedCounters {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current value of the named counter, zero if never incremented
    pub fn get(&self, counter: &str) -> u64 {
        *self
            .counts
            .lock()
            .expect("counter lock poisoned")
            .get(counter)
            .unwrap_or(&0)
    }
}

impl MessageCounters for CachedCounters {
    fn increment_one(&self, counter: &str) {
        *self
            .counts
            .lock()
            .expect("counter lock poisoned")
            .entry(counter.to_string())
            .or_insert(0) += 1;
    }
}

#[cfg(test)]
#[path = "counters_tests.rs"]
mod tests;
