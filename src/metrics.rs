//! Logging collaborator and local call statistics.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use once_cell::sync::Lazy;

static TRACING_SINK: Lazy<Arc<dyn EventSink>> = Lazy::new(|| Arc::new(TracingSink));

/// Receives the breaker's log events.
///
/// Sinks are stateless as far as the breaker is concerned and must never
/// fail.
pub trait EventSink: Send + Sync + 'static {
    /// Routine progress, e.g. a state query or a reset.
    fn info(&self, breaker: &str, message: &str);

    /// Something the caller may want to act on, e.g. the breaker opening.
    fn warn(&self, breaker: &str, message: &str);

    /// A store failure the breaker absorbed.
    fn error(&self, breaker: &str, message: &str);
}

/// Forwards events to the `tracing` facade.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl TracingSink {
    /// The shared instance used when no sink is configured.
    pub fn shared() -> Arc<dyn EventSink> {
        Arc::clone(&TRACING_SINK)
    }
}

impl EventSink for TracingSink {
    fn info(&self, breaker: &str, message: &str) {
        tracing::info!(breaker, "{}", message);
    }

    fn warn(&self, breaker: &str, message: &str) {
        tracing::warn!(breaker, "{}", message);
    }

    fn error(&self, breaker: &str, message: &str) {
        tracing::error!(breaker, "{}", message);
    }
}

/// A sink that discards all events.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl EventSink for NullSink {
    fn info(&self, _breaker: &str, _message: &str) {}
    fn warn(&self, _breaker: &str, _message: &str) {}
    fn error(&self, _breaker: &str, _message: &str) {}
}

/// Process-local counters for one breaker instance.
///
/// These are never persisted. The shared failure count lives in the state
/// store.
#[derive(Debug, Default)]
pub struct BreakerStats {
    calls: AtomicU64,
    successes: AtomicU64,
    qualifying_failures: AtomicU64,
    ignored_failures: AtomicU64,
    rejections: AtomicU64,
    fallbacks: AtomicU64,
    store_errors: AtomicU64,
}

impl BreakerStats {
    /// Creates zeroed stats.
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_call(&self) {
        self.calls.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_success(&self) {
        self.successes.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_qualifying_failure(&self) {
        self.qualifying_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_ignored_failure(&self) {
        self.ignored_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_rejection(&self) {
        self.rejections.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_fallback(&self) {
        self.fallbacks.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_store_error(&self) {
        self.store_errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Copies the current counters.
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            calls: self.calls.load(Ordering::Relaxed),
            successes: self.successes.load(Ordering::Relaxed),
            qualifying_failures: self.qualifying_failures.load(Ordering::Relaxed),
            ignored_failures: self.ignored_failures.load(Ordering::Relaxed),
            rejections: self.rejections.load(Ordering::Relaxed),
            fallbacks: self.fallbacks.load(Ordering::Relaxed),
            store_errors: self.store_errors.load(Ordering::Relaxed),
        }
    }

    /// Resets all counters.
    pub fn reset(&self) {
        for counter in [
            &self.calls,
            &self.successes,
            &self.qualifying_failures,
            &self.ignored_failures,
            &self.rejections,
            &self.fallbacks,
            &self.store_errors,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
    }
}

/// A point-in-time copy of [`BreakerStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    /// Calls that reached the wrapped operation.
    pub calls: u64,
    /// Calls whose operation succeeded.
    pub successes: u64,
    /// Failures that counted toward the threshold.
    pub qualifying_failures: u64,
    /// Failures passed through without accounting.
    pub ignored_failures: u64,
    /// Calls rejected with [`BreakerError::Open`](crate::BreakerError::Open).
    pub rejections: u64,
    /// Calls served by the fallback.
    pub fallbacks: u64,
    /// State store errors absorbed by the breaker.
    pub store_errors: u64,
}
