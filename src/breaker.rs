//! Core circuit breaker implementation.

use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use parking_lot::Mutex;

use crate::clock::Clock;
use crate::config::{BreakerBuilder, BreakerConfig};
use crate::error::{BreakerError, BreakerResult, StoreError};
use crate::hook::HookRegistry;
use crate::metrics::{BreakerStats, EventSink, StatsSnapshot};
use crate::policy::{Classification, FailureKind};
use crate::state::{derive_effective_state, BreakerState, State};
use crate::store::{InMemoryStateStore, StateStore};

/// Function serving calls while the circuit is open.
pub type Fallback<A, T, E> = Arc<dyn Fn(A) -> Result<T, E> + Send + Sync + 'static>;

/// Inner state of the circuit breaker, shared between clones.
struct BreakerInner<A, T, E, S> {
    config: BreakerConfig,
    store: S,
    fallback: Option<Fallback<A, T, E>>,
    sink: Arc<dyn EventSink>,
    hooks: Arc<HookRegistry>,
    clock: Arc<dyn Clock>,
    stats: BreakerStats,
    // Serializes read-compute-write of the failure count within this process.
    accounting: Mutex<()>,
}

/// A circuit breaker that can wrap function calls to prevent cascading failures.
///
/// The breaker keeps no state of its own: every decision is made on the
/// state read from `S`. With a shared [`DurableStateStore`](crate::DurableStateStore)
/// all processes using the same breaker name trip and recover together.
pub struct CircuitBreaker<A, T, E, S = InMemoryStateStore> {
    inner: Arc<BreakerInner<A, T, E, S>>,
}

impl<A, T, E> CircuitBreaker<A, T, E> {
    /// Creates a new builder for customizing a circuit breaker.
    pub fn builder(name: impl Into<String>) -> BreakerBuilder<A, T, E> {
        BreakerBuilder::new(name)
    }
}

impl<A, T, E, S> CircuitBreaker<A, T, E, S>
where
    S: StateStore,
{
    pub(crate) fn new(
        config: BreakerConfig,
        store: S,
        fallback: Option<Fallback<A, T, E>>,
        sink: Arc<dyn EventSink>,
        hooks: Arc<HookRegistry>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let inner = BreakerInner {
            config,
            store,
            fallback,
            sink,
            hooks,
            clock,
            stats: BreakerStats::new(),
            accounting: Mutex::new(()),
        };

        Self {
            inner: Arc::new(inner),
        }
    }

    /// The breaker name.
    pub fn name(&self) -> &str {
        &self.inner.config.name
    }

    /// The breaker configuration.
    pub fn config(&self) -> &BreakerConfig {
        &self.inner.config
    }

    /// The state store this breaker reads and writes.
    pub fn store(&self) -> &S {
        &self.inner.store
    }

    /// Returns true if a fallback is configured.
    pub fn has_fallback(&self) -> bool {
        self.inner.fallback.is_some()
    }

    /// Executes `op(args)` wrapped by the circuit breaker.
    ///
    /// While the circuit is open the operation is not invoked: the fallback
    /// gets `args` instead, or the call fails with [`BreakerError::Open`].
    /// Operation and fallback errors are returned unchanged inside
    /// [`BreakerError::Operation`].
    pub fn call<F>(&self, op: F, args: A) -> BreakerResult<T, E>
    where
        F: FnOnce(A) -> Result<T, E>,
        E: FailureKind,
    {
        let observed = self.effective_state();
        if observed == Some(State::Open) {
            return self.reject(args);
        }

        self.inner.stats.record_call();
        let result = op(args);
        self.after_call(observed, &result);

        result.map_err(BreakerError::Operation)
    }

    /// Creates the state record if the store does not have one yet.
    ///
    /// # Errors
    ///
    /// Returns the store error if the record could not be written.
    pub fn initialize(&self) -> Result<(), StoreError> {
        let now = self.inner.clock.now_millis();
        self.inner
            .store
            .initialize(&self.defaults(now), &self.inner.config.expected_failures)
    }

    /// The current state, with an elapsed open window reported as
    /// `HalfOpen`. Reports `Closed` if the store cannot be read.
    pub fn state(&self) -> State {
        self.effective_state().unwrap_or(State::Closed)
    }

    /// Returns true if calls are currently rejected.
    pub fn is_open(&self) -> bool {
        self.effective_state() == Some(State::Open)
    }

    /// Returns true if the breaker is closed.
    pub fn is_closed(&self) -> bool {
        self.state() == State::Closed
    }

    /// The raw stored state, without re-deriving `HalfOpen`.
    ///
    /// # Errors
    ///
    /// Returns the store error if the state could not be read.
    pub fn stored_state(&self) -> Result<BreakerState, StoreError> {
        self.inner.store.read(self.name())
    }

    /// Qualifying failures since the last success.
    ///
    /// # Errors
    ///
    /// Returns the store error if the state could not be read.
    pub fn failure_count(&self) -> Result<u32, StoreError> {
        let count = self.stored_state()?.failure_count;
        self.inner
            .sink
            .info(self.name(), &format!("failure count: {}", count));
        Ok(count)
    }

    /// Identity of the last qualifying failure since the last success.
    ///
    /// # Errors
    ///
    /// Returns the store error if the state could not be read.
    pub fn last_failure(&self) -> Result<Option<String>, StoreError> {
        Ok(self.stored_state()?.last_failure)
    }

    /// Milliseconds until an open breaker may be probed; zero or negative once
    /// the recovery window has elapsed.
    ///
    /// # Errors
    ///
    /// Returns the store error if the state could not be read.
    pub fn open_remaining(&self) -> Result<i64, StoreError> {
        let now = self.inner.clock.now_millis();
        let remaining = self.stored_state()?.open_remaining(now);
        self.inner.sink.info(
            self.name(),
            &format!("{} ms remaining until half-open", remaining),
        );
        Ok(remaining)
    }

    /// Approximate wall-clock time at which an open breaker may be probed.
    ///
    /// # Errors
    ///
    /// Returns the store error if the state could not be read.
    pub fn open_until(&self) -> Result<SystemTime, StoreError> {
        let stored = self.stored_state()?;
        let deadline = stored
            .opened_at
            .saturating_add(stored.recovery_timeout_millis);
        Ok(UNIX_EPOCH + Duration::from_millis(deadline))
    }

    /// Opens the breaker now, regardless of the failure count.
    ///
    /// Hooks run after the store write, so they may call back into the
    /// breaker.
    ///
    /// # Errors
    ///
    /// Returns the store error if the state could not be written.
    pub fn force_open(&self) -> Result<(), StoreError> {
        {
            let _guard = self.inner.accounting.lock();
            let now = self.inner.clock.now_millis();
            self.inner.store.write_forced_open(self.name(), now)?;
        }
        self.inner.sink.warn(self.name(), "breaker forced open");
        self.inner.hooks.execute_state_transition_hook(State::Open);
        Ok(())
    }

    /// Closes the breaker and clears its failure count.
    ///
    /// # Errors
    ///
    /// Returns the store error if the state could not be written.
    pub fn force_closed(&self) -> Result<(), StoreError> {
        {
            let _guard = self.inner.accounting.lock();
            self.inner.store.write_success(self.name())?;
        }
        self.inner.sink.info(self.name(), "breaker forced closed");
        self.inner
            .hooks
            .execute_state_transition_hook(State::Closed);
        Ok(())
    }

    /// Local counters of this breaker instance.
    pub fn stats(&self) -> StatsSnapshot {
        self.inner.stats.snapshot()
    }

    /// Resets the local counters.
    pub fn reset_stats(&self) {
        self.inner.stats.reset();
    }

    pub(crate) fn ensure_record(&self) {
        if let Err(err) = self.initialize() {
            self.absorb(err, "initializing state");
        }
    }

    fn defaults(&self, now: u64) -> BreakerState {
        BreakerState::closed(
            self.name(),
            self.inner.config.failure_threshold,
            self.inner.config.recovery_timeout_millis,
            now,
        )
    }

    /// Reads the state through the store and derives `HalfOpen` from an
    /// expired `Open`, persisting the flip. `None` if the store failed.
    fn effective_state(&self) -> Option<State> {
        let inner = &self.inner;
        let now = inner.clock.now_millis();
        let stored = match inner.store.read(self.name()) {
            Ok(stored) => stored,
            Err(StoreError::NotFound(_)) => {
                inner
                    .sink
                    .info(self.name(), "no stored state, creating a closed breaker");
                self.ensure_record();
                return Some(State::Closed);
            }
            Err(err) => {
                self.absorb(err, "reading state");
                return None;
            }
        };

        let derived = derive_effective_state(&stored, now);
        if derived == State::HalfOpen && stored.state == State::Open {
            inner
                .sink
                .info(self.name(), "recovery timeout elapsed, switching to half-open");
            match inner.store.write_half_open(self.name()) {
                Ok(()) => inner.hooks.execute_state_transition_hook(State::HalfOpen),
                Err(err) => self.absorb(err, "persisting half-open"),
            }
        }
        inner
            .sink
            .info(self.name(), &format!("state is {}", derived));

        Some(derived)
    }

    fn reject(&self, args: A) -> BreakerResult<T, E> {
        let inner = &self.inner;
        match &inner.fallback {
            Some(fallback) => {
                inner.stats.record_fallback();
                inner
                    .sink
                    .info(self.name(), "circuit is open, serving the fallback");
                inner.hooks.execute_fallback_hook();
                fallback(args).map_err(BreakerError::Operation)
            }
            None => {
                inner.stats.record_rejection();
                inner.sink.warn(self.name(), "circuit is open, rejecting call");
                inner.hooks.execute_rejected_hook();
                Err(BreakerError::Open)
            }
        }
    }

    fn after_call(&self, observed: Option<State>, result: &Result<T, E>)
    where
        E: FailureKind,
    {
        let inner = &self.inner;
        let err = match result {
            Ok(_) => {
                self.record_success(observed);
                return;
            }
            Err(err) => err,
        };

        match inner.config.expected_failures.classify(err) {
            Classification::Expected(failure) => {
                inner.sink.info(
                    self.name(),
                    &format!("failure '{}' is an expected failure", failure),
                );
                self.record_failure(&failure);
            }
            Classification::Unexpected(failure) => {
                inner.stats.record_ignored_failure();
                inner.sink.warn(
                    self.name(),
                    &format!("failure '{}' is not an expected failure, passing it on", failure),
                );
            }
            Classification::Unclassifiable => {
                inner.stats.record_ignored_failure();
                inner.sink.warn(
                    self.name(),
                    "failure has no recognizable identity, passing it on",
                );
            }
        }
    }

    fn record_success(&self, observed: Option<State>) {
        let inner = &self.inner;
        inner.stats.record_success();
        inner.hooks.execute_success_hook();

        let written = {
            let _guard = inner.accounting.lock();
            inner.store.write_success(self.name())
        };
        match written {
            Ok(()) => {
                inner
                    .sink
                    .info(self.name(), "call succeeded, state is Closed");
                if matches!(observed, Some(State::Open) | Some(State::HalfOpen)) {
                    inner.hooks.execute_state_transition_hook(State::Closed);
                }
            }
            Err(StoreError::NotFound(_)) => self.ensure_record(),
            Err(err) => self.absorb(err, "recording success"),
        }
    }

    fn record_failure(&self, failure: &str) {
        let inner = &self.inner;
        inner.stats.record_qualifying_failure();
        inner.hooks.execute_failure_hook();

        let tripped = {
            let _guard = inner.accounting.lock();
            let now = inner.clock.now_millis();
            let current = match inner.store.read(self.name()) {
                Ok(current) => current,
                Err(StoreError::NotFound(_)) => {
                    self.ensure_record();
                    self.defaults(now)
                }
                Err(err) => {
                    self.absorb(err, "reading state before recording failure");
                    return;
                }
            };

            let update = current.after_failure(failure, inner.config.failure_threshold, now);
            inner.sink.info(
                self.name(),
                &format!("incrementing failure count: {}", update.failure_count),
            );
            if let Err(err) = inner.store.write_failure(self.name(), &update) {
                self.absorb(err, "recording failure");
                return;
            }
            update.state == State::Open && current.state != State::Open
        };

        if tripped {
            inner.sink.warn(
                self.name(),
                &format!(
                    "failure count reached the threshold of {}, state is Open",
                    inner.config.failure_threshold
                ),
            );
            inner.hooks.execute_state_transition_hook(State::Open);
        }
    }

    fn absorb(&self, err: StoreError, context: &str) {
        self.inner.stats.record_store_error();
        self.inner
            .sink
            .error(self.name(), &format!("{} failed: {}", context, err));
    }
}

// Allow cloning of circuit breakers - cheap because inner state is Arc'd
impl<A, T, E, S> Clone for CircuitBreaker<A, T, E, S> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

// Implement Async support when the feature is enabled
#[cfg(feature = "async")]
impl<A, T, E, S> CircuitBreaker<A, T, E, S>
where
    S: StateStore,
{
    /// Executes an async operation wrapped by the circuit breaker.
    ///
    /// Same contract as [`call`](Self::call). State store access stays
    /// synchronous; the fallback is synchronous as well.
    pub async fn call_async<F, Fut>(&self, op: F, args: A) -> BreakerResult<T, E>
    where
        F: FnOnce(A) -> Fut,
        Fut: std::future::Future<Output = Result<T, E>>,
        E: FailureKind,
    {
        let observed = self.effective_state();
        if observed == Some(State::Open) {
            return self.reject(args);
        }

        self.inner.stats.record_call();
        let result = op(args).await;
        self.after_call(observed, &result);

        result.map_err(BreakerError::Operation)
    }
}
