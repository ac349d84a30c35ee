//! Configuration for circuit breakers.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::breaker::{CircuitBreaker, Fallback};
use crate::clock::{duration_millis, Clock, SystemClock};
use crate::error::ConfigError;
use crate::hook::HookRegistry;
use crate::metrics::{EventSink, TracingSink};
use crate::policy::ExpectedFailures;
use crate::store::{InMemoryStateStore, StateStore};

/// Failure threshold used when none is configured.
pub const DEFAULT_FAILURE_THRESHOLD: u32 = 5;

/// Recovery timeout used when none is configured.
pub const DEFAULT_RECOVERY_TIMEOUT: Duration = Duration::from_secs(60);

fn default_failure_threshold() -> u32 {
    DEFAULT_FAILURE_THRESHOLD
}

fn default_recovery_timeout_millis() -> u64 {
    duration_millis(DEFAULT_RECOVERY_TIMEOUT)
}

/// Static settings of one breaker.
///
/// Deserializable so breakers can be declared in configuration files; only
/// `name` is required.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BreakerConfig {
    /// Breaker name, also the key of its state in the store.
    pub name: String,

    /// Qualifying failures needed to open the breaker.
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,

    /// How long an open breaker rejects calls, in milliseconds.
    #[serde(default = "default_recovery_timeout_millis")]
    pub recovery_timeout_millis: u64,

    /// Failures that count toward the threshold.
    #[serde(default)]
    pub expected_failures: ExpectedFailures,
}

impl BreakerConfig {
    /// Creates a configuration with default settings.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            failure_threshold: DEFAULT_FAILURE_THRESHOLD,
            recovery_timeout_millis: default_recovery_timeout_millis(),
            expected_failures: ExpectedFailures::All,
        }
    }

    /// The recovery timeout as a [`Duration`].
    pub fn recovery_timeout(&self) -> Duration {
        Duration::from_millis(self.recovery_timeout_millis)
    }

    /// Checks the settings.
    ///
    /// # Errors
    ///
    /// Returns the first invalid setting found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.name.trim().is_empty() {
            return Err(ConfigError::EmptyName);
        }
        if self.failure_threshold == 0 {
            return Err(ConfigError::ZeroThreshold);
        }
        if self.recovery_timeout_millis == 0 {
            return Err(ConfigError::ZeroRecoveryTimeout);
        }
        Ok(())
    }
}

/// Builder for creating circuit breakers with custom configurations.
///
/// `A` is the argument type handed to the operation (and to the fallback),
/// `T` its output and `E` its error.
pub struct BreakerBuilder<A, T, E> {
    config: BreakerConfig,
    fallback: Option<Fallback<A, T, E>>,
    sink: Arc<dyn EventSink>,
    hooks: Arc<HookRegistry>,
    clock: Arc<dyn Clock>,
}

impl<A, T, E> BreakerBuilder<A, T, E> {
    /// Creates a new builder with default settings.
    pub fn new(name: impl Into<String>) -> Self {
        Self::from_config(BreakerConfig::new(name))
    }

    /// Creates a builder from an existing configuration.
    pub fn from_config(config: BreakerConfig) -> Self {
        Self {
            config,
            fallback: None,
            sink: TracingSink::shared(),
            hooks: Arc::new(HookRegistry::new()),
            clock: Arc::new(SystemClock),
        }
    }

    /// Sets the number of qualifying failures that opens the circuit.
    pub fn failure_threshold(mut self, threshold: u32) -> Self {
        self.config.failure_threshold = threshold;
        self
    }

    /// Sets how long the circuit stays open before calls may probe again.
    pub fn recovery_timeout(mut self, timeout: Duration) -> Self {
        self.config.recovery_timeout_millis = duration_millis(timeout);
        self
    }

    /// Restricts the failures that count toward the threshold to these names.
    pub fn expected_failures<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.config.expected_failures = ExpectedFailures::only(names);
        self
    }

    /// Sets the function that serves calls while the circuit is open.
    ///
    /// It receives the arguments of the rejected call. Its errors are returned
    /// to the caller as operation errors.
    pub fn fallback<F>(mut self, fallback: F) -> Self
    where
        F: Fn(A) -> Result<T, E> + Send + Sync + 'static,
    {
        self.fallback = Some(Arc::new(fallback));
        self
    }

    /// Sets the sink receiving the breaker's log events.
    pub fn event_sink<K: EventSink>(mut self, sink: K) -> Self {
        self.sink = Arc::new(sink);
        self
    }

    /// Sets a hook registry for the circuit breaker.
    pub fn hooks(mut self, hooks: HookRegistry) -> Self {
        self.hooks = Arc::new(hooks);
        self
    }

    /// Sets the clock used for open timestamps and the recovery window.
    pub fn clock<C: Clock>(mut self, clock: C) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    /// The configuration built so far.
    pub fn config(&self) -> &BreakerConfig {
        &self.config
    }

    /// Builds a breaker over `store` and makes sure its record exists.
    ///
    /// A store error while creating the record is logged, not returned: the
    /// record is created again on the next read that misses it.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid.
    pub fn build<S: StateStore>(self, store: S) -> Result<CircuitBreaker<A, T, E, S>, ConfigError> {
        self.config.validate()?;
        let breaker = CircuitBreaker::new(
            self.config,
            store,
            self.fallback,
            self.sink,
            self.hooks,
            self.clock,
        );
        breaker.ensure_record();
        Ok(breaker)
    }

    /// Builds a breaker over a private [`InMemoryStateStore`].
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid.
    pub fn build_in_memory(self) -> Result<CircuitBreaker<A, T, E>, ConfigError> {
        self.build(InMemoryStateStore::new())
    }
}
