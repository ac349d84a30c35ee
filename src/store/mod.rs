//! Pluggable persistence for breaker state.
//!
//! The breaker never holds its own copy of the state. Every decision reads
//! through a [`StateStore`], so a store shared between processes gives every
//! process the same view of a breaker.

mod durable;
mod memory;
mod table;

pub use durable::{BreakerRecord, DurableStateStore, RecordClient, RecordUpdate, DEFAULT_TABLE};
pub use memory::InMemoryStateStore;
pub use table::{FileTable, MemoryTable};

use crate::error::StoreError;
use crate::policy::ExpectedFailures;
use crate::state::{BreakerState, FailureUpdate};

/// Storage backend for breaker state, keyed by breaker name.
pub trait StateStore: Send + Sync + 'static {
    /// Ensures a record exists for `defaults.name`. An existing record is left
    /// untouched. Stores that keep metadata record `expected` alongside the
    /// new state.
    ///
    /// # Errors
    ///
    /// Returns an error if the record could not be written.
    fn initialize(
        &self,
        defaults: &BreakerState,
        expected: &ExpectedFailures,
    ) -> Result<(), StoreError>;

    /// Reads the current state of a breaker.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] for an uninitialized breaker, or a
    /// backend error.
    fn read(&self, name: &str) -> Result<BreakerState, StoreError>;

    /// Overwrites the failure-related fields of a breaker.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend rejected the write.
    fn write_failure(&self, name: &str, update: &FailureUpdate) -> Result<(), StoreError>;

    /// Closes a breaker and clears its failure count and last failure.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend rejected the write.
    fn write_success(&self, name: &str) -> Result<(), StoreError>;

    /// Flips the stored state tag to `HalfOpen`, leaving counters alone.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend rejected the write.
    fn write_half_open(&self, name: &str) -> Result<(), StoreError>;

    /// Forces the stored state tag to `Open` at `opened_at`.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend rejected the write.
    fn write_forced_open(&self, name: &str, opened_at: u64) -> Result<(), StoreError>;
}

impl<S: StateStore> StateStore for std::sync::Arc<S> {
    fn initialize(
        &self,
        defaults: &BreakerState,
        expected: &ExpectedFailures,
    ) -> Result<(), StoreError> {
        (**self).initialize(defaults, expected)
    }

    fn read(&self, name: &str) -> Result<BreakerState, StoreError> {
        (**self).read(name)
    }

    fn write_failure(&self, name: &str, update: &FailureUpdate) -> Result<(), StoreError> {
        (**self).write_failure(name, update)
    }

    fn write_success(&self, name: &str) -> Result<(), StoreError> {
        (**self).write_success(name)
    }

    fn write_half_open(&self, name: &str) -> Result<(), StoreError> {
        (**self).write_half_open(name)
    }

    fn write_forced_open(&self, name: &str, opened_at: u64) -> Result<(), StoreError> {
        (**self).write_forced_open(name, opened_at)
    }
}
