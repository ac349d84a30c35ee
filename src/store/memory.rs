//! Process-local state store.

use ahash::AHashMap;
use parking_lot::RwLock;

use crate::error::StoreError;
use crate::policy::ExpectedFailures;
use crate::state::{BreakerState, FailureUpdate, State};
use crate::store::StateStore;

/// Keeps breaker state in process memory.
///
/// Nothing is shared with other processes and everything is lost on restart.
/// Operations never fail except with [`StoreError::NotFound`] for a breaker
/// that was never initialized.
#[derive(Debug, Default)]
pub struct InMemoryStateStore {
    states: RwLock<AHashMap<String, BreakerState>>,
}

impl InMemoryStateStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of breakers held by this store.
    pub fn len(&self) -> usize {
        self.states.read().len()
    }

    /// Returns true if no breaker has been initialized.
    pub fn is_empty(&self) -> bool {
        self.states.read().is_empty()
    }

    fn with_state<F>(&self, name: &str, f: F) -> Result<(), StoreError>
    where
        F: FnOnce(&mut BreakerState),
    {
        let mut states = self.states.write();
        let state = states
            .get_mut(name)
            .ok_or_else(|| StoreError::NotFound(name.to_string()))?;
        f(state);
        Ok(())
    }
}

impl StateStore for InMemoryStateStore {
    fn initialize(&self, defaults: &BreakerState, _: &ExpectedFailures) -> Result<(), StoreError> {
        self.states
            .write()
            .entry(defaults.name.clone())
            .or_insert_with(|| defaults.clone());
        Ok(())
    }

    fn read(&self, name: &str) -> Result<BreakerState, StoreError> {
        self.states
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(name.to_string()))
    }

    fn write_failure(&self, name: &str, update: &FailureUpdate) -> Result<(), StoreError> {
        self.with_state(name, |state| state.apply_failure(update))
    }

    fn write_success(&self, name: &str) -> Result<(), StoreError> {
        self.with_state(name, BreakerState::apply_success)
    }

    fn write_half_open(&self, name: &str) -> Result<(), StoreError> {
        self.with_state(name, |state| state.state = State::HalfOpen)
    }

    fn write_forced_open(&self, name: &str, opened_at: u64) -> Result<(), StoreError> {
        self.with_state(name, |state| {
            state.state = State::Open;
            state.opened_at = opened_at;
        })
    }
}
