//! Hook registry for circuit breaker events.

use crate::state::State;
use parking_lot::RwLock;
use std::sync::Arc;

type HookFn = Arc<dyn Fn() + Send + Sync + 'static>;

/// Optional callbacks run by the breaker on state changes and call outcomes.
///
/// Hooks run synchronously on the calling thread, after the state store has
/// been written.
pub struct HookRegistry {
    on_open: RwLock<Option<HookFn>>,
    on_close: RwLock<Option<HookFn>>,
    on_half_open: RwLock<Option<HookFn>>,
    on_success: RwLock<Option<HookFn>>,
    on_failure: RwLock<Option<HookFn>>,
    on_rejected: RwLock<Option<HookFn>>,
    on_fallback: RwLock<Option<HookFn>>,
}

impl Default for HookRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl HookRegistry {
    /// Creates a new empty hook registry.
    pub fn new() -> Self {
        Self {
            on_open: RwLock::new(None),
            on_close: RwLock::new(None),
            on_half_open: RwLock::new(None),
            on_success: RwLock::new(None),
            on_failure: RwLock::new(None),
            on_rejected: RwLock::new(None),
            on_fallback: RwLock::new(None),
        }
    }

    /// Sets the hook to call when a failure trips the breaker open.
    pub fn set_on_open<F>(&self, f: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        *self.on_open.write() = Some(Arc::new(f));
    }

    /// Sets the hook to call when a success closes a breaker that was not
    /// closed.
    pub fn set_on_close<F>(&self, f: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        *self.on_close.write() = Some(Arc::new(f));
    }

    /// Sets the hook to call when a read finds the recovery window elapsed.
    pub fn set_on_half_open<F>(&self, f: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        *self.on_half_open.write() = Some(Arc::new(f));
    }

    /// Sets the hook to call when a call succeeds.
    pub fn set_on_success<F>(&self, f: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        *self.on_success.write() = Some(Arc::new(f));
    }

    /// Sets the hook to call when a qualifying failure is recorded.
    pub fn set_on_failure<F>(&self, f: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        *self.on_failure.write() = Some(Arc::new(f));
    }

    /// Sets the hook to call when a call is rejected because the breaker is
    /// open.
    pub fn set_on_rejected<F>(&self, f: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        *self.on_rejected.write() = Some(Arc::new(f));
    }

    /// Sets the hook to call when the fallback serves a call.
    pub fn set_on_fallback<F>(&self, f: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        *self.on_fallback.write() = Some(Arc::new(f));
    }

    /// Executes the appropriate hook for a state transition.
    pub fn execute_state_transition_hook(&self, to: State) {
        let slot = match to {
            State::Open => &self.on_open,
            State::Closed => &self.on_close,
            State::HalfOpen => &self.on_half_open,
        };
        Self::run(slot);
    }

    /// Executes the success hook.
    pub fn execute_success_hook(&self) {
        Self::run(&self.on_success);
    }

    /// Executes the failure hook.
    pub fn execute_failure_hook(&self) {
        Self::run(&self.on_failure);
    }

    /// Executes the rejection hook.
    pub fn execute_rejected_hook(&self) {
        Self::run(&self.on_rejected);
    }

    /// Executes the fallback hook.
    pub fn execute_fallback_hook(&self) {
        Self::run(&self.on_fallback);
    }

    fn run(slot: &RwLock<Option<HookFn>>) {
        // Clone out of the lock so a hook can replace hooks without deadlocking.
        let hook = slot.read().clone();
        if let Some(hook) = hook {
            hook();
        }
    }
}
