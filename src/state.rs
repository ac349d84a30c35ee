//! Circuit breaker state and the pure transition rules over it.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::StoreError;

/// Represents the possible states of a circuit breaker.
///
/// The variant names double as the wire representation used by durable
/// records (`"Closed"`, `"HalfOpen"`, `"Open"`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum State {
    /// Circuit is closed and operations are allowed.
    Closed,

    /// The recovery window has elapsed; operations are allowed and the next
    /// qualifying failure counts against the threshold again.
    HalfOpen,

    /// Circuit is open and operations are rejected.
    Open,
}

impl State {
    /// The wire name of this state.
    pub fn as_str(&self) -> &'static str {
        match self {
            State::Closed => "Closed",
            State::HalfOpen => "HalfOpen",
            State::Open => "Open",
        }
    }
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for State {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Closed" => Ok(State::Closed),
            "HalfOpen" => Ok(State::HalfOpen),
            "Open" => Ok(State::Open),
            other => Err(StoreError::Codec(format!("unknown breaker state '{}'", other))),
        }
    }
}

/// The stored state of one named breaker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BreakerState {
    /// Breaker name, unique within a store.
    pub name: String,
    /// Stored state tag. `Open` is provisional, see [`derive_effective_state`].
    pub state: State,
    /// Qualifying failures since the last success.
    pub failure_count: u32,
    /// Failure count at which the breaker opens.
    pub failure_threshold: u32,
    /// Milliseconds since the Unix epoch of the last transition into `Open`.
    pub opened_at: u64,
    /// How long an open breaker rejects calls before it may be probed.
    pub recovery_timeout_millis: u64,
    /// Identity of the last qualifying failure.
    pub last_failure: Option<String>,
}

impl BreakerState {
    /// A fresh closed state with zeroed counters.
    pub fn closed(
        name: impl Into<String>,
        failure_threshold: u32,
        recovery_timeout_millis: u64,
        now: u64,
    ) -> Self {
        Self {
            name: name.into(),
            state: State::Closed,
            failure_count: 0,
            failure_threshold,
            opened_at: now,
            recovery_timeout_millis,
            last_failure: None,
        }
    }

    /// Milliseconds left until an open breaker may be probed. Zero or negative
    /// once the window has elapsed.
    pub fn open_remaining(&self, now: u64) -> i64 {
        let deadline = self.opened_at.saturating_add(self.recovery_timeout_millis);
        let remaining = i128::from(deadline) - i128::from(now);
        i64::try_from(remaining).unwrap_or(if remaining < 0 { i64::MIN } else { i64::MAX })
    }

    /// Computes the update produced by one more qualifying failure.
    ///
    /// `threshold` is the breaker's configured threshold, which wins over the
    /// informational value kept in the record.
    pub fn after_failure(&self, failure: &str, threshold: u32, now: u64) -> FailureUpdate {
        let failure_count = self.failure_count.saturating_add(1);
        if failure_count >= threshold {
            FailureUpdate {
                failure_count,
                state: State::Open,
                opened_at: now,
                last_failure: Some(failure.to_string()),
            }
        } else {
            FailureUpdate {
                failure_count,
                state: self.state,
                opened_at: self.opened_at,
                last_failure: Some(failure.to_string()),
            }
        }
    }

    /// Applies a failure update in place.
    pub fn apply_failure(&mut self, update: &FailureUpdate) {
        self.failure_count = update.failure_count;
        self.state = update.state;
        self.opened_at = update.opened_at;
        self.last_failure = update.last_failure.clone();
    }

    /// Resets the counters and closes the breaker.
    pub fn apply_success(&mut self) {
        self.state = State::Closed;
        self.failure_count = 0;
        self.last_failure = None;
    }
}

/// Fields overwritten by a qualifying failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailureUpdate {
    /// New failure count, computed from the count that was read.
    pub failure_count: u32,
    /// State after the failure: unchanged, or `Open` once the threshold is hit.
    pub state: State,
    /// Open timestamp; refreshed only when this failure trips the breaker.
    pub opened_at: u64,
    /// Identity of this failure.
    pub last_failure: Option<String>,
}

/// Re-derives the effective state of a stored breaker at `now`.
///
/// A stored `Open` whose recovery window has elapsed is reported as
/// `HalfOpen`. Everything else is returned as stored.
pub fn derive_effective_state(stored: &BreakerState, now: u64) -> State {
    match stored.state {
        State::Open
            if now.saturating_sub(stored.opened_at) >= stored.recovery_timeout_millis =>
        {
            State::HalfOpen
        }
        state => state,
    }
}
