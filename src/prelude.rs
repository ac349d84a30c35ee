//! Re-exports the types needed to build and call a breaker.
//!
//! # Example
//! ```rust,no_run
//! use statebreaker::prelude::*;
//! ```

pub use crate::{
    BreakerError, BreakerResult, CircuitBreaker, DurableStateStore, ExpectedFailures,
    FailureKind, InMemoryStateStore, RecordClient, State, StateStore,
};
