//! # statebreaker
//!
//! A circuit breaker whose state lives in a pluggable store.
//!
//! The breaker wraps a fallible operation, counts the failures you care about,
//! opens once a threshold is reached and lets calls through again after a
//! recovery timeout. Its state (failure count, open timestamp, state tag) is
//! never cached locally: every decision reads it through a [`StateStore`].
//!
//! - [`InMemoryStateStore`] keeps state in process memory. Zero I/O, but each
//!   process has its own breaker and state is lost on restart.
//! - [`DurableStateStore`] keeps one record per breaker name in an external
//!   table reached through a [`RecordClient`]. Every process pointing at the
//!   same table shares the breaker, with last-writer-wins consistency.
//!
//! ## States
//!
//! - **Closed**: calls pass through.
//! - **Open**: calls are rejected, or served by the fallback, without invoking
//!   the operation.
//! - **Half-Open**: the recovery timeout of an open breaker has elapsed. This
//!   is derived lazily when the state is read, and written back to the store.
//!   Calls pass through as when closed; the next qualifying failure reopens
//!   the breaker and a success closes it.
//!
//! Errors from the store are logged and absorbed. A store outage never fails
//! the protected call; an unreadable breaker is treated as closed.
//!
//! ## Basic Usage
//!
//! ```rust
//! use statebreaker::{BreakerError, CircuitBreaker};
//! use std::time::Duration;
//!
//! let breaker = CircuitBreaker::<u32, String, &'static str>::builder("inventory")
//!     .failure_threshold(3) // Open after 3 qualifying failures
//!     .recovery_timeout(Duration::from_secs(30)) // Probe again after 30 seconds
//!     .expected_failures(["TimeoutError"]) // Only timeouts count
//!     .build_in_memory()
//!     .expect("valid configuration");
//!
//! match breaker.call(|sku| Ok(format!("sku {} in stock", sku)), 42) {
//!     Ok(result) => println!("Call succeeded: {}", result),
//!     Err(BreakerError::Open) => println!("Circuit is open, call was prevented"),
//!     Err(BreakerError::Operation(err)) => println!("Call failed: {}", err),
//! }
//! ```
//!
//! ## Shared State
//!
//! ```rust
//! use statebreaker::{CircuitBreaker, DurableStateStore, MemoryTable};
//!
//! // Any RecordClient works here; MemoryTable stands in for an external table.
//! let table = MemoryTable::new();
//! let first = CircuitBreaker::<(), (), &'static str>::builder("billing")
//!     .failure_threshold(1)
//!     .build(DurableStateStore::new(table.clone()))
//!     .unwrap();
//! let second = CircuitBreaker::<(), (), &'static str>::builder("billing")
//!     .build(DurableStateStore::new(table))
//!     .unwrap();
//!
//! let _ = first.call(|_| Err("ConnectError"), ());
//! assert!(second.is_open());
//! ```
//!
//! ## Features
//!
//! - `async` - `call_async` for operations returning futures

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg))]

mod breaker;
mod clock;
mod config;
mod error;
mod hook;
mod metrics;
mod policy;
pub mod prelude;
mod state;
mod store;

// Re-exports
pub use breaker::{CircuitBreaker, Fallback};
pub use clock::{Clock, MockClock, SystemClock};
pub use config::{BreakerBuilder, BreakerConfig, DEFAULT_FAILURE_THRESHOLD, DEFAULT_RECOVERY_TIMEOUT};
pub use error::{BreakerError, BreakerResult, ConfigError, StoreError};
pub use hook::HookRegistry;
pub use metrics::{BreakerStats, EventSink, NullSink, StatsSnapshot, TracingSink};
pub use policy::{Classification, ExpectedFailures, FailureKind};
pub use state::{derive_effective_state, BreakerState, FailureUpdate, State};
pub use store::{
    BreakerRecord, DurableStateStore, FileTable, InMemoryStateStore, MemoryTable, RecordClient,
    RecordUpdate, StateStore, DEFAULT_TABLE,
};
