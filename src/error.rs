//! Error types for the circuit breaker library.

use std::error::Error;
use std::fmt::{self, Display, Formatter};

/// Result type for circuit breaker operations.
pub type BreakerResult<T, E> = Result<T, BreakerError<E>>;

/// Error type returned from [`CircuitBreaker::call`](crate::CircuitBreaker::call).
///
/// Storage problems never show up here: the breaker logs and absorbs them so
/// that a store outage cannot fail the protected operation.
#[derive(Debug)]
pub enum BreakerError<E> {
    /// The circuit is open and no fallback is configured.
    Open,

    /// The operation (or the fallback) failed. The error is passed through
    /// untouched.
    Operation(E),
}

impl<E> BreakerError<E> {
    /// Returns true if the call was rejected because the circuit is open.
    pub fn is_open(&self) -> bool {
        matches!(self, BreakerError::Open)
    }

    /// Returns the operation error, if any.
    pub fn into_operation(self) -> Option<E> {
        match self {
            BreakerError::Open => None,
            BreakerError::Operation(e) => Some(e),
        }
    }
}

impl<E> Display for BreakerError<E>
where
    E: Display,
{
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            BreakerError::Open => write!(f, "Circuit breaker is open"),
            BreakerError::Operation(e) => write!(f, "Operation error: {}", e),
        }
    }
}

impl<E: Error + 'static> Error for BreakerError<E> {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            BreakerError::Open => None,
            BreakerError::Operation(e) => Some(e),
        }
    }
}

/// Errors raised by a [`StateStore`](crate::StateStore) or a record client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// No state exists for the named breaker.
    NotFound(String),

    /// The backing store could not be reached or refused the operation.
    Unavailable(String),

    /// A stored record could not be encoded or decoded.
    Codec(String),
}

impl StoreError {
    /// Returns true for [`StoreError::NotFound`].
    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound(_))
    }
}

impl Display for StoreError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            StoreError::NotFound(name) => write!(f, "No state stored for breaker '{}'", name),
            StoreError::Unavailable(reason) => write!(f, "State store unavailable: {}", reason),
            StoreError::Codec(reason) => write!(f, "Malformed breaker record: {}", reason),
        }
    }
}

impl Error for StoreError {}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        StoreError::Codec(err.to_string())
    }
}

impl From<std::io::Error> for StoreError {
    fn from(err: std::io::Error) -> Self {
        StoreError::Unavailable(err.to_string())
    }
}

/// Invalid breaker configuration, reported once at build time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// The breaker name is empty.
    EmptyName,

    /// The failure threshold is zero.
    ZeroThreshold,

    /// The recovery timeout is zero.
    ZeroRecoveryTimeout,
}

impl Display for ConfigError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::EmptyName => write!(f, "Breaker name must not be empty"),
            ConfigError::ZeroThreshold => write!(f, "Failure threshold must be at least 1"),
            ConfigError::ZeroRecoveryTimeout => {
                write!(f, "Recovery timeout must be greater than zero")
            }
        }
    }
}

impl Error for ConfigError {}
