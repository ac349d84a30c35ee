//! Failure classification: which operation errors count against the breaker.

use std::borrow::Cow;
use std::io;

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

/// Gives an operation error a name the breaker can match on.
///
/// Returning `None` marks the error as unclassifiable. Such errors are logged
/// and passed through without touching breaker state.
pub trait FailureKind {
    /// The identity of this failure, e.g. `"TimeoutError"`.
    fn failure_name(&self) -> Option<Cow<'_, str>>;
}

impl FailureKind for io::Error {
    fn failure_name(&self) -> Option<Cow<'_, str>> {
        Some(Cow::Owned(format!("{:?}", self.kind())))
    }
}

impl FailureKind for String {
    fn failure_name(&self) -> Option<Cow<'_, str>> {
        if self.is_empty() {
            None
        } else {
            Some(Cow::Borrowed(self.as_str()))
        }
    }
}

impl FailureKind for &'static str {
    fn failure_name(&self) -> Option<Cow<'_, str>> {
        if self.is_empty() {
            None
        } else {
            Some(Cow::Borrowed(*self))
        }
    }
}

/// The set of failure identities that count toward the threshold.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExpectedFailures {
    /// Every classifiable failure counts.
    All,
    /// Only failures with one of these names count.
    Only(SmallVec<[String; 4]>),
}

impl Default for ExpectedFailures {
    fn default() -> Self {
        ExpectedFailures::All
    }
}

impl ExpectedFailures {
    /// Builds a narrowed set from failure names.
    pub fn only<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        ExpectedFailures::Only(names.into_iter().map(Into::into).collect())
    }

    /// Returns true if a failure with this name counts.
    pub fn contains(&self, name: &str) -> bool {
        match self {
            ExpectedFailures::All => true,
            ExpectedFailures::Only(names) => names.iter().any(|n| n == name),
        }
    }

    /// Textual form stored alongside durable records.
    pub fn describe(&self) -> String {
        match self {
            ExpectedFailures::All => "*".to_string(),
            ExpectedFailures::Only(names) => names.join(","),
        }
    }

    /// Sorts an operation error into one of the three handling paths.
    pub fn classify<E: FailureKind>(&self, err: &E) -> Classification {
        match err.failure_name() {
            Some(name) if self.contains(&name) => Classification::Expected(name.into_owned()),
            Some(name) => Classification::Unexpected(name.into_owned()),
            None => Classification::Unclassifiable,
        }
    }
}

/// Outcome of classifying an operation error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Classification {
    /// Counts toward the threshold.
    Expected(String),
    /// Has a name, but not one the breaker tracks.
    Unexpected(String),
    /// Has no recognizable identity.
    Unclassifiable,
}
