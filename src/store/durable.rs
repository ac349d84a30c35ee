//! State store backed by an external record table shared between processes.

use serde::{Deserialize, Serialize};

use crate::error::StoreError;
use crate::policy::ExpectedFailures;
use crate::state::{BreakerState, FailureUpdate, State};
use crate::store::StateStore;

/// Default table holding breaker records.
pub const DEFAULT_TABLE: &str = "circuit-breakers";

/// One breaker row as it is persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BreakerRecord {
    /// Primary key.
    pub name: String,
    /// Stored state tag.
    pub cb_state: State,
    /// Milliseconds since the Unix epoch of the last transition into `Open`.
    pub opened: u64,
    /// Qualifying failures since the last success.
    pub failure_count: u32,
    /// Last qualifying failure, empty when there is none.
    #[serde(default)]
    pub last_failure: String,
    /// Threshold the record was created with.
    pub failure_threshold: u32,
    /// Recovery timeout in milliseconds the record was created with.
    pub recovery_timeout: u64,
    /// Description of the failures that count, informational.
    #[serde(default)]
    pub expected_exception: String,
}

impl BreakerRecord {
    /// Builds a record from breaker state.
    pub fn from_state(state: &BreakerState, expected_exception: impl Into<String>) -> Self {
        Self {
            name: state.name.clone(),
            cb_state: state.state,
            opened: state.opened_at,
            failure_count: state.failure_count,
            last_failure: state.last_failure.clone().unwrap_or_default(),
            failure_threshold: state.failure_threshold,
            recovery_timeout: state.recovery_timeout_millis,
            expected_exception: expected_exception.into(),
        }
    }

    /// Converts the record back into breaker state.
    pub fn to_state(&self) -> BreakerState {
        BreakerState {
            name: self.name.clone(),
            state: self.cb_state,
            failure_count: self.failure_count,
            failure_threshold: self.failure_threshold,
            opened_at: self.opened,
            recovery_timeout_millis: self.recovery_timeout,
            last_failure: if self.last_failure.is_empty() {
                None
            } else {
                Some(self.last_failure.clone())
            },
        }
    }

    /// Applies a field-level update. Absent fields are left as stored.
    pub fn apply(&mut self, update: &RecordUpdate) {
        if let Some(state) = update.cb_state {
            self.cb_state = state;
        }
        if let Some(opened) = update.opened {
            self.opened = opened;
        }
        if let Some(count) = update.failure_count {
            self.failure_count = count;
        }
        if let Some(last_failure) = &update.last_failure {
            self.last_failure = last_failure.clone();
        }
    }
}

/// A set of fields to overwrite on an existing record.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordUpdate {
    /// New state tag.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cb_state: Option<State>,
    /// New open timestamp.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub opened: Option<u64>,
    /// New failure count.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_count: Option<u32>,
    /// New last failure; empty string clears it.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_failure: Option<String>,
}

impl From<&FailureUpdate> for RecordUpdate {
    fn from(update: &FailureUpdate) -> Self {
        Self {
            cb_state: Some(update.state),
            opened: Some(update.opened_at),
            failure_count: Some(update.failure_count),
            last_failure: Some(update.last_failure.clone().unwrap_or_default()),
        }
    }
}

/// Client for the external table holding breaker records.
///
/// Each call may fail independently of the breaker; any failure is reported
/// as a [`StoreError`].
pub trait RecordClient: Send + Sync + 'static {
    /// Point read by breaker name. `Ok(None)` when no record exists.
    ///
    /// # Errors
    ///
    /// Returns an error if the table could not be read.
    fn get(&self, table: &str, name: &str) -> Result<Option<BreakerRecord>, StoreError>;

    /// Writes a whole record, replacing any existing one with the same name.
    ///
    /// # Errors
    ///
    /// Returns an error if the table could not be written.
    fn put(&self, table: &str, record: &BreakerRecord) -> Result<(), StoreError>;

    /// Overwrites the given fields of an existing record.
    ///
    /// # Errors
    ///
    /// Returns an error if the record is missing or the table could not be
    /// written.
    fn update(&self, table: &str, name: &str, update: &RecordUpdate) -> Result<(), StoreError>;
}

/// Keeps breaker state in an external table, one record per breaker name.
///
/// Writes overwrite fields with values computed by the breaker. There is no
/// cross-process locking: concurrent writers to the same breaker resolve
/// last-writer-wins.
#[derive(Debug)]
pub struct DurableStateStore<C> {
    client: C,
    table: String,
}

impl<C: RecordClient> DurableStateStore<C> {
    /// Creates a store over [`DEFAULT_TABLE`].
    pub fn new(client: C) -> Self {
        Self::with_table(client, DEFAULT_TABLE)
    }

    /// Creates a store over a named table.
    pub fn with_table(client: C, table: impl Into<String>) -> Self {
        Self {
            client,
            table: table.into(),
        }
    }

    /// The table this store reads and writes.
    pub fn table(&self) -> &str {
        &self.table
    }

    /// The underlying record client.
    pub fn client(&self) -> &C {
        &self.client
    }

    fn update(&self, name: &str, update: RecordUpdate) -> Result<(), StoreError> {
        self.client.update(&self.table, name, &update)
    }
}

impl<C: RecordClient> StateStore for DurableStateStore<C> {
    fn initialize(
        &self,
        defaults: &BreakerState,
        expected: &ExpectedFailures,
    ) -> Result<(), StoreError> {
        // An unreadable record is recreated closed, same as a missing one.
        if let Ok(Some(_)) = self.client.get(&self.table, &defaults.name) {
            return Ok(());
        }
        let record = BreakerRecord::from_state(defaults, expected.describe());
        self.client.put(&self.table, &record)
    }

    fn read(&self, name: &str) -> Result<BreakerState, StoreError> {
        self.client
            .get(&self.table, name)?
            .map(|record| record.to_state())
            .ok_or_else(|| StoreError::NotFound(name.to_string()))
    }

    fn write_failure(&self, name: &str, update: &FailureUpdate) -> Result<(), StoreError> {
        self.update(name, RecordUpdate::from(update))
    }

    fn write_success(&self, name: &str) -> Result<(), StoreError> {
        self.update(
            name,
            RecordUpdate {
                cb_state: Some(State::Closed),
                failure_count: Some(0),
                last_failure: Some(String::new()),
                ..RecordUpdate::default()
            },
        )
    }

    fn write_half_open(&self, name: &str) -> Result<(), StoreError> {
        self.update(
            name,
            RecordUpdate {
                cb_state: Some(State::HalfOpen),
                ..RecordUpdate::default()
            },
        )
    }

    fn write_forced_open(&self, name: &str, opened_at: u64) -> Result<(), StoreError> {
        self.update(
            name,
            RecordUpdate {
                cb_state: Some(State::Open),
                opened: Some(opened_at),
                ..RecordUpdate::default()
            },
        )
    }
}
