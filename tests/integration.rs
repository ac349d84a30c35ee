use statebreaker::{
    BreakerError, BreakerRecord, CircuitBreaker, DurableStateStore, EventSink, FailureKind,
    FileTable, HookRegistry, MemoryTable, MockClock, RecordClient, RecordUpdate, State,
    StoreError,
};
use std::borrow::Cow;
use std::error::Error;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

// Custom error type that implements Error trait
#[derive(Debug, PartialEq)]
enum TestError {
    Timeout,
    Validation(String),
    Opaque,
}

impl fmt::Display for TestError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TestError::Timeout => write!(f, "Test error: timed out"),
            TestError::Validation(field) => write!(f, "Test error: invalid {}", field),
            TestError::Opaque => write!(f, "Test error: ???"),
        }
    }
}

impl Error for TestError {}

impl FailureKind for TestError {
    fn failure_name(&self) -> Option<Cow<'_, str>> {
        match self {
            TestError::Timeout => Some(Cow::Borrowed("TimeoutError")),
            TestError::Validation(_) => Some(Cow::Borrowed("ValidationError")),
            TestError::Opaque => None,
        }
    }
}

/// A table whose every operation fails.
struct UnreachableTable {
    attempts: AtomicUsize,
}

impl RecordClient for UnreachableTable {
    fn get(&self, _: &str, _: &str) -> Result<Option<BreakerRecord>, StoreError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        Err(StoreError::Unavailable("connection refused".into()))
    }

    fn put(&self, _: &str, _: &BreakerRecord) -> Result<(), StoreError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        Err(StoreError::Unavailable("connection refused".into()))
    }

    fn update(&self, _: &str, _: &str, _: &RecordUpdate) -> Result<(), StoreError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        Err(StoreError::Unavailable("connection refused".into()))
    }
}

/// Keeps every event as "level: message".
#[derive(Clone, Default)]
struct RecordingSink {
    events: Arc<parking_lot::Mutex<Vec<String>>>,
}

impl RecordingSink {
    fn contains(&self, level: &str, fragment: &str) -> bool {
        self.events
            .lock()
            .iter()
            .any(|e| e.starts_with(level) && e.contains(fragment))
    }
}

impl EventSink for RecordingSink {
    fn info(&self, _breaker: &str, message: &str) {
        self.events.lock().push(format!("info: {}", message));
    }

    fn warn(&self, _breaker: &str, message: &str) {
        self.events.lock().push(format!("warn: {}", message));
    }

    fn error(&self, _breaker: &str, message: &str) {
        self.events.lock().push(format!("error: {}", message));
    }
}

fn timeout(_: ()) -> Result<String, TestError> {
    Err(TestError::Timeout)
}

fn in_memory(threshold: u32, clock: &MockClock) -> CircuitBreaker<(), String, TestError> {
    CircuitBreaker::builder("integration")
        .failure_threshold(threshold)
        .recovery_timeout(Duration::from_secs(60))
        .clock(clock.clone())
        .build_in_memory()
        .unwrap()
}

#[test]
fn test_opens_after_threshold_and_rejects_without_invoking() {
    let clock = MockClock::new(1_700_000_000_000);
    let breaker = in_memory(3, &clock);

    for _ in 0..3 {
        let result = breaker.call(timeout, ());
        assert!(matches!(result, Err(BreakerError::Operation(TestError::Timeout))));
    }
    assert_eq!(breaker.state(), State::Open);

    let invoked = AtomicUsize::new(0);
    let result = breaker.call(
        |_| {
            invoked.fetch_add(1, Ordering::SeqCst);
            Ok("success".to_string())
        },
        (),
    );
    assert!(matches!(result, Err(BreakerError::Open)));
    assert_eq!(invoked.load(Ordering::SeqCst), 0);
}

#[test]
fn test_recovers_after_timeout() {
    let clock = MockClock::new(1_700_000_000_000);
    let breaker = in_memory(3, &clock);
    for _ in 0..3 {
        let _ = breaker.call(timeout, ());
    }
    assert!(breaker.is_open());

    clock.advance(Duration::from_secs(61));

    let result = breaker.call(|_| Ok("success".to_string()), ());
    assert_eq!(result.unwrap(), "success");
    assert_eq!(breaker.state(), State::Closed);
    assert_eq!(breaker.failure_count().unwrap(), 0);
    assert_eq!(breaker.last_failure().unwrap(), None);
}

#[test]
fn test_open_window_boundaries() {
    let clock = MockClock::new(1_000);
    let breaker = in_memory(1, &clock);
    let _ = breaker.call(timeout, ());

    clock.advance(Duration::from_millis(59_999));
    assert_eq!(breaker.state(), State::Open);
    assert_eq!(breaker.open_remaining().unwrap(), 1);

    clock.advance(Duration::from_millis(1));
    assert_eq!(breaker.state(), State::HalfOpen);
    assert!(breaker.open_remaining().unwrap() <= 0);
}

#[test]
fn test_fallback_serves_calls_while_open() {
    let clock = MockClock::new(0);
    let breaker = CircuitBreaker::<(), String, TestError>::builder("with-fallback")
        .failure_threshold(2)
        .fallback(|_| Ok("fallback".to_string()))
        .clock(clock.clone())
        .build_in_memory()
        .unwrap();
    assert!(breaker.has_fallback());

    let _ = breaker.call(timeout, ());
    let _ = breaker.call(timeout, ());

    let invoked = AtomicUsize::new(0);
    let result = breaker.call(
        |_| {
            invoked.fetch_add(1, Ordering::SeqCst);
            Ok("real".to_string())
        },
        (),
    );
    assert_eq!(result.unwrap(), "fallback");
    assert_eq!(invoked.load(Ordering::SeqCst), 0);

    // Fallback calls do no accounting.
    assert_eq!(breaker.failure_count().unwrap(), 2);
    assert_eq!(breaker.stats().fallbacks, 1);
}

#[test]
fn test_fallback_receives_call_arguments_and_errors_propagate() {
    let breaker = CircuitBreaker::<u32, u32, TestError>::builder("echo")
        .failure_threshold(1)
        .fallback(|n| {
            if n == 0 {
                Err(TestError::Validation("n".into()))
            } else {
                Ok(n + 1000)
            }
        })
        .build_in_memory()
        .unwrap();
    let _ = breaker.call(|_| Err(TestError::Timeout), 1);

    assert_eq!(breaker.call(Ok, 5).unwrap(), 1005);
    let err = breaker.call(Ok, 0).unwrap_err();
    assert!(matches!(err, BreakerError::Operation(TestError::Validation(_))));
}

#[test]
fn test_unexpected_failures_leave_state_alone() {
    let breaker = CircuitBreaker::<(), String, TestError>::builder("validated")
        .failure_threshold(2)
        .expected_failures(["TimeoutError"])
        .build_in_memory()
        .unwrap();
    let before = breaker.stored_state().unwrap();

    for _ in 0..5 {
        let result = breaker.call(|_| Err(TestError::Validation("email".into())), ());
        match result {
            Err(BreakerError::Operation(TestError::Validation(field))) => assert_eq!(field, "email"),
            other => panic!("unexpected result: {:?}", other.map_err(|e| e.to_string())),
        }
        assert_eq!(breaker.state(), State::Closed);
        assert_eq!(breaker.failure_count().unwrap(), 0);
    }

    let after = breaker.stored_state().unwrap();
    assert_eq!(after.opened_at, before.opened_at);
    assert_eq!(breaker.stats().ignored_failures, 5);
}

#[test]
fn test_unclassifiable_failures_pass_through() {
    let breaker = CircuitBreaker::<(), String, TestError>::builder("opaque")
        .failure_threshold(1)
        .build_in_memory()
        .unwrap();

    let result = breaker.call(|_| Err(TestError::Opaque), ());
    assert!(matches!(result, Err(BreakerError::Operation(TestError::Opaque))));
    assert!(breaker.is_closed());
}

#[test]
fn test_store_outage_never_fails_the_call() {
    let table = UnreachableTable {
        attempts: AtomicUsize::new(0),
    };
    let breaker = CircuitBreaker::<(), String, TestError>::builder("outage")
        .failure_threshold(1)
        .build(DurableStateStore::new(table))
        .unwrap();

    let result = breaker.call(|_| Ok("business result".to_string()), ());
    assert_eq!(result.unwrap(), "business result");

    // Failures still reach the caller as themselves, and nothing opens.
    let result = breaker.call(timeout, ());
    assert!(matches!(result, Err(BreakerError::Operation(TestError::Timeout))));
    let result = breaker.call(|_| Ok("still served".to_string()), ());
    assert_eq!(result.unwrap(), "still served");

    assert!(breaker.store().client().attempts.load(Ordering::SeqCst) > 0);
    assert!(breaker.stats().store_errors > 0);
    assert!(breaker.stored_state().is_err());
}

#[test]
fn test_durable_breakers_share_state() {
    let clock = MockClock::new(1_700_000_000_000);
    let table = MemoryTable::new();
    let build = |table: MemoryTable| {
        CircuitBreaker::<(), String, TestError>::builder("shared")
            .failure_threshold(2)
            .clock(clock.clone())
            .build(DurableStateStore::with_table(table, "breakers"))
            .unwrap()
    };
    let process_a = build(table.clone());
    let process_b = build(table.clone());

    let _ = process_a.call(timeout, ());
    let _ = process_b.call(timeout, ());
    assert!(process_a.is_open());
    assert!(matches!(
        process_b.call(|_| Ok("x".into()), ()),
        Err(BreakerError::Open)
    ));

    clock.advance(Duration::from_secs(60));
    assert_eq!(process_b.state(), State::HalfOpen);
    let stored = table.get("breakers", "shared").unwrap().unwrap();
    assert_eq!(stored.cb_state, State::HalfOpen);

    assert_eq!(process_a.call(|_| Ok("ok".into()), ()).unwrap(), "ok");
    assert!(process_b.is_closed());
}

#[test]
fn test_durable_store_recovers_after_outage() {
    let table = MemoryTable::new();
    let breaker = CircuitBreaker::<(), String, TestError>::builder("flaky-table")
        .failure_threshold(2)
        .build(DurableStateStore::new(table.clone()))
        .unwrap();

    table.set_online(false);
    assert_eq!(breaker.call(|_| Ok("a".into()), ()).unwrap(), "a");
    let _ = breaker.call(timeout, ());
    assert!(!breaker.is_open());

    table.set_online(true);
    let _ = breaker.call(timeout, ());
    let _ = breaker.call(timeout, ());
    assert!(breaker.is_open());
}

#[test]
fn test_initialize_keeps_existing_records() {
    let table = MemoryTable::new();
    let first = CircuitBreaker::<(), String, TestError>::builder("idempotent")
        .failure_threshold(5)
        .build(DurableStateStore::new(table.clone()))
        .unwrap();
    let _ = first.call(timeout, ());
    let _ = first.call(timeout, ());

    first.initialize().unwrap();
    first.initialize().unwrap();
    let second = CircuitBreaker::<(), String, TestError>::builder("idempotent")
        .build(DurableStateStore::new(table))
        .unwrap();

    assert_eq!(second.failure_count().unwrap(), 2);
    assert_eq!(second.last_failure().unwrap().as_deref(), Some("TimeoutError"));
}

#[test]
fn test_file_table_persists_across_instances() {
    let dir = tempfile::TempDir::new().unwrap();
    let clock = MockClock::new(1_700_000_000_000);
    {
        let breaker = CircuitBreaker::<(), String, TestError>::builder("on-disk")
            .failure_threshold(1)
            .clock(clock.clone())
            .build(DurableStateStore::new(FileTable::new(dir.path()).unwrap()))
            .unwrap();
        let _ = breaker.call(timeout, ());
        assert!(breaker.is_open());
    }

    let restarted = CircuitBreaker::<(), String, TestError>::builder("on-disk")
        .failure_threshold(1)
        .clock(clock.clone())
        .build(DurableStateStore::new(FileTable::new(dir.path()).unwrap()))
        .unwrap();
    assert!(restarted.is_open());
    assert_eq!(restarted.open_remaining().unwrap(), 60_000);
}

#[test]
fn test_hooks_fire_on_transitions() {
    let clock = MockClock::new(0);
    let events = Arc::new(parking_lot::Mutex::new(Vec::new()));
    let hooks = HookRegistry::new();
    for (name, event) in [("open", 0), ("half-open", 1), ("close", 2), ("rejected", 3)] {
        let events = Arc::clone(&events);
        let record = move || events.lock().push(name);
        match event {
            0 => hooks.set_on_open(record),
            1 => hooks.set_on_half_open(record),
            2 => hooks.set_on_close(record),
            _ => hooks.set_on_rejected(record),
        }
    }

    let breaker = CircuitBreaker::<(), String, TestError>::builder("hooked")
        .failure_threshold(1)
        .hooks(hooks)
        .clock(clock.clone())
        .build_in_memory()
        .unwrap();

    let _ = breaker.call(timeout, ());
    let _ = breaker.call(|_| Ok("x".into()), ());
    clock.advance(Duration::from_secs(60));
    let _ = breaker.call(|_| Ok("x".into()), ());

    assert_eq!(
        *events.lock(),
        vec!["open", "rejected", "half-open", "close"]
    );
}

#[test]
fn test_transition_hooks_can_call_back_into_the_breaker() {
    let slot: Arc<once_cell::sync::OnceCell<CircuitBreaker<(), String, TestError>>> =
        Arc::new(once_cell::sync::OnceCell::new());
    let hooks = HookRegistry::new();
    {
        let slot = Arc::clone(&slot);
        hooks.set_on_open(move || {
            if let Some(breaker) = slot.get() {
                breaker.force_closed().unwrap();
            }
        });
    }
    let breaker = CircuitBreaker::<(), String, TestError>::builder("reentrant")
        .failure_threshold(1)
        .hooks(hooks)
        .build_in_memory()
        .unwrap();
    assert!(slot.set(breaker.clone()).is_ok());

    let (done, finished) = std::sync::mpsc::channel();
    let worker = breaker.clone();
    thread::spawn(move || {
        worker.force_open().unwrap();
        let _ = worker.call(timeout, ());
        let _ = done.send(());
    });

    assert!(finished.recv_timeout(Duration::from_secs(5)).is_ok());
    assert!(breaker.is_closed());
    assert_eq!(breaker.failure_count().unwrap(), 0);
}

#[test]
fn test_durable_record_describes_expected_failures() {
    let table = MemoryTable::new();
    let _narrowed = CircuitBreaker::<(), String, TestError>::builder("narrowed")
        .expected_failures(["TimeoutError"])
        .build(DurableStateStore::new(table.clone()))
        .unwrap();
    let _default = CircuitBreaker::<(), String, TestError>::builder("default")
        .build(DurableStateStore::new(table.clone()))
        .unwrap();

    let narrowed = table.get(statebreaker::DEFAULT_TABLE, "narrowed").unwrap().unwrap();
    assert_eq!(narrowed.expected_exception, "TimeoutError");
    let default = table.get(statebreaker::DEFAULT_TABLE, "default").unwrap().unwrap();
    assert_eq!(default.expected_exception, "*");
}

#[test]
fn test_concurrent_failures_are_all_counted() {
    let breaker = CircuitBreaker::<(), String, TestError>::builder("concurrent")
        .failure_threshold(1_000)
        .build_in_memory()
        .unwrap();

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let breaker = breaker.clone();
            thread::spawn(move || {
                for _ in 0..50 {
                    let _ = breaker.call(timeout, ());
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(breaker.failure_count().unwrap(), 200);
}

#[test]
fn test_events_reach_the_sink() {
    let sink = RecordingSink::default();
    let table = MemoryTable::new();
    let breaker = CircuitBreaker::<(), String, TestError>::builder("logged")
        .failure_threshold(1)
        .event_sink(sink.clone())
        .build(DurableStateStore::new(table.clone()))
        .unwrap();

    let _ = breaker.call(|_| Err(TestError::Opaque), ());
    assert!(sink.contains("warn", "no recognizable identity"));

    let _ = breaker.call(timeout, ());
    assert!(sink.contains("info", "incrementing failure count: 1"));
    assert!(sink.contains("warn", "threshold of 1"));

    table.set_online(false);
    let _ = breaker.call(|_| Ok("x".into()), ());
    assert!(sink.contains("error", "reading state failed"));
}

#[test]
fn test_default_sink_logs_through_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    let breaker = CircuitBreaker::<(), String, TestError>::builder("traced")
        .failure_threshold(1)
        .build_in_memory()
        .unwrap();
    let _ = breaker.call(timeout, ());
    assert!(breaker.is_open());
}

#[cfg(feature = "async")]
mod async_tests {
    use super::*;

    #[tokio::test]
    async fn test_async_circuit_breaker() {
        let clock = MockClock::new(0);
        let breaker = in_memory(2, &clock);

        for _ in 0..3 {
            let result = breaker
                .call_async(|_| async { Ok::<_, TestError>("success".to_string()) }, ())
                .await;
            assert!(result.is_ok());
        }

        for _ in 0..2 {
            let result = breaker
                .call_async(|_| async { Err::<String, _>(TestError::Timeout) }, ())
                .await;
            assert!(matches!(result, Err(BreakerError::Operation(_))));
        }

        let result = breaker
            .call_async(|_| async { Ok::<_, TestError>("success".to_string()) }, ())
            .await;
        assert!(matches!(result, Err(BreakerError::Open)));

        clock.advance(Duration::from_secs(60));
        let result = breaker
            .call_async(|_| async { Ok::<_, TestError>("recovered".to_string()) }, ())
            .await;
        assert_eq!(result.unwrap(), "recovered");
        assert_eq!(breaker.state(), State::Closed);
    }
}
