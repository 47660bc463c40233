//! Integration tests for the gate
//!
//! Tests the full admission cycle (close on failures, back-off, reopen)
//! against real Tokio timers, manual schedulers and concurrent callers.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use parking_lot::Mutex;

use gatehouse::{
    config, ErrorClassification, Gate, GateError, GateEvent, GateSettings, GateState,
    ManualScheduler, MockClock, Reason, RecordingListener,
};

/// Error returned by the simulated dependency
#[derive(Debug, Clone)]
struct DependencyError {
    message: String,
}

impl std::fmt::Display for DependencyError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for DependencyError {}

fn failing() -> Result<&'static str, DependencyError> {
    Err(DependencyError { message: "dependency unavailable".to_string() })
}

fn succeeding() -> Result<&'static str, DependencyError> {
    Ok("served")
}

/// Validates the full close → back-off → reopen cycle on Tokio timers.
///
/// A gate with a 50% threshold and a one-second reopen schedule trips after
/// two failures, rejects while closed, reopens on its own after the delay,
/// and admits calls again.
///
/// # Test Steps
/// 1. Build a gate inside a paused runtime so it schedules on Tokio
/// 2. Fail twice and confirm the gate closes with `ErrorsHigh`
/// 3. Confirm a call while closed is rejected without running
/// 4. Advance past the one-second delay and confirm the gate reopened
/// 5. Fail then succeed; the warm-up keeps 1/2 from tripping the gate
#[tokio::test(start_paused = true)]
async fn test_close_backoff_reopen_cycle() {
    let listener = Arc::new(RecordingListener::new());
    let settings = GateSettings::builder()
        .requests_before_tracking(2)
        .error_threshold_percentage(0.5)
        .retry_count(0)
        .re_open_times_in_seconds([1])
        .build()
        .expect("valid settings");
    let gate = Gate::builder("catalog")
        .settings(settings)
        .shared_listener(listener.clone())
        .build()
        .expect("gate should build");

    assert!(matches!(gate.attempt(failing), Err(GateError::Failed { .. })));
    let err = gate.attempt(failing).expect_err("second failure should surface");
    assert_eq!(err.event().reason, Reason::ErrorsHigh);
    assert!(gate.is_closed());

    let events = listener.events();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].state, GateState::Closed);
    assert_eq!(events[0].status.reopen_delay, Some(Duration::from_secs(1)));

    let ran = AtomicU32::new(0);
    let rejected = gate.attempt(|| {
        ran.fetch_add(1, Ordering::SeqCst);
        succeeding()
    });
    assert!(rejected.expect_err("closed gate rejects").is_rejected());
    assert_eq!(ran.load(Ordering::SeqCst), 0);

    tokio::time::sleep(Duration::from_millis(1100)).await;
    assert!(gate.is_open());
    assert_eq!(listener.opened(), 1);

    assert!(!gate.attempt(failing).expect_err("failure surfaces").is_rejected());
    assert_eq!(gate.attempt(succeeding).expect("gate admits calls"), "served");
    assert!(gate.is_open());
}

/// Validates that without a warm-up the first failure closes the gate.
///
/// # Test Steps
/// 1. Build a gate with a 50% threshold and no warm-up
/// 2. Fail once; 1/1 exceeds the threshold
/// 3. Confirm the following call is rejected
#[test]
fn test_first_failure_trips_without_warm_up() {
    let scheduler = Arc::new(ManualScheduler::new());
    let settings =
        GateSettings::builder().error_threshold_percentage(0.5).build().expect("valid settings");
    let gate = Gate::builder("search")
        .settings(settings)
        .shared_scheduler(scheduler.clone())
        .build()
        .expect("gate should build");

    let _ = gate.attempt(failing);
    assert!(gate.is_closed());
    assert!(gate.attempt(succeeding).expect_err("closed").is_rejected());
    assert_eq!(scheduler.delays(), vec![Duration::from_secs(120)]);
}

/// Validates sticky back-off over repeated trips.
///
/// # Test Steps
/// 1. Trip the gate and let its timer reopen it, four times over
/// 2. Confirm the delays follow the schedule and stay at the last entry
/// 3. Confirm history holds the closed snapshots, newest first
#[test]
fn test_sticky_backoff_across_trips() {
    let scheduler = Arc::new(ManualScheduler::new());
    let settings = GateSettings::builder()
        .error_threshold_percentage(0.0)
        .re_open_times_in_seconds([10, 20, 40])
        .build()
        .expect("valid settings");
    let gate = Gate::builder("ledger")
        .settings(settings)
        .shared_scheduler(scheduler.clone())
        .build()
        .expect("gate should build");

    for _ in 0..4 {
        let _ = gate.attempt(failing);
        assert!(gate.is_closed());
        assert_eq!(scheduler.run_pending(), 1);
        assert!(gate.is_open());
    }

    let secs: Vec<u64> = scheduler.delays().iter().map(Duration::as_secs).collect();
    assert_eq!(secs, vec![10, 20, 40, 40]);

    let states = gate.states();
    assert_eq!(states.len(), 5);
    assert!(states[..4].iter().all(|s| s.state == GateState::Closed));
    assert_eq!(states[0].backoff_position, 2);
    assert_eq!(states[4].state, GateState::Open);
    assert_eq!(gate.metrics().processed_total, 4);
}

/// Validates that history never grows past its bound.
#[test]
fn test_history_is_bounded() {
    let scheduler = Arc::new(ManualScheduler::new());
    let gate = Gate::builder("bounded")
        .shared_scheduler(scheduler.clone())
        .build()
        .expect("gate should build");

    for _ in 0..25 {
        gate.close(Reason::Maintenance, false);
        gate.open(false);
    }

    assert_eq!(gate.states().len(), gatehouse::STATUS_HISTORY_LIMIT);
}

/// Validates concurrent callers share consistent counters.
///
/// # Test Steps
/// 1. Spawn eight threads, each making 250 successful calls
/// 2. Confirm every call was counted exactly once
#[test]
fn test_concurrent_attempts_are_counted() {
    let gate = Gate::builder("concurrent")
        .scheduler(ManualScheduler::new())
        .build()
        .expect("gate should build");

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let gate = gate.clone();
            thread::spawn(move || {
                for _ in 0..250 {
                    gate.attempt(succeeding).expect("open gate admits calls");
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().expect("worker thread panicked");
    }

    let metrics = gate.metrics();
    assert_eq!(metrics.processed_count, 2000);
    assert_eq!(metrics.processed_total, 2000);
    assert_eq!(metrics.error_count, 0);
}

/// Validates that racing closes arm exactly one reopen.
///
/// # Test Steps
/// 1. Close the gate from many threads at once
/// 2. Confirm one timer was armed and one alert was raised
/// 3. Confirm the back-off advanced exactly once
#[test]
fn test_concurrent_close_arms_one_timer() {
    let scheduler = Arc::new(ManualScheduler::new());
    let listener = Arc::new(RecordingListener::new());
    let gate = Gate::builder("racing")
        .shared_scheduler(scheduler.clone())
        .shared_listener(listener.clone())
        .build()
        .expect("gate should build");

    let handles: Vec<_> = (0..16)
        .map(|ndx| {
            let gate = gate.clone();
            thread::spawn(move || gate.close(Reason::manual(format!("worker {ndx}")), true))
        })
        .collect();
    for handle in handles {
        handle.join().expect("worker thread panicked");
    }

    assert!(gate.is_closed());
    assert_eq!(scheduler.pending(), 1);
    assert_eq!(listener.len(), 1);
    assert_eq!(gate.metrics().backoff_position, 1);
    assert!(matches!(gate.reason(), Reason::ManualClose(_)));
}

/// Validates concurrent async callers through `execute`.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_execute() {
    let gate = Gate::builder("async")
        .scheduler(ManualScheduler::new())
        .build()
        .expect("gate should build");

    let calls = (0..64).map(|ndx| {
        let gate = gate.clone();
        async move {
            gate.execute(|| async move {
                tokio::task::yield_now().await;
                Ok::<_, DependencyError>(ndx)
            })
            .await
        }
    });
    let results = futures::future::join_all(calls).await;

    assert!(results.iter().all(Result::is_ok));
    assert_eq!(gate.metrics().processed_count, 64);
}

/// Validates the volume-rate check against a mock clock.
///
/// # Test Steps
/// 1. Build a gate with a volume threshold of 1 and a tolerant error policy
/// 2. Make two calls within the first minute, then let five minutes pass
/// 3. Confirm 5 whole minutes over 3 calls trips the gate with `VolumeHigh`
#[test]
fn test_volume_rate_closes_gate() {
    let clock = MockClock::new();
    let settings = GateSettings::builder()
        .volume_threshold_per_minute(1)
        .error_threshold_percentage(1.0)
        .build()
        .expect("valid settings");
    let gate = Gate::builder("volume")
        .settings(settings)
        .clock(clock.clone())
        .scheduler(ManualScheduler::new())
        .build()
        .expect("gate should build");

    gate.attempt(succeeding).expect("admitted");
    clock.advance(Duration::from_secs(59));
    gate.attempt(succeeding).expect("admitted");
    assert!(gate.is_open());

    clock.advance_minutes(5);
    gate.attempt(succeeding).expect("call itself succeeds");
    assert!(gate.is_closed());
    assert_eq!(gate.reason(), Reason::VolumeHigh);
}

/// Validates manual control of a gate that never reopens by itself.
///
/// # Test Steps
/// 1. Disable automatic reopening and close for maintenance
/// 2. Confirm the rejection carries the reason and no retry hint
/// 3. Open explicitly and confirm calls flow again
#[test]
fn test_manual_maintenance_window() {
    let scheduler = Arc::new(ManualScheduler::new());
    let settings =
        GateSettings::builder().re_open_automatically(false).build().expect("valid settings");
    let gate = Gate::builder("warehouse")
        .settings(settings)
        .shared_scheduler(scheduler.clone())
        .build()
        .expect("gate should build");

    gate.close(Reason::Maintenance, true);
    let err = gate.attempt(succeeding).expect_err("closed for maintenance");
    assert!(err.is_rejected());
    assert!(err.is_retryable());
    assert_eq!(err.retry_after(), None);
    assert_eq!(err.event().reason, Reason::Maintenance);
    assert_eq!(scheduler.pending(), 0);

    gate.open(true);
    assert_eq!(gate.attempt(succeeding).expect("reopened"), "served");
}

/// Validates that a rejection advertises the armed reopen delay.
#[test]
fn test_rejection_carries_retry_hint() {
    let gate = Gate::builder("hint")
        .scheduler(ManualScheduler::new())
        .build()
        .expect("gate should build");

    gate.close(Reason::ErrorsHigh, false);
    let err = gate.attempt(succeeding).expect_err("closed");
    assert_eq!(err.retry_after(), Some(Duration::from_secs(120)));
    assert!(err.to_string().contains("hint"));
}

/// Validates `open_later` against a live runtime.
#[tokio::test(start_paused = true)]
async fn test_open_later_reopens() {
    let gate = Gate::builder("deferred")
        .settings(GateSettings::builder().re_open_automatically(false).build().expect("valid"))
        .build()
        .expect("gate should build");

    gate.close(Reason::manual("deploy"), false);
    gate.open_later(Duration::from_secs(30), true);

    tokio::time::sleep(Duration::from_secs(29)).await;
    assert!(gate.is_closed());
    tokio::time::sleep(Duration::from_secs(2)).await;
    assert!(gate.is_open());
}

/// Validates that a gate outliving the runtime it was built in still reopens.
///
/// # Test Steps
/// 1. Build a gate inside a short-lived runtime so it schedules on Tokio
/// 2. Drop the runtime, then close the gate with a zero-second schedule
/// 3. Confirm the gate reopens on its own
#[test]
fn test_reopens_after_build_runtime_is_gone() {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .expect("runtime should build");
    let gate = runtime
        .block_on(async {
            Gate::builder("short-lived")
                .settings(
                    GateSettings::builder().re_open_times_in_seconds([0]).build().expect("valid"),
                )
                .build()
        })
        .expect("gate should build");
    drop(runtime);

    gate.close(Reason::ErrorsHigh, false);

    let mut waited = Duration::ZERO;
    while gate.is_closed() && waited < Duration::from_secs(5) {
        thread::sleep(Duration::from_millis(10));
        waited += Duration::from_millis(10);
    }
    assert!(gate.is_open());
}

/// Validates that the last failure is kept and can be inspected.
#[test]
fn test_last_failure_is_inspectable() {
    let gate = Gate::builder("inspect")
        .settings(GateSettings::builder().error_threshold_percentage(1.0).build().expect("valid"))
        .scheduler(ManualScheduler::new())
        .build()
        .expect("gate should build");

    let _ = gate.attempt(failing);
    gate.attempt(succeeding).expect("admitted");

    let last = gate.metrics().last_error.expect("a failure was recorded");
    assert_eq!(last.message(), "dependency unavailable");
    assert!(last.downcast_ref::<DependencyError>().is_some());
}

/// Validates building a gate from environment-style settings.
///
/// # Test Steps
/// 1. Load settings through a map lookup with the `BILLING` prefix
/// 2. Build a gate and confirm retries come from the loaded settings
#[test]
fn test_gate_from_loaded_settings() {
    let vars: HashMap<&str, &str> = HashMap::from([
        ("BILLING_ERROR_THRESHOLD", "0.4"),
        ("BILLING_RETRY_COUNT", "2"),
        ("BILLING_REOPEN_TIMES", "5,15"),
    ]);
    let settings = config::load_with("BILLING", |key| vars.get(key).map(ToString::to_string))
        .expect("settings should load");
    let gate = Gate::builder("billing")
        .settings(settings)
        .scheduler(ManualScheduler::new())
        .build()
        .expect("gate should build");

    let calls = AtomicU32::new(0);
    let _ = gate.attempt(|| {
        calls.fetch_add(1, Ordering::SeqCst);
        failing()
    });

    assert_eq!(calls.load(Ordering::SeqCst), 3);
    assert!(gate.is_closed());
    assert_eq!(gate.metrics().reopen_delay, Some(Duration::from_secs(5)));
}

/// Validates that closure listeners observe the gate and its event.
#[test]
fn test_closure_listener() {
    let seen: Arc<Mutex<Vec<(String, Reason)>>> = Arc::default();
    let sink = Arc::clone(&seen);
    let gate = Gate::builder("closure")
        .scheduler(ManualScheduler::new())
        .listener(move |gate: &Gate, event: &GateEvent| {
            sink.lock().push((gate.name().to_string(), event.reason.clone()));
        })
        .build()
        .expect("gate should build");

    gate.close(Reason::VolumeHigh, true);
    gate.close(Reason::ErrorsHigh, true);

    let seen = seen.lock();
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0], ("closure".to_string(), Reason::VolumeHigh));
}
