//! The gate orchestrator
//!
//! A [`Gate`] admits calls while it is open. After every admitted call it
//! records the outcome and evaluates its closing policy:
//!
//! 1. **Error rate**: `errors / processed > error_threshold_percentage`
//!    closes with [`Reason::ErrorsHigh`] (skipped while `processed` is below
//!    `requests_before_tracking`).
//! 2. **Volume rate**: when `volume_threshold_per_minute > 0`,
//!    `whole minutes since last state change / processed` above the
//!    threshold closes with [`Reason::VolumeHigh`].
//!
//! # State Transitions
//! ```text
//! Open → Closed: closing policy trips, or close() is called
//! Closed → Open: reopen timer fires, or open() is called
//! ```
//!
//! Each close arms one reopen timer whose delay comes from
//! `re_open_times_in_seconds[backoff_position]`, then advances the position
//! up to the last entry. The position is never reset, so a gate that keeps
//! failing converges on the longest delay.
//!
//! All shared state is held in independent atomics. Transitions are
//! compare-and-swap, so concurrent closes produce exactly one timer and one
//! alert; the reason is last-writer-wins.

use std::error::Error as StdError;
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU64, AtomicU8, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use arc_swap::ArcSwap;
use chrono::{DateTime, Utc};
use tracing::{debug, info, instrument, trace, warn};

use crate::error::{ConfigResult, GateError, GateResult};
use crate::limiter::{ErrorLimiter, FailureRecord, VolumeLimiter};
use crate::listener::GateListener;
use crate::metrics::{GateEvent, GateStatus, StatusHistory};
use crate::scheduler::{ReopenScheduler, ThreadScheduler, TokioScheduler};
use crate::settings::GateSettings;
use crate::state::{GateState, Reason};
use crate::time::{utc_from_millis, whole_minutes_between, Clock, SystemClock};

const NO_REOPEN_DELAY: u64 = u64::MAX;

/// Circuit-breaker style admission gate
///
/// Cheap to clone; clones share the same state.
#[derive(Clone)]
pub struct Gate {
    inner: Arc<GateInner>,
}

struct GateInner {
    name: Arc<str>,
    settings: GateSettings,
    listener: Option<Arc<dyn GateListener>>,
    clock: Arc<dyn Clock>,
    scheduler: Arc<dyn ReopenScheduler>,
    state: AtomicU8,
    last_changed_ms: AtomicU64,
    reason: ArcSwap<Reason>,
    volume: VolumeLimiter,
    errors: ErrorLimiter,
    backoff_position: AtomicUsize,
    admitted: AtomicU64,
    close_epoch: AtomicU64,
    reopen_delay_secs: AtomicU64,
    history: StatusHistory,
}

impl Gate {
    /// Start building a gate
    pub fn builder<S: Into<String>>(name: S) -> GateBuilder {
        GateBuilder::new(name)
    }

    /// Create a gate with the system clock and the default scheduler
    pub fn new<S: Into<String>>(
        name: S,
        settings: GateSettings,
        listener: Option<Arc<dyn GateListener>>,
    ) -> ConfigResult<Self> {
        let mut builder = GateBuilder::new(name).settings(settings);
        builder.listener = listener;
        builder.build()
    }

    /// Name used in events and logs
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Settings the gate was built with
    pub fn settings(&self) -> &GateSettings {
        &self.inner.settings
    }

    /// Current admission state
    pub fn state(&self) -> GateState {
        GateState::from_u8(self.inner.state.load(Ordering::Acquire))
    }

    /// Whether calls are admitted
    pub fn is_open(&self) -> bool {
        self.state().is_open()
    }

    /// Whether calls are rejected
    pub fn is_closed(&self) -> bool {
        self.state().is_closed()
    }

    /// Reason for the current (or last) close
    pub fn reason(&self) -> Reason {
        Reason::clone(&self.inner.reason.load())
    }

    /// Run `work` if the gate is open
    ///
    /// A closed gate rejects immediately without invoking `work`. An open gate
    /// invokes it, retrying up to `retry_count` more times while the gate
    /// stays open, then records the final outcome once and evaluates the
    /// closing policy.
    ///
    /// # Errors
    /// - [`GateError::Rejected`] if the gate is closed
    /// - [`GateError::Failed`] if every attempt failed
    #[instrument(skip_all, fields(gate = %self.inner.name))]
    pub fn attempt<T, E, F>(&self, mut work: F) -> GateResult<T>
    where
        F: FnMut() -> Result<T, E>,
        E: StdError + Send + Sync + 'static,
    {
        if self.is_closed() {
            debug!("Gate closed, rejecting call");
            return Err(self.rejection());
        }

        let max_attempts = self.inner.settings.retry_count.saturating_add(1);
        let mut attempts = 0;
        let outcome = loop {
            attempts += 1;
            match work() {
                Ok(value) => break Ok(value),
                Err(error) if attempts >= max_attempts || self.is_closed() => break Err(error),
                Err(error) => debug!(attempt = attempts, %error, "Gated call failed, retrying"),
            }
        };

        self.conclude(outcome, attempts)
    }

    /// Async twin of [`Gate::attempt`]
    ///
    /// # Errors
    /// Same as [`Gate::attempt`].
    #[instrument(skip_all, fields(gate = %self.inner.name))]
    pub async fn execute<T, E, F, Fut>(&self, mut work: F) -> GateResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: StdError + Send + Sync + 'static,
    {
        if self.is_closed() {
            debug!("Gate closed, rejecting call");
            return Err(self.rejection());
        }

        let max_attempts = self.inner.settings.retry_count.saturating_add(1);
        let mut attempts = 0;
        let outcome = loop {
            attempts += 1;
            match work().await {
                Ok(value) => break Ok(value),
                Err(error) if attempts >= max_attempts || self.is_closed() => break Err(error),
                Err(error) => debug!(attempt = attempts, %error, "Gated call failed, retrying"),
            }
        };

        self.conclude(outcome, attempts)
    }

    /// Open the gate
    ///
    /// Clears the reason and the running counters. Only a real Closed→Open
    /// transition updates the state-change timestamp, records a history
    /// snapshot and alerts. The back-off position is kept.
    pub fn open(&self, alert: bool) {
        let inner = &self.inner;

        let before = self.is_closed().then(|| self.metrics());

        // Cleared before the state flips so admitted calls never see the
        // counters that closed the gate
        inner.reason.store(Arc::new(Reason::NotApplicable));
        inner.volume.reset();
        inner.errors.reset();
        inner.admitted.store(0, Ordering::Release);

        let Some(before) = before else {
            return;
        };
        if self.transition(GateState::Closed, GateState::Open) {
            inner.history.push(before);
            inner.reopen_delay_secs.store(NO_REOPEN_DELAY, Ordering::Release);
            info!(gate = %inner.name, "Gate opened");
            if alert {
                self.alert(GateState::Open);
            }
        }
    }

    /// Close the gate
    ///
    /// Always records `reason`. Only the caller that moves the state
    /// Open→Closed arms a reopen timer, advances the back-off and alerts.
    pub fn close(&self, reason: Reason, alert: bool) {
        let inner = &self.inner;
        inner.reason.store(Arc::new(reason.clone()));

        if !self.transition(GateState::Open, GateState::Closed) {
            debug!(gate = %inner.name, %reason, "Gate already closed");
            return;
        }

        let epoch = inner.close_epoch.fetch_add(1, Ordering::AcqRel) + 1;

        if inner.settings.re_open_automatically {
            let position = inner.backoff_position.load(Ordering::Acquire);
            if let Some(delay) = inner.settings.reopen_delay(position) {
                inner.reopen_delay_secs.store(delay.as_secs(), Ordering::Release);
                self.schedule_reopen(delay, Some(epoch), true);
                self.advance_backoff();
                info!(
                    gate = %inner.name,
                    %reason,
                    delay_secs = delay.as_secs(),
                    backoff_position = position,
                    "Gate closed, reopen scheduled"
                );
            }
        } else {
            info!(gate = %inner.name, %reason, "Gate closed until opened explicitly");
        }

        if alert {
            self.alert(GateState::Closed);
        }
    }

    /// Schedule an unconditional `open(alert)` after `delay`
    pub fn open_later(&self, delay: Duration, alert: bool) {
        debug!(gate = %self.inner.name, delay_secs = delay.as_secs(), "Open scheduled");
        self.schedule_reopen(delay, None, alert);
    }

    /// Fresh snapshot of state and counters
    pub fn metrics(&self) -> GateStatus {
        let inner = &self.inner;
        let reopen_delay = match inner.reopen_delay_secs.load(Ordering::Acquire) {
            NO_REOPEN_DELAY => None,
            secs => Some(Duration::from_secs(secs)),
        };

        GateStatus {
            state: self.state(),
            reason: self.reason(),
            last_changed_at: utc_from_millis(inner.last_changed_ms.load(Ordering::Acquire)),
            taken_at: self.now_utc(),
            generation: inner.volume.generation(),
            processed_count: inner.volume.count(),
            processed_total: inner.volume.total(),
            error_count: inner.errors.count(),
            error_total: inner.errors.total(),
            last_error: inner.errors.last(),
            backoff_position: inner.backoff_position.load(Ordering::Acquire),
            reopen_delay,
        }
    }

    /// Snapshots taken at construction and before every reopen, newest first
    pub fn states(&self) -> Vec<GateStatus> {
        self.inner.history.snapshot()
    }

    fn conclude<T, E>(&self, outcome: Result<T, E>, attempts: u32) -> GateResult<T>
    where
        E: StdError + Send + Sync + 'static,
    {
        match outcome {
            Ok(value) => {
                self.record(None::<E>);
                Ok(value)
            }
            Err(error) => {
                self.record(Some(error));
                Err(GateError::Failed { event: self.event(), attempts })
            }
        }
    }

    fn record<E>(&self, failure: Option<E>)
    where
        E: StdError + Send + Sync + 'static,
    {
        let inner = &self.inner;
        let processed = inner.volume.increment();
        let admitted = inner.admitted.fetch_add(1, Ordering::AcqRel) + 1;

        if let Some(error) = failure {
            let failed = inner.errors.record(FailureRecord::new(error, self.now_utc()));
            trace!(gate = %inner.name, processed, failed, "Failure recorded");
        }

        if self.is_open() {
            if let Some(reason) = self.closing_reason(admitted) {
                warn!(
                    gate = %inner.name,
                    %reason,
                    processed,
                    failed = inner.errors.count(),
                    "Closing policy tripped"
                );
                self.close(reason, true);
            }
        }

        // The batch that tripped the gate is evaluated before it rolls over
        if inner.settings.rolls_over_at(processed) {
            let generation = inner.volume.next();
            inner.errors.reset();
            trace!(gate = %inner.name, generation, "Volume batch rolled over");
        }
    }

    fn closing_reason(&self, admitted: u64) -> Option<Reason> {
        if self.is_error_rate_high(admitted) {
            Some(Reason::ErrorsHigh)
        } else if self.is_volume_high() {
            Some(Reason::VolumeHigh)
        } else {
            None
        }
    }

    // The warm-up counts calls since the last open, across batches
    fn is_error_rate_high(&self, admitted: u64) -> bool {
        let inner = &self.inner;
        let processed = inner.volume.count();
        if processed == 0 || admitted < inner.settings.requests_before_tracking {
            return false;
        }
        let failed = inner.errors.count();
        (failed as f64 / processed as f64) > inner.settings.error_threshold_percentage
    }

    // Minutes per processed call, compared against a per-minute threshold
    fn is_volume_high(&self) -> bool {
        let inner = &self.inner;
        let threshold = inner.settings.volume_threshold_per_minute;
        if threshold == 0 {
            return false;
        }
        let processed = inner.volume.count();
        if processed == 0 {
            return false;
        }
        let minutes = whole_minutes_between(
            inner.last_changed_ms.load(Ordering::Acquire),
            inner.clock.millis_since_epoch(),
        );
        (minutes as f64 / processed as f64) > threshold as f64
    }

    fn transition(&self, from: GateState, to: GateState) -> bool {
        let inner = &self.inner;
        let swapped = inner
            .state
            .compare_exchange(from.as_u8(), to.as_u8(), Ordering::AcqRel, Ordering::Acquire)
            .is_ok();
        if swapped {
            inner.last_changed_ms.store(inner.clock.millis_since_epoch(), Ordering::Release);
        }
        swapped
    }

    fn advance_backoff(&self) {
        let max = self.inner.settings.max_backoff_position();
        // Err only means the position is already at the last entry
        let _ = self.inner.backoff_position.fetch_update(
            Ordering::AcqRel,
            Ordering::Acquire,
            |position| (position < max).then_some(position + 1),
        );
    }

    fn schedule_reopen(&self, delay: Duration, epoch: Option<u64>, alert: bool) {
        let gate: Weak<GateInner> = Arc::downgrade(&self.inner);
        self.inner.scheduler.schedule(
            delay,
            Box::new(move || {
                let Some(inner) = gate.upgrade() else {
                    return;
                };
                let gate = Self { inner };
                match epoch {
                    None => gate.open(alert),
                    Some(epoch) if gate.is_current_close(epoch) => gate.open(alert),
                    Some(epoch) => {
                        debug!(gate = %gate.inner.name, epoch, "Superseded reopen ignored");
                    }
                }
            }),
        );
    }

    fn is_current_close(&self, epoch: u64) -> bool {
        self.is_closed() && self.inner.close_epoch.load(Ordering::Acquire) == epoch
    }

    fn alert(&self, state: GateState) {
        let event = self.event();
        let listener = self.inner.listener.as_deref();

        match state {
            GateState::Open => {
                info!(gate = %self.inner.name, "Gate is open");
                if let Some(listener) = listener {
                    listener.on_open(self, &event);
                }
            }
            GateState::Closed => {
                match &event.reason {
                    Reason::ErrorsHigh | Reason::VolumeHigh => {
                        warn!(gate = %self.inner.name, reason = %event.reason, "Gate tripped");
                    }
                    Reason::Maintenance | Reason::ManualClose(_) => {
                        info!(gate = %self.inner.name, reason = %event.reason, "Gate shut");
                    }
                    // A concurrent open cleared the reason after this close
                    Reason::NotApplicable => {
                        debug!(gate = %self.inner.name, "Gate closed without a reason");
                    }
                }
                if let Some(listener) = listener {
                    listener.on_event(self, &event);
                }
            }
        }
    }

    fn event(&self) -> GateEvent {
        GateEvent::new(Arc::clone(&self.inner.name), self.metrics())
    }

    fn rejection(&self) -> GateError {
        GateError::Rejected { event: self.event() }
    }

    fn now_utc(&self) -> DateTime<Utc> {
        utc_from_millis(self.inner.clock.millis_since_epoch())
    }
}

impl fmt::Debug for Gate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Gate")
            .field("name", &self.inner.name)
            .field("state", &self.state())
            .field("reason", &self.reason())
            .field("processed", &self.inner.volume.count())
            .field("failed", &self.inner.errors.count())
            .field("backoff_position", &self.inner.backoff_position.load(Ordering::Acquire))
            .finish_non_exhaustive()
    }
}

/// Builder for [`Gate`]
pub struct GateBuilder {
    name: String,
    settings: GateSettings,
    listener: Option<Arc<dyn GateListener>>,
    clock: Option<Arc<dyn Clock>>,
    scheduler: Option<Arc<dyn ReopenScheduler>>,
}

impl GateBuilder {
    pub fn new<S: Into<String>>(name: S) -> Self {
        Self {
            name: name.into(),
            settings: GateSettings::default(),
            listener: None,
            clock: None,
            scheduler: None,
        }
    }

    pub fn settings(mut self, settings: GateSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn listener<L: GateListener + 'static>(mut self, listener: L) -> Self {
        self.listener = Some(Arc::new(listener));
        self
    }

    /// Use a listener that is also held elsewhere
    pub fn shared_listener(mut self, listener: Arc<dyn GateListener>) -> Self {
        self.listener = Some(listener);
        self
    }

    /// Set a custom clock (useful for testing)
    pub fn clock<C: Clock>(mut self, clock: C) -> Self {
        self.clock = Some(Arc::new(clock));
        self
    }

    pub fn scheduler<S: ReopenScheduler + 'static>(mut self, scheduler: S) -> Self {
        self.scheduler = Some(Arc::new(scheduler));
        self
    }

    /// Use a scheduler that is also held elsewhere
    pub fn shared_scheduler(mut self, scheduler: Arc<dyn ReopenScheduler>) -> Self {
        self.scheduler = Some(scheduler);
        self
    }

    /// Validate the settings and build the gate, initially open
    ///
    /// Without an explicit scheduler the gate uses the Tokio runtime of the
    /// calling context, or a dedicated thread per reopen outside of one.
    pub fn build(self) -> ConfigResult<Gate> {
        self.settings.validate()?;

        let clock: Arc<dyn Clock> = match self.clock {
            Some(clock) => clock,
            None => Arc::new(SystemClock),
        };
        let scheduler: Arc<dyn ReopenScheduler> = match self.scheduler {
            Some(scheduler) => scheduler,
            None => match TokioScheduler::current() {
                Some(tokio) => Arc::new(tokio),
                None => Arc::new(ThreadScheduler),
            },
        };

        let gate = Gate {
            inner: Arc::new(GateInner {
                name: Arc::from(self.name),
                settings: self.settings,
                listener: self.listener,
                last_changed_ms: AtomicU64::new(clock.millis_since_epoch()),
                clock,
                scheduler,
                state: AtomicU8::new(GateState::Open.as_u8()),
                reason: ArcSwap::from_pointee(Reason::NotApplicable),
                volume: VolumeLimiter::new(),
                errors: ErrorLimiter::new(),
                backoff_position: AtomicUsize::new(0),
                admitted: AtomicU64::new(0),
                close_epoch: AtomicU64::new(0),
                reopen_delay_secs: AtomicU64::new(NO_REOPEN_DELAY),
                history: StatusHistory::new(),
            }),
        };

        gate.inner.history.push(gate.metrics());
        debug!(gate = %gate.inner.name, settings = ?gate.inner.settings, "Gate created");
        Ok(gate)
    }
}

impl fmt::Debug for GateBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GateBuilder")
            .field("name", &self.name)
            .field("settings", &self.settings)
            .field("has_listener", &self.listener.is_some())
            .finish_non_exhaustive()
    }
}
