//! One-shot reopen scheduling
//!
//! A closed gate arms a single delayed task that reopens it. The task runs
//! on a scheduling facility decoupled from callers, so firing never blocks
//! [`Gate::attempt`](crate::Gate::attempt).
//!
//! - [`TokioScheduler`]: spawns a sleeping task on a Tokio runtime; a task
//!   the runtime drops before it fires (shutdown) moves to a thread
//! - [`ThreadScheduler`]: spawns a sleeping OS thread, for gates built
//!   outside any runtime
//! - [`ManualScheduler`]: records tasks so tests can inspect delays and fire
//!   them explicitly
//!
//! There is no cancellation API. Reopen tasks carry the close epoch that
//! armed them and become no-ops once superseded.

use std::fmt;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::runtime::Handle;
use tracing::warn;

/// Deferred work handed to a scheduler
pub type ReopenTask = Box<dyn FnOnce() + Send + 'static>;

/// Runs a task once after a delay
pub trait ReopenScheduler: Send + Sync {
    fn schedule(&self, delay: Duration, task: ReopenTask);
}

/// Scheduler backed by a Tokio runtime
#[derive(Debug, Clone)]
pub struct TokioScheduler {
    handle: Handle,
}

impl TokioScheduler {
    pub fn new(handle: Handle) -> Self {
        Self { handle }
    }

    /// Scheduler on the runtime of the calling context, if there is one
    pub fn current() -> Option<Self> {
        Handle::try_current().ok().map(Self::new)
    }
}

impl ReopenScheduler for TokioScheduler {
    fn schedule(&self, delay: Duration, task: ReopenTask) {
        let pending = PendingReopen { task: Some(task), delay, scheduled_at: Instant::now() };
        // Spawning on a shut-down runtime drops the future, and `pending` with it
        self.handle.spawn(async move {
            tokio::time::sleep(delay).await;
            pending.fire();
        });
    }
}

/// Reopen task owned by a spawned future
///
/// If the future is dropped unfired, the task is handed to a
/// [`ThreadScheduler`] for whatever is left of its delay.
struct PendingReopen {
    task: Option<ReopenTask>,
    delay: Duration,
    scheduled_at: Instant,
}

impl PendingReopen {
    fn fire(mut self) {
        if let Some(task) = self.task.take() {
            task();
        }
    }
}

impl Drop for PendingReopen {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            let remaining = self.delay.saturating_sub(self.scheduled_at.elapsed());
            warn!(
                remaining_ms = u64::try_from(remaining.as_millis()).unwrap_or(u64::MAX),
                "Tokio runtime dropped a pending reopen, moving it to a thread"
            );
            ThreadScheduler.schedule(remaining, task);
        }
    }
}

/// Scheduler that parks a dedicated thread for each task
#[derive(Debug, Clone, Copy, Default)]
pub struct ThreadScheduler;

impl ReopenScheduler for ThreadScheduler {
    fn schedule(&self, delay: Duration, task: ReopenTask) {
        let spawned = std::thread::Builder::new().name("gate-reopen".to_string()).spawn(move || {
            std::thread::sleep(delay);
            task();
        });
        if let Err(error) = spawned {
            tracing::error!(%error, "Failed to spawn gate reopen thread");
        }
    }
}

/// Scheduler for tests: nothing runs until [`ManualScheduler::run_pending`]
#[derive(Default)]
pub struct ManualScheduler {
    pending: Mutex<Vec<(Duration, ReopenTask)>>,
    delays: Mutex<Vec<Duration>>,
}

impl ManualScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every delay ever scheduled, in order
    pub fn delays(&self) -> Vec<Duration> {
        self.delays.lock().clone()
    }

    /// Number of tasks waiting to run
    pub fn pending(&self) -> usize {
        self.pending.lock().len()
    }

    /// Run every waiting task regardless of its delay, returning how many ran
    pub fn run_pending(&self) -> usize {
        let tasks: Vec<_> = std::mem::take(&mut *self.pending.lock());
        let ran = tasks.len();
        for (_, task) in tasks {
            task();
        }
        ran
    }

    /// Drop every waiting task without running it
    pub fn discard_pending(&self) -> usize {
        let tasks: Vec<_> = std::mem::take(&mut *self.pending.lock());
        tasks.len()
    }
}

impl ReopenScheduler for ManualScheduler {
    fn schedule(&self, delay: Duration, task: ReopenTask) {
        self.delays.lock().push(delay);
        self.pending.lock().push((delay, task));
    }
}

impl fmt::Debug for ManualScheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ManualScheduler")
            .field("pending", &self.pending())
            .field("delays", &self.delays())
            .finish()
    }
}
