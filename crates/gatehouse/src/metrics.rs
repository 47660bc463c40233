//! Read-only snapshots of a gate
//!
//! [`GateStatus`] is the only supported read model for monitoring. Each call
//! to [`Gate::metrics`](crate::Gate::metrics) materialises a fresh value;
//! nothing here is ever mutated in place.

use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Serialize, Serializer};

use crate::limiter::FailureRecord;
use crate::state::{GateState, Reason};

/// Number of status snapshots kept by [`StatusHistory`]
pub const STATUS_HISTORY_LIMIT: usize = 10;

/// Point-in-time view of a gate's state and counters
#[derive(Debug, Clone, Serialize)]
pub struct GateStatus {
    pub state: GateState,
    pub reason: Reason,
    /// When the state last changed
    pub last_changed_at: DateTime<Utc>,
    /// When this snapshot was taken
    pub taken_at: DateTime<Utc>,
    /// Current batch number of the volume counter
    pub generation: u64,
    /// Calls processed in the current batch
    pub processed_count: u64,
    /// Calls processed over the gate's lifetime
    pub processed_total: u64,
    /// Failures in the current batch
    pub error_count: u64,
    /// Failures over the gate's lifetime
    pub error_total: u64,
    pub last_error: Option<Arc<FailureRecord>>,
    /// Index into the reopen schedule used by the next close
    pub backoff_position: usize,
    /// Delay armed by the close currently in force
    #[serde(serialize_with = "serialize_secs")]
    pub reopen_delay: Option<Duration>,
}

impl GateStatus {
    /// Failed/processed ratio of the current batch, 0 when nothing was processed
    pub fn error_ratio(&self) -> f64 {
        if self.processed_count == 0 {
            0.0
        } else {
            self.error_count as f64 / self.processed_count as f64
        }
    }
}

fn serialize_secs<S: Serializer>(value: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error> {
    match value {
        Some(delay) => serializer.serialize_some(&delay.as_secs()),
        None => serializer.serialize_none(),
    }
}

/// Immutable record of a gate at a state change or a refused call
///
/// Used both as the listener payload and as the payload of
/// [`GateError`](crate::GateError).
#[derive(Debug, Clone, Serialize)]
pub struct GateEvent {
    pub name: Arc<str>,
    pub state: GateState,
    pub reason: Reason,
    pub status: GateStatus,
}

impl GateEvent {
    pub(crate) fn new(name: Arc<str>, status: GateStatus) -> Self {
        Self { name, state: status.state, reason: status.reason.clone(), status }
    }
}

impl fmt::Display for GateEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "gate '{}' {} ({}): {}/{} failed, generation {}",
            self.name,
            self.state,
            self.reason,
            self.status.error_count,
            self.status.processed_count,
            self.status.generation
        )
    }
}

/// Bounded, newest-first log of status snapshots
///
/// Only touched when a gate is built or reopens, never on the admission path.
#[derive(Debug, Default)]
pub struct StatusHistory {
    entries: Mutex<VecDeque<GateStatus>>,
}

impl StatusHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, status: GateStatus) {
        let mut entries = self.entries.lock();
        entries.push_front(status);
        entries.truncate(STATUS_HISTORY_LIMIT);
    }

    /// Copy of the retained snapshots, newest first
    pub fn snapshot(&self) -> Vec<GateStatus> {
        self.entries.lock().iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}
