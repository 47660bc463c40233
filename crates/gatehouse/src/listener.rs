//! Alert hook for gate state changes
//!
//! A listener runs synchronously on the thread that detected the state
//! change. It must not block materially, and it should not call
//! [`Gate::attempt`](crate::Gate::attempt) on the same gate.
//!
//! Any `Fn(&Gate, &GateEvent) + Send + Sync` closure is a listener for close
//! events:
//!
//! ```
//! use gatehouse::{Gate, GateEvent, GateSettings};
//!
//! # fn main() -> Result<(), gatehouse::ConfigError> {
//! let gate = Gate::builder("inventory")
//!     .settings(GateSettings::default())
//!     .listener(|gate: &Gate, event: &GateEvent| {
//!         tracing::warn!(gate = gate.name(), reason = %event.reason, "gate closed");
//!     })
//!     .build()?;
//! assert!(gate.is_open());
//! # Ok(())
//! # }
//! ```

use std::fmt;

use parking_lot::Mutex;

use crate::gate::Gate;
use crate::metrics::GateEvent;

/// Receives alerts from a gate
pub trait GateListener: Send + Sync {
    /// Called when the gate closes
    fn on_event(&self, gate: &Gate, event: &GateEvent);

    /// Called when the gate reopens; open alerts are already logged
    fn on_open(&self, _gate: &Gate, _event: &GateEvent) {}
}

impl<F> GateListener for F
where
    F: Fn(&Gate, &GateEvent) + Send + Sync,
{
    fn on_event(&self, gate: &Gate, event: &GateEvent) {
        self(gate, event);
    }
}

/// Listener that keeps every close event and counts reopens
#[derive(Default)]
pub struct RecordingListener {
    events: Mutex<Vec<GateEvent>>,
    opened: Mutex<Vec<GateEvent>>,
}

impl RecordingListener {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<GateEvent> {
        self.events.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.events.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.lock().is_empty()
    }

    /// Number of open alerts received
    pub fn opened(&self) -> usize {
        self.opened.lock().len()
    }
}

impl GateListener for RecordingListener {
    fn on_event(&self, _gate: &Gate, event: &GateEvent) {
        self.events.lock().push(event.clone());
    }

    fn on_open(&self, _gate: &Gate, event: &GateEvent) {
        self.opened.lock().push(event.clone());
    }
}

impl fmt::Debug for RecordingListener {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RecordingListener")
            .field("events", &self.len())
            .field("opened", &self.opened())
            .finish()
    }
}
