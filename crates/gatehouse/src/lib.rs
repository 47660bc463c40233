//! In-process admission gate for calls to unreliable dependencies.
//!
//! A [`Gate`] wraps calls to a dependency. While open it runs them, counting
//! volume and failures; when the failure ratio or the volume rate crosses its
//! thresholds it closes, rejects callers immediately, and reopens itself on a
//! sticky back-off schedule.
//!
//! ```
//! use gatehouse::{Gate, GateSettings};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let settings = GateSettings::builder()
//!     .error_threshold_percentage(0.5)
//!     .retry_count(1)
//!     .re_open_times_in_seconds([30, 60])
//!     .build()?;
//! let gate = Gate::builder("billing").settings(settings).build()?;
//!
//! let total = gate.attempt(|| "42".parse::<u32>())?;
//! assert_eq!(total, 42);
//! assert_eq!(gate.metrics().processed_count, 1);
//! # Ok(())
//! # }
//! ```
//!
//! # Modules
//!
//! - [`gate`]: the orchestrator and its builder
//! - [`settings`] / [`config`]: thresholds and where they are loaded from
//! - [`limiter`]: the volume and error counters
//! - [`metrics`]: status snapshots and events
//! - [`listener`]: alert hooks
//! - [`scheduler`] / [`time`]: reopen timers and clocks

#![forbid(unsafe_code)]
#![warn(rust_2018_idioms)]
#![warn(clippy::all, clippy::perf, clippy::complexity, clippy::suspicious)]

pub mod config;
pub mod error;
pub mod gate;
pub mod limiter;
pub mod listener;
pub mod metrics;
pub mod scheduler;
pub mod settings;
pub mod state;
pub mod time;

// Re-export commonly used types and traits for convenience
// ------------------------
pub use error::{ConfigError, ConfigResult, ErrorClassification, ErrorSeverity, GateError, GateResult};
pub use gate::{Gate, GateBuilder};
pub use limiter::FailureRecord;
pub use listener::{GateListener, RecordingListener};
pub use metrics::{GateEvent, GateStatus, STATUS_HISTORY_LIMIT};
pub use scheduler::{ManualScheduler, ReopenScheduler, ThreadScheduler, TokioScheduler};
pub use settings::{GateSettings, GateSettingsBuilder, DEFAULT_REOPEN_TIMES_SECS};
pub use state::{GateState, Reason};
pub use time::{Clock, MockClock, SystemClock};
