//! Error types for the gate and its configuration
//!
//! The gate never surfaces the wrapped call's error verbatim. Both outcomes
//! that stop a caller, an admission rejection and an exhausted retry loop,
//! are reported as [`GateError`] and both carry a [`GateEvent`] snapshot.
//! The original failure is retained in the error limiter and appears in
//! every snapshot as [`FailureRecord`](crate::limiter::FailureRecord).
//!
//! # ErrorClassification
//!
//! All error types in this crate implement [`ErrorClassification`]:
//!
//! - **`is_retryable()`**: Can this operation be retried?
//! - **`severity()`**: How serious is this error? (Info/Warning/Error/Critical)
//! - **`is_critical()`**: Does this require immediate attention?
//! - **`retry_after()`**: Suggested retry delay (if applicable)
//!
//! A rejection is retryable and suggests waiting for the reopen delay armed
//! by the close currently in force.

use std::fmt;
use std::time::Duration;

use thiserror::Error;

use crate::metrics::GateEvent;

/// Result type returned by [`Gate::attempt`](crate::Gate::attempt)
pub type GateResult<T> = Result<T, GateError>;

/// Configuration result type
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Failure channel of a gated call
#[derive(Debug, Clone, Error)]
pub enum GateError {
    /// The gate was closed; the work was not invoked
    #[error("gate '{}' is closed ({}), call rejected", .event.name, .event.reason)]
    Rejected { event: GateEvent },

    /// The work was invoked and every attempt failed
    #[error("gate '{}' call failed after {attempts} attempt(s)", .event.name)]
    Failed { event: GateEvent, attempts: u32 },
}

impl GateError {
    /// The event describing the gate at the moment the call was refused
    pub fn event(&self) -> &GateEvent {
        match self {
            Self::Rejected { event } | Self::Failed { event, .. } => event,
        }
    }

    /// Consume the error and keep only its event
    pub fn into_event(self) -> GateEvent {
        match self {
            Self::Rejected { event } | Self::Failed { event, .. } => event,
        }
    }

    /// Whether the work was never invoked because the gate was closed
    pub fn is_rejected(&self) -> bool {
        matches!(self, Self::Rejected { .. })
    }
}

/// Errors raised while building or loading [`GateSettings`](crate::GateSettings)
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid configuration: {message}")]
    Invalid { message: String },

    #[error("Invalid environment variable {key}: {message}")]
    Env { key: String, message: String },

    #[error("Config file not found: {path}")]
    NotFound { path: String },

    #[error("Unsupported config format: {extension}")]
    UnsupportedFormat { extension: String },

    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid TOML format: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Invalid JSON format: {0}")]
    Json(#[from] serde_json::Error),
}

impl ConfigError {
    /// Create a validation error
    pub fn invalid<S: Into<String>>(message: S) -> Self {
        Self::Invalid { message: message.into() }
    }

    /// Create an error for a malformed environment variable
    pub fn env<K: Into<String>, S: Into<String>>(key: K, message: S) -> Self {
        Self::Env { key: key.into(), message: message.into() }
    }
}

/// Standard classification interface for errors
pub trait ErrorClassification {
    /// Check if this error is retryable
    ///
    /// Retryable errors are transient: a closed gate reopens on its own.
    fn is_retryable(&self) -> bool;

    /// Get the error severity level
    ///
    /// Used for monitoring, alerting, and logging decisions.
    fn severity(&self) -> ErrorSeverity;

    /// Check if this is a critical error requiring immediate attention
    fn is_critical(&self) -> bool;

    /// Get the suggested retry delay if applicable
    fn retry_after(&self) -> Option<Duration>;
}

/// Error severity levels for monitoring and alerting
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ErrorSeverity {
    /// Informational, typically for debugging
    Info,
    /// Warning, should be monitored but not critical
    Warning,
    /// Error, requires attention and action
    Error,
    /// Critical, immediate action required
    Critical,
}

impl fmt::Display for ErrorSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Info => write!(f, "INFO"),
            Self::Warning => write!(f, "WARN"),
            Self::Error => write!(f, "ERROR"),
            Self::Critical => write!(f, "CRITICAL"),
        }
    }
}

impl ErrorClassification for GateError {
    fn is_retryable(&self) -> bool {
        match self {
            Self::Rejected { .. } => true,
            // The gate is still open, the next attempt may succeed
            Self::Failed { event, .. } => event.state.is_open(),
        }
    }

    fn severity(&self) -> ErrorSeverity {
        match self {
            Self::Rejected { .. } => ErrorSeverity::Warning,
            Self::Failed { .. } => ErrorSeverity::Error,
        }
    }

    fn is_critical(&self) -> bool {
        false
    }

    fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::Rejected { event } => event.status.reopen_delay,
            Self::Failed { .. } => None,
        }
    }
}

impl ErrorClassification for ConfigError {
    fn is_retryable(&self) -> bool {
        matches!(self, Self::Io(_))
    }

    fn severity(&self) -> ErrorSeverity {
        ErrorSeverity::Error
    }

    fn is_critical(&self) -> bool {
        false
    }

    fn retry_after(&self) -> Option<Duration> {
        None
    }
}
