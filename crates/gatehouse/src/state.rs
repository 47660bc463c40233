//! Gate state and close reasons

use std::fmt;

use serde::{Deserialize, Serialize};

/// Admission state of a gate
///
/// `Open` permits calls, `Closed` rejects them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GateState {
    Open,
    Closed,
}

impl GateState {
    pub fn is_open(self) -> bool {
        self == Self::Open
    }

    pub fn is_closed(self) -> bool {
        self == Self::Closed
    }

    pub(crate) const fn as_u8(self) -> u8 {
        match self {
            Self::Open => 0,
            Self::Closed => 1,
        }
    }

    pub(crate) const fn from_u8(raw: u8) -> Self {
        match raw {
            0 => Self::Open,
            _ => Self::Closed,
        }
    }
}

impl fmt::Display for GateState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Open => write!(f, "OPEN"),
            Self::Closed => write!(f, "CLOSED"),
        }
    }
}

/// Why the gate is, or was last, closed
///
/// Exactly one reason is active at a time. It is overwritten by every
/// close and cleared back to [`Reason::NotApplicable`] by every open.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "description", rename_all = "snake_case")]
pub enum Reason {
    /// Never closed, or reopened since
    #[default]
    NotApplicable,
    /// Error ratio crossed the configured threshold
    ErrorsHigh,
    /// Volume-rate check tripped
    VolumeHigh,
    /// Closed for planned maintenance
    Maintenance,
    /// Closed by an operator
    ManualClose(String),
}

impl Reason {
    /// Shorthand for a manual close with a description
    pub fn manual<S: Into<String>>(description: S) -> Self {
        Self::ManualClose(description.into())
    }

    /// Stable tag suitable for log fields and metric labels
    pub fn tag(&self) -> &'static str {
        match self {
            Self::NotApplicable => "not_applicable",
            Self::ErrorsHigh => "errors_high",
            Self::VolumeHigh => "volume_high",
            Self::Maintenance => "maintenance",
            Self::ManualClose(_) => "manual_close",
        }
    }
}

impl fmt::Display for Reason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ManualClose(description) => write!(f, "manual_close: {description}"),
            other => f.write_str(other.tag()),
        }
    }
}
