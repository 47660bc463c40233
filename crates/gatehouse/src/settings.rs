//! Gate settings
//!
//! Immutable once a gate is built. Values can come from code through
//! [`GateSettings::builder`] or from the environment and config files through
//! [`crate::config`]; both paths run [`GateSettings::validate`].

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, ConfigResult};

/// Default reopen schedule, in seconds
pub const DEFAULT_REOPEN_TIMES_SECS: [u64; 3] = [120, 300, 600];

/// Thresholds, retry count and reopen schedule of a gate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GateSettings {
    /// Calls admitted since the last open before the error-rate check applies
    pub requests_before_tracking: u64,
    /// Failed/processed ratio (0..=1) above which the gate closes
    pub error_threshold_percentage: f64,
    /// Volume-rate threshold; 0 disables the check
    pub volume_threshold_per_minute: u64,
    /// Additional attempts made within a single call while the gate is open
    pub retry_count: u32,
    /// Running volume count at which the batch rolls over; 0 disables rollover
    pub sub_count_reset_limit: u64,
    /// Reopen delays in seconds, indexed by back-off position
    pub re_open_times_in_seconds: Vec<u64>,
    /// Schedule a reopen on every close
    pub re_open_automatically: bool,
}

impl Default for GateSettings {
    fn default() -> Self {
        Self {
            requests_before_tracking: 0,
            error_threshold_percentage: 0.2,
            volume_threshold_per_minute: 0,
            retry_count: 0,
            sub_count_reset_limit: 0,
            re_open_times_in_seconds: DEFAULT_REOPEN_TIMES_SECS.to_vec(),
            re_open_automatically: true,
        }
    }
}

impl GateSettings {
    /// Create a settings builder
    pub fn builder() -> GateSettingsBuilder {
        GateSettingsBuilder::new()
    }

    /// Validate the settings
    pub fn validate(&self) -> ConfigResult<()> {
        let threshold = self.error_threshold_percentage;
        if !threshold.is_finite() || !(0.0..=1.0).contains(&threshold) {
            return Err(ConfigError::invalid(format!(
                "error_threshold_percentage must be within 0..=1, got {threshold}"
            )));
        }

        if self.re_open_automatically && self.re_open_times_in_seconds.is_empty() {
            return Err(ConfigError::invalid(
                "re_open_times_in_seconds must not be empty when re_open_automatically is set",
            ));
        }

        Ok(())
    }

    /// Reopen delay for a back-off position, clamped to the last entry
    pub fn reopen_delay(&self, position: usize) -> Option<Duration> {
        let last = self.re_open_times_in_seconds.len().checked_sub(1)?;
        self.re_open_times_in_seconds.get(position.min(last)).map(|secs| Duration::from_secs(*secs))
    }

    /// Highest back-off position the schedule allows
    pub fn max_backoff_position(&self) -> usize {
        self.re_open_times_in_seconds.len().saturating_sub(1)
    }

    /// Whether the batch rolls over at this running volume count
    pub(crate) fn rolls_over_at(&self, count: u64) -> bool {
        self.sub_count_reset_limit > 0 && count >= self.sub_count_reset_limit
    }
}

/// Builder for [`GateSettings`]
#[derive(Debug, Default)]
pub struct GateSettingsBuilder {
    settings: GateSettings,
}

impl GateSettingsBuilder {
    /// Start from [`GateSettings::default`]
    pub fn new() -> Self {
        Self { settings: GateSettings::default() }
    }

    /// Calls admitted since the last open before the error-rate check applies
    pub fn requests_before_tracking(mut self, requests: u64) -> Self {
        self.settings.requests_before_tracking = requests;
        self
    }

    /// Failed/processed ratio, within `0..=1`, above which the gate closes
    pub fn error_threshold_percentage(mut self, threshold: f64) -> Self {
        self.settings.error_threshold_percentage = threshold;
        self
    }

    /// Volume-rate threshold; 0 disables the check
    pub fn volume_threshold_per_minute(mut self, threshold: u64) -> Self {
        self.settings.volume_threshold_per_minute = threshold;
        self
    }

    /// Additional attempts per call
    pub fn retry_count(mut self, retries: u32) -> Self {
        self.settings.retry_count = retries;
        self
    }

    /// Batch size for the running counters; 0 disables rollover
    pub fn sub_count_reset_limit(mut self, limit: u64) -> Self {
        self.settings.sub_count_reset_limit = limit;
        self
    }

    /// Reopen delays in seconds, one per back-off position
    pub fn re_open_times_in_seconds<I>(mut self, times: I) -> Self
    where
        I: IntoIterator<Item = u64>,
    {
        self.settings.re_open_times_in_seconds = times.into_iter().collect();
        self
    }

    /// Whether each close schedules its own reopen
    pub fn re_open_automatically(mut self, enabled: bool) -> Self {
        self.settings.re_open_automatically = enabled;
        self
    }

    /// Validate and return the settings
    ///
    /// # Errors
    /// Returns `ConfigError::Invalid` if [`GateSettings::validate`] fails.
    pub fn build(self) -> ConfigResult<GateSettings> {
        self.settings.validate()?;
        Ok(self.settings)
    }
}
