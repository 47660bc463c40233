//! Settings loader
//!
//! Loads [`GateSettings`] from environment variables or files.
//!
//! ## Environment Variables
//! Every key is prefixed (for example `PAYMENTS_GATE`), missing keys keep
//! their defaults:
//! - `<PREFIX>_REQUESTS_BEFORE_TRACKING`
//! - `<PREFIX>_ERROR_THRESHOLD`: fraction in `0..=1`
//! - `<PREFIX>_VOLUME_THRESHOLD_PER_MINUTE`
//! - `<PREFIX>_RETRY_COUNT`
//! - `<PREFIX>_SUB_COUNT_RESET_LIMIT`
//! - `<PREFIX>_REOPEN_TIMES`: comma separated seconds, e.g. `120,300,600`
//! - `<PREFIX>_REOPEN_AUTOMATICALLY`: `true`/`false`
//!
//! ## Files
//! TOML and JSON are supported, detected by file extension. Field names
//! match [`GateSettings`]:
//!
//! ```toml
//! error_threshold_percentage = 0.05
//! retry_count = 2
//! re_open_times_in_seconds = [120, 300, 600]
//! ```

use std::path::Path;
use std::str::FromStr;

use crate::error::{ConfigError, ConfigResult};
use crate::settings::GateSettings;

/// Supported settings file formats
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SettingsFormat {
    Toml,
    Json,
}

impl SettingsFormat {
    /// Detect the format from a file extension
    pub fn from_path(path: &Path) -> ConfigResult<Self> {
        let extension = path.extension().and_then(|e| e.to_str()).unwrap_or_default();
        match extension {
            "toml" => Ok(Self::Toml),
            "json" => Ok(Self::Json),
            other => Err(ConfigError::UnsupportedFormat { extension: other.to_string() }),
        }
    }
}

/// Load settings from prefixed environment variables
///
/// # Errors
/// Returns `ConfigError::Env` if a variable is present but malformed, or
/// `ConfigError::Invalid` if the resulting settings fail validation.
pub fn load_from_env(prefix: &str) -> ConfigResult<GateSettings> {
    load_with(prefix, |key| std::env::var(key).ok())
}

/// Load settings through an arbitrary key lookup
///
/// `load_from_env` is this function over `std::env::var`; tests and embedding
/// applications can supply their own source.
pub fn load_with<F>(prefix: &str, lookup: F) -> ConfigResult<GateSettings>
where
    F: Fn(&str) -> Option<String>,
{
    let mut settings = GateSettings::default();
    let key = |name: &str| format!("{prefix}_{name}");

    if let Some(value) = parsed(&lookup, &key("REQUESTS_BEFORE_TRACKING"))? {
        settings.requests_before_tracking = value;
    }
    if let Some(value) = parsed(&lookup, &key("ERROR_THRESHOLD"))? {
        settings.error_threshold_percentage = value;
    }
    if let Some(value) = parsed(&lookup, &key("VOLUME_THRESHOLD_PER_MINUTE"))? {
        settings.volume_threshold_per_minute = value;
    }
    if let Some(value) = parsed(&lookup, &key("RETRY_COUNT"))? {
        settings.retry_count = value;
    }
    if let Some(value) = parsed(&lookup, &key("SUB_COUNT_RESET_LIMIT"))? {
        settings.sub_count_reset_limit = value;
    }
    if let Some(raw) = lookup(&key("REOPEN_TIMES")) {
        settings.re_open_times_in_seconds = parse_reopen_times(&key("REOPEN_TIMES"), &raw)?;
    }
    if let Some(value) = parsed(&lookup, &key("REOPEN_AUTOMATICALLY"))? {
        settings.re_open_automatically = value;
    }

    settings.validate()?;
    tracing::debug!(prefix, ?settings, "Gate settings loaded from environment");
    Ok(settings)
}

/// Load settings from a TOML or JSON file
///
/// # Errors
/// Returns `ConfigError` if the file is missing, unreadable, in an
/// unsupported format, malformed, or fails validation.
pub fn load_from_file<P: AsRef<Path>>(path: P) -> ConfigResult<GateSettings> {
    let path = path.as_ref();
    if !path.exists() {
        return Err(ConfigError::NotFound { path: path.display().to_string() });
    }

    let format = SettingsFormat::from_path(path)?;
    tracing::info!(path = %path.display(), ?format, "Loading gate settings from file");

    let contents = std::fs::read_to_string(path)?;
    parse_settings(&contents, format)
}

/// Parse settings from in-memory text
pub fn parse_settings(contents: &str, format: SettingsFormat) -> ConfigResult<GateSettings> {
    let settings: GateSettings = match format {
        SettingsFormat::Toml => toml::from_str(contents)?,
        SettingsFormat::Json => serde_json::from_str(contents)?,
    };
    settings.validate()?;
    Ok(settings)
}

fn parsed<T, F>(lookup: &F, key: &str) -> ConfigResult<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    lookup(key)
        .map(|raw| raw.trim().parse::<T>().map_err(|e| ConfigError::env(key, e.to_string())))
        .transpose()
}

fn parse_reopen_times(key: &str, raw: &str) -> ConfigResult<Vec<u64>> {
    raw.split(',')
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .map(|part| {
            part.parse::<u64>()
                .map_err(|e| ConfigError::env(key, format!("invalid delay '{part}': {e}")))
        })
        .collect()
}
