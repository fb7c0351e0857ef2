//! Configuration management utilities
//!
//! Helpers for reading typed settings out of the environment. Every helper
//! takes a lookup function rather than reading `std::env` directly, so the
//! same parsing code serves the process environment and test fixtures.

use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

/// Errors raised while reading configuration values
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    /// A variable was present but could not be parsed
    #[error("Invalid value for {key}: '{value}' (expected {expected})")]
    InvalidValue {
        key: String,
        value: String,
        expected: &'static str,
    },
}

/// Result type for configuration parsing
pub type Result<T> = std::result::Result<T, ConfigError>;

/// Look up a variable in the process environment
///
/// Blank values are treated as unset.
pub fn process_env(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .filter(|value| !value.trim().is_empty())
}

/// Parse a variable into any `FromStr` type
pub fn parse_var<T, F>(lookup: F, key: &str, expected: &'static str) -> Result<Option<T>>
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|_| ConfigError::InvalidValue {
                key: key.to_string(),
                value: raw,
                expected,
            }),
    }
}

/// Parse a boolean flag (`1/0`, `true/false`, `yes/no`, `on/off`)
pub fn parse_bool<F>(lookup: F, key: &str) -> Result<Option<bool>>
where
    F: Fn(&str) -> Option<String>,
{
    let Some(raw) = lookup(key) else {
        return Ok(None);
    };

    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(Some(true)),
        "0" | "false" | "no" | "off" => Ok(Some(false)),
        _ => Err(ConfigError::InvalidValue {
            key: key.to_string(),
            value: raw,
            expected: "a boolean",
        }),
    }
}

/// Parse a duration expressed in whole seconds
pub fn parse_duration_secs<F>(lookup: F, key: &str) -> Result<Option<Duration>>
where
    F: Fn(&str) -> Option<String>,
{
    Ok(parse_var::<u64, _>(lookup, key, "seconds")?.map(Duration::from_secs))
}

/// Parse a duration expressed in whole milliseconds
pub fn parse_duration_millis<F>(lookup: F, key: &str) -> Result<Option<Duration>>
where
    F: Fn(&str) -> Option<String>,
{
    Ok(parse_var::<u64, _>(lookup, key, "milliseconds")?.map(Duration::from_millis))
}
