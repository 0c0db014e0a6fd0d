//! Shared env-var parsing helpers for config resolution.

use std::str::FromStr;

use crate::error::ConfigError;

/// Read an env var, treating unset and empty as absent.
pub(crate) fn optional_env(var: &str) -> Option<String> {
    match std::env::var(var) {
        Ok(val) if !val.trim().is_empty() => Some(val),
        _ => None,
    }
}

/// Read a required env var.
pub(crate) fn required_env(var: &str) -> Result<String, ConfigError> {
    optional_env(var).ok_or_else(|| ConfigError::MissingVar {
        var: var.to_string(),
    })
}

/// Read a string env var with a default.
pub(crate) fn parse_string_env(var: &str, default: &str) -> String {
    optional_env(var).unwrap_or_else(|| default.to_string())
}

/// Read and parse an env var with a default for when it is unset.
pub(crate) fn parse_optional_env<T>(var: &str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match optional_env(var) {
        Some(raw) => raw.parse().map_err(|e| ConfigError::InvalidVar {
            var: var.to_string(),
            reason: format!("{}", e),
        }),
        None => Ok(default),
    }
}
