//! Env var parsing helpers shared by the config resolvers.

use std::str::FromStr;

use crate::error::ConfigError;

/// Read an env var, distinguishing "unset" from "set but invalid".
pub(crate) fn optional_env(var: &str) -> Result<Option<String>, ConfigError> {
    match std::env::var(var) {
        Ok(v) if v.trim().is_empty() => Ok(None),
        Ok(v) => Ok(Some(v)),
        Err(std::env::VarError::NotPresent) => Ok(None),
        Err(std::env::VarError::NotUnicode(_)) => Err(ConfigError::NotUnicode {
            var: var.to_string(),
        }),
    }
}

/// Read a string env var with a default.
pub(crate) fn parse_string_env(
    var: &str,
    default: impl Into<String>,
) -> Result<String, ConfigError> {
    Ok(optional_env(var)?.unwrap_or_else(|| default.into()))
}

/// Read and parse an env var, with a default for the unset case.
pub(crate) fn parse_optional_env<T: FromStr>(var: &str, default: T) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    match optional_env(var)? {
        Some(raw) => raw.trim().parse().map_err(|e| ConfigError::InvalidValue {
            var: var.to_string(),
            reason: format!("{e}"),
        }),
        None => Ok(default),
    }
}
