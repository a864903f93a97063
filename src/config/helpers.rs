use std::collections::HashMap;
use std::str::FromStr;

use crate::error::ConfigError;

/// Source of configuration variables.
///
/// The process environment in production; a plain map in tests.
pub trait EnvSource {
    fn var(&self, key: &str) -> Result<Option<String>, ConfigError>;
}

/// Reads from `std::env`, after `dotenvy` has loaded any `.env` file.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessEnv;

impl EnvSource for ProcessEnv {
    fn var(&self, key: &str) -> Result<Option<String>, ConfigError> {
        match std::env::var(key) {
            Ok(value) => Ok(Some(value)),
            Err(std::env::VarError::NotPresent) => Ok(None),
            Err(std::env::VarError::NotUnicode(_)) => Err(ConfigError::NotUnicode {
                key: key.to_string(),
            }),
        }
    }
}

impl EnvSource for HashMap<String, String> {
    fn var(&self, key: &str) -> Result<Option<String>, ConfigError> {
        Ok(self.get(key).cloned())
    }
}

/// Non-empty, trimmed value of `key`, if set.
pub(crate) fn optional_env(env: &impl EnvSource, key: &str) -> Result<Option<String>, ConfigError> {
    Ok(env
        .var(key)?
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty()))
}

pub(crate) fn parse_string_env(
    env: &impl EnvSource,
    key: &str,
    default: impl Into<String>,
) -> Result<String, ConfigError> {
    Ok(optional_env(env, key)?.unwrap_or_else(|| default.into()))
}

pub(crate) fn parse_num_env<T>(env: &impl EnvSource, key: &str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match optional_env(env, key)? {
        None => Ok(default),
        Some(raw) => raw.parse::<T>().map_err(|e| ConfigError::InvalidValue {
            key: key.to_string(),
            message: format!("'{raw}': {e}"),
        }),
    }
}

/// Lenient boolean parsing shared by config and `SET_PREFERENCE:` values.
pub fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

pub(crate) fn parse_csv(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}
