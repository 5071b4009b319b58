//! Environment variable parsing shared by [`ManagerConfig::from_env`](crate::config::ManagerConfig::from_env).

use std::fmt::Display;
use std::str::FromStr;

pub(crate) fn parse_bool(value: &str) -> Option<bool> {
    let normalized = value.trim().to_ascii_lowercase();
    match normalized.as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Reads a non-empty variable through `lookup`.
pub(crate) fn read_string<F>(lookup: &F, key: &str) -> Option<String>
where
    F: Fn(&str) -> Option<String>,
{
    lookup(key).filter(|value| !value.trim().is_empty())
}

pub(crate) fn read_bool<F>(lookup: &F, key: &str, default: bool) -> bool
where
    F: Fn(&str) -> Option<String>,
{
    match read_string(lookup, key) {
        Some(raw) => parse_bool(&raw).unwrap_or_else(|| {
            tracing::warn!(key, value = %raw, default, "ignoring unparsable boolean");
            default
        }),
        None => default,
    }
}

pub(crate) fn read_parsed<F, T>(lookup: &F, key: &str, default: T) -> T
where
    F: Fn(&str) -> Option<String>,
    T: FromStr + Display,
    T::Err: Display,
{
    match read_string(lookup, key) {
        Some(raw) => raw.trim().parse::<T>().unwrap_or_else(|err| {
            tracing::warn!(key, value = %raw, default = %default, error = %err, "ignoring invalid value");
            default
        }),
        None => default,
    }
}
