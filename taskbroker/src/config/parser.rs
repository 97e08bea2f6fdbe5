//! `Ini` → `ConfigFile`.
//!
//! The only place where INI key names are mapped to struct fields.

use ini::{Ini, Properties};
use std::num::NonZeroUsize;
use std::path::PathBuf;
use std::str::FromStr;

use super::file::ConfigFileError;
use super::settings::ConfigFile;

/// Parses an `Ini` object, overlaying found values on the defaults.
pub(super) fn parse_ini(ini: &Ini) -> Result<ConfigFile, ConfigFileError> {
    let mut config = ConfigFile::default();

    // [executor]
    if let Some(section) = ini.section(Some("executor")) {
        if let Some(v) = section.get("strategy") {
            config.executor.strategy = v.parse().map_err(|_| {
                invalid("executor", "strategy", v, "must be one of: serial, threads, broker")
            })?;
        }
        if let Some(v) = section.get("max_resubmissions") {
            config.executor.max_resubmissions = parse_resubmissions(v)?;
        }
        if let Some(v) = parse_positive(section, "executor", "threads")? {
            config.executor.threads = v;
        }
    }

    // [broker]
    if let Some(section) = ini.section(Some("broker")) {
        if let Some(v) = parse_positive(section, "broker", "expected_workers")? {
            config.broker.expected_workers =
                NonZeroUsize::new(v).unwrap_or(config.broker.expected_workers);
        }
        if let Some(v) = section.get("wait_factor") {
            let factor: f64 = v.trim().parse().map_err(|_| {
                invalid("broker", "wait_factor", v, "must be a number (0 disables timeouts)")
            })?;
            if !factor.is_finite() || factor < 0.0 {
                return Err(invalid(
                    "broker",
                    "wait_factor",
                    v,
                    "must be zero or positive",
                ));
            }
            config.broker.wait_factor = factor;
        }
        if let Some(v) = section.get("min_partial_return_percentage") {
            let percentage: u8 =
                parse_value(v, "broker", "min_partial_return_percentage", "must be 0-100")?;
            if percentage > 100 {
                return Err(invalid(
                    "broker",
                    "min_partial_return_percentage",
                    v,
                    "must be 0-100",
                ));
            }
            config.broker.min_partial_return_percentage = percentage;
        }
        if let Some(v) = parse_positive(section, "broker", "raw_capacity")? {
            config.broker.raw_capacity = v;
        }
        if let Some(v) = parse_positive(section, "broker", "processed_capacity")? {
            config.broker.processed_capacity = v;
        }
        if let Some(v) = parse_positive(section, "broker", "max_ports")? {
            config.broker.max_ports = v;
        }
    }

    // [consumer]
    if let Some(section) = ini.section(Some("consumer")) {
        if let Some(v) = parse_positive(section, "consumer", "threads")? {
            config.consumer.threads = v;
        }
        if let Some(v) = section.get("capable_of_full_return") {
            config.consumer.capable_of_full_return = parse_bool(v).ok_or_else(|| {
                invalid("consumer", "capable_of_full_return", v, "must be true or false")
            })?;
        }
        if let Some(v) = section.get("retrieve_timeout_ms") {
            config.consumer.retrieve_timeout_ms =
                parse_value(v, "consumer", "retrieve_timeout_ms", "must be milliseconds")?;
        }
        if let Some(v) = section.get("submit_timeout_ms") {
            config.consumer.submit_timeout_ms =
                parse_value(v, "consumer", "submit_timeout_ms", "must be milliseconds")?;
        }
    }

    // [logging]
    if let Some(section) = ini.section(Some("logging")) {
        if let Some(v) = section.get("directory") {
            let v = v.trim();
            if !v.is_empty() {
                config.logging.directory = expand_tilde(v);
            }
        }
        if let Some(v) = section.get("file") {
            let v = v.trim();
            if !v.is_empty() {
                config.logging.file = v.to_string();
            }
        }
    }

    Ok(config)
}

fn invalid(section: &str, key: &str, value: &str, reason: &str) -> ConfigFileError {
    ConfigFileError::InvalidValue {
        section: section.to_string(),
        key: key.to_string(),
        value: value.to_string(),
        reason: reason.to_string(),
    }
}

fn parse_value<T: FromStr>(
    value: &str,
    section: &str,
    key: &str,
    reason: &str,
) -> Result<T, ConfigFileError> {
    value
        .trim()
        .parse()
        .map_err(|_| invalid(section, key, value, reason))
}

fn parse_positive(
    section: &Properties,
    name: &str,
    key: &str,
) -> Result<Option<usize>, ConfigFileError> {
    let Some(v) = section.get(key) else {
        return Ok(None);
    };
    match v.trim().parse::<usize>() {
        Ok(n) if n > 0 => Ok(Some(n)),
        _ => Err(invalid(name, key, v, "must be a positive integer")),
    }
}

/// `unlimited`, `none` or empty mean no limit.
fn parse_resubmissions(value: &str) -> Result<Option<u32>, ConfigFileError> {
    match value.trim().to_lowercase().as_str() {
        "" | "unlimited" | "none" => Ok(None),
        v => v.parse().map(Some).map_err(|_| {
            invalid(
                "executor",
                "max_resubmissions",
                value,
                "must be a non-negative integer or 'unlimited'",
            )
        }),
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_lowercase().as_str() {
        "true" | "yes" | "on" | "1" => Some(true),
        "false" | "no" | "off" | "0" => Some(false),
        _ => None,
    }
}

fn expand_tilde(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(path)
}
