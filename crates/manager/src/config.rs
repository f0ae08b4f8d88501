//! Manager configuration
//!
//! Defaults can be overridden through `PARLEY_*` environment variables.
//! Values that fail to parse, or are zero, fall back to the default.

use std::time::Duration;

use tracing::warn;

const DEFAULT_IDLE_TIMEOUT_SECS: u64 = 60;
const DEFAULT_LOAD_TIMEOUT_SECS: u64 = 30;
const DEFAULT_COMMAND_CAPACITY: usize = 256;

pub const IDLE_TIMEOUT_ENV: &str = "PARLEY_STREAM_IDLE_TIMEOUT_SECS";
pub const LOAD_TIMEOUT_ENV: &str = "PARLEY_LOAD_TIMEOUT_SECS";
pub const AUTO_RESUME_ENV: &str = "PARLEY_AUTO_RESUME";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManagerConfig {
    /// Longest gap between frames before a stream counts as dead.
    pub idle_timeout: Duration,
    /// Upper bound on a single session load.
    pub load_timeout: Duration,
    /// Per-actor command channel capacity.
    pub command_capacity: usize,
    /// Re-attach automatically when a loaded session is still processing.
    pub auto_resume: bool,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            idle_timeout: Duration::from_secs(DEFAULT_IDLE_TIMEOUT_SECS),
            load_timeout: Duration::from_secs(DEFAULT_LOAD_TIMEOUT_SECS),
            command_capacity: DEFAULT_COMMAND_CAPACITY,
            auto_resume: true,
        }
    }
}

impl ManagerConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        Self {
            idle_timeout: secs_or(&lookup, IDLE_TIMEOUT_ENV, defaults.idle_timeout),
            load_timeout: secs_or(&lookup, LOAD_TIMEOUT_ENV, defaults.load_timeout),
            command_capacity: defaults.command_capacity,
            auto_resume: lookup(AUTO_RESUME_ENV)
                .and_then(|raw| parse_bool(&raw))
                .unwrap_or(defaults.auto_resume),
        }
    }
}

fn secs_or(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: Duration) -> Duration {
    let Some(raw) = lookup(key) else {
        return default;
    };
    match raw.trim().parse::<u64>() {
        Ok(secs) if secs > 0 => Duration::from_secs(secs),
        _ => {
            warn!(
                component = "config",
                event = "config.invalid_value",
                key = %key,
                value = %raw,
                "Ignoring invalid timeout, using default"
            );
            default
        }
    }
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
