//! Meeting client configuration.
//!
//! Configuration is loaded from environment variables prefixed with
//! `MEETING_CLIENT_`. Every field has a default, so an empty environment
//! yields a usable configuration.

use crate::media::VideoResolution;
use common::config::ObservabilityConfig;
use std::collections::HashMap;
use std::env;
use std::time::Duration;
use thiserror::Error;

/// Default timeout for every signaling request/response pair (15 seconds).
pub const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 15_000;

/// Default ideal capture resolution.
pub const DEFAULT_IDEAL_WIDTH: u32 = 1280;
pub const DEFAULT_IDEAL_HEIGHT: u32 = 720;

/// Default resolution used when the ideal one cannot be opened.
pub const DEFAULT_FALLBACK_WIDTH: u32 = 640;
pub const DEFAULT_FALLBACK_HEIGHT: u32 = 480;

/// Default session mailbox size.
pub const DEFAULT_COMMAND_BUFFER: usize = 64;

/// Default capacity of the session event broadcast channel.
pub const DEFAULT_EVENT_BUFFER: usize = 256;

/// Default capacity of the inbound signaling frame queue.
pub const DEFAULT_SIGNALING_BUFFER: usize = 256;

/// Meeting client configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Timeout for `transport_connected`, `producer_created` and
    /// `consumer_created` responses (default: 15000 ms).
    pub request_timeout: Duration,

    /// Preferred camera resolution (default: 1280x720).
    pub ideal_resolution: VideoResolution,

    /// Resolution retried once when the ideal one fails (default: 640x480).
    pub fallback_resolution: VideoResolution,

    /// Session command mailbox size (default: 64).
    pub command_buffer: usize,

    /// Session event broadcast capacity (default: 256).
    pub event_buffer: usize,

    /// Inbound signaling queue size (default: 256).
    pub signaling_buffer: usize,

    /// Log settings.
    pub observability: ObservabilityConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_millis(DEFAULT_REQUEST_TIMEOUT_MS),
            ideal_resolution: VideoResolution::new(DEFAULT_IDEAL_WIDTH, DEFAULT_IDEAL_HEIGHT),
            fallback_resolution: VideoResolution::new(
                DEFAULT_FALLBACK_WIDTH,
                DEFAULT_FALLBACK_HEIGHT,
            ),
            command_buffer: DEFAULT_COMMAND_BUFFER,
            event_buffer: DEFAULT_EVENT_BUFFER,
            signaling_buffer: DEFAULT_SIGNALING_BUFFER,
            observability: ObservabilityConfig::default(),
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidValue` if a variable is present but
    /// cannot be parsed or is out of range.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(&env::vars().collect())
    }

    /// Load configuration from a `HashMap` (for testing).
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidValue` if a variable is present but
    /// cannot be parsed or is out of range.
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let request_timeout_ms: u64 = parse_var(
            vars,
            "MEETING_CLIENT_REQUEST_TIMEOUT_MS",
            DEFAULT_REQUEST_TIMEOUT_MS,
        )?;
        if request_timeout_ms == 0 {
            return Err(ConfigError::InvalidValue(
                "MEETING_CLIENT_REQUEST_TIMEOUT_MS must be greater than 0".to_string(),
            ));
        }

        let ideal_resolution = VideoResolution::new(
            parse_var(vars, "MEETING_CLIENT_IDEAL_WIDTH", DEFAULT_IDEAL_WIDTH)?,
            parse_var(vars, "MEETING_CLIENT_IDEAL_HEIGHT", DEFAULT_IDEAL_HEIGHT)?,
        );

        let fallback_resolution = VideoResolution::new(
            parse_var(vars, "MEETING_CLIENT_FALLBACK_WIDTH", DEFAULT_FALLBACK_WIDTH)?,
            parse_var(vars, "MEETING_CLIENT_FALLBACK_HEIGHT", DEFAULT_FALLBACK_HEIGHT)?,
        );

        if fallback_resolution.pixels() > ideal_resolution.pixels() {
            return Err(ConfigError::InvalidValue(format!(
                "fallback resolution {fallback_resolution} exceeds ideal resolution {ideal_resolution}"
            )));
        }

        let command_buffer = parse_buffer(vars, "MEETING_CLIENT_COMMAND_BUFFER", DEFAULT_COMMAND_BUFFER)?;
        let event_buffer = parse_buffer(vars, "MEETING_CLIENT_EVENT_BUFFER", DEFAULT_EVENT_BUFFER)?;
        let signaling_buffer = parse_buffer(
            vars,
            "MEETING_CLIENT_SIGNALING_BUFFER",
            DEFAULT_SIGNALING_BUFFER,
        )?;

        let log_level = vars
            .get("MEETING_CLIENT_LOG_LEVEL")
            .cloned()
            .unwrap_or_else(|| common::config::DEFAULT_LOG_LEVEL.to_string());

        let json_logs = vars
            .get("MEETING_CLIENT_JSON_LOGS")
            .map(|s| matches!(s.to_ascii_lowercase().as_str(), "1" | "true" | "yes"))
            .unwrap_or(false);

        Ok(Config {
            request_timeout: Duration::from_millis(request_timeout_ms),
            ideal_resolution,
            fallback_resolution,
            command_buffer,
            event_buffer,
            signaling_buffer,
            observability: ObservabilityConfig {
                log_level,
                json_logs,
            },
        })
    }
}

fn parse_var<T: std::str::FromStr>(
    vars: &HashMap<String, String>,
    name: &str,
    default: T,
) -> Result<T, ConfigError> {
    match vars.get(name) {
        Some(raw) => raw.trim().parse().map_err(|_| {
            ConfigError::InvalidValue(format!("{name} has invalid value '{raw}'"))
        }),
        None => Ok(default),
    }
}

fn parse_buffer(
    vars: &HashMap<String, String>,
    name: &str,
    default: usize,
) -> Result<usize, ConfigError> {
    let value = parse_var(vars, name, default)?;
    if value == 0 {
        return Err(ConfigError::InvalidValue(format!(
            "{name} must be greater than 0"
        )));
    }
    Ok(value)
}
