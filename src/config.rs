//! TOML configuration loader with validation.
//!
//! All fields default to the reference values so the node runs with no
//! config file at all; a file only needs to name the fields it overrides.

use std::path::Path;

use serde::Deserialize;
use thiserror::Error;

pub const DEFAULT_PORT: &str = "/dev/ttyUSB0";
pub const DEFAULT_BAUD_RATE: u32 = 115_200;
/// Fixed inter-cycle period of the arbitration loop.
pub const DEFAULT_CYCLE_TIME_MS: u64 = 1_000;
/// Serial read timeout; short so a silent upstream never stalls a cycle.
pub const DEFAULT_READ_TIMEOUT_MS: u64 = 10;
/// How long the upstream may stay silent before its data counts as stale.
pub const DEFAULT_UPSTREAM_TIMEOUT_MS: u64 = 2_000;
/// Bound on buffered bytes awaiting a line terminator.
pub const DEFAULT_MAX_LINE_LEN: usize = 1_024;

/// Configuration loading/validation error.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("config parse error: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("config validation: {0}")]
    Validation(String),
}

/// Safety node configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SafetyNodeConfig {
    /// Serial device connecting to the upstream compute node.
    #[serde(default = "default_port")]
    pub port: String,
    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,
    /// Arbitration cycle period [ms].
    #[serde(default = "default_cycle_time_ms")]
    pub cycle_time_ms: u64,
    /// Per-cycle serial read timeout [ms]. Must be shorter than the cycle.
    #[serde(default = "default_read_timeout_ms")]
    pub read_timeout_ms: u64,
    /// Upstream silence threshold [ms]; only enforced when
    /// `stale_to_emergency` is set.
    #[serde(default = "default_upstream_timeout_ms")]
    pub upstream_timeout_ms: u64,
    /// Force EMERGENCY when no flag message arrives within
    /// `upstream_timeout_ms`. Off by default: the reference system carries
    /// the timeout but never enforces it.
    #[serde(default)]
    pub stale_to_emergency: bool,
    /// Bound on unterminated receive-buffer growth [bytes].
    #[serde(default = "default_max_line_len")]
    pub max_line_len: usize,
}

fn default_port() -> String {
    DEFAULT_PORT.to_string()
}
fn default_baud_rate() -> u32 {
    DEFAULT_BAUD_RATE
}
fn default_cycle_time_ms() -> u64 {
    DEFAULT_CYCLE_TIME_MS
}
fn default_read_timeout_ms() -> u64 {
    DEFAULT_READ_TIMEOUT_MS
}
fn default_upstream_timeout_ms() -> u64 {
    DEFAULT_UPSTREAM_TIMEOUT_MS
}
fn default_max_line_len() -> usize {
    DEFAULT_MAX_LINE_LEN
}

impl Default for SafetyNodeConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            baud_rate: default_baud_rate(),
            cycle_time_ms: default_cycle_time_ms(),
            read_timeout_ms: default_read_timeout_ms(),
            upstream_timeout_ms: default_upstream_timeout_ms(),
            stale_to_emergency: false,
            max_line_len: default_max_line_len(),
        }
    }
}

impl SafetyNodeConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.cycle_time_ms == 0 {
            return Err(ConfigError::Validation(
                "cycle_time_ms must be > 0".to_string(),
            ));
        }
        if self.baud_rate == 0 {
            return Err(ConfigError::Validation(
                "baud_rate must be > 0".to_string(),
            ));
        }
        if self.max_line_len == 0 {
            return Err(ConfigError::Validation(
                "max_line_len must be > 0".to_string(),
            ));
        }
        if self.read_timeout_ms >= self.cycle_time_ms {
            return Err(ConfigError::Validation(format!(
                "read_timeout_ms ({}) must be shorter than cycle_time_ms ({})",
                self.read_timeout_ms, self.cycle_time_ms
            )));
        }
        Ok(())
    }
}

/// Load and validate the node configuration from a TOML file.
pub fn load_config(path: &Path) -> Result<SafetyNodeConfig, ConfigError> {
    let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.display().to_string(),
        source,
    })?;
    let config: SafetyNodeConfig = toml::from_str(&text)?;
    config.validate()?;
    Ok(config)
}

// ─── Tests ──────────────────────────────────────────────────────────
