//! Engine configuration
//!
//! The only tunable is the base per-operation timeout. Guard reads, actions and
//! ledger mutations run under it; a whole transactional or non-transactional
//! unit runs under twice that value.

use std::time::Duration;
use thiserror::Error;

/// Timeout used when none (or a zero one) is configured
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Environment variable holding the base timeout in whole seconds
pub const TIMEOUT_ENV_VAR: &str = "SCHEMIG_TIMEOUT_SECS";

/// Configuration error type
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid value for field '{field}': '{value}'. Expected: {expected}")]
    InvalidValue {
        field: String,
        value: String,
        expected: String,
    },

    #[error("Environment variable error: {message}")]
    EnvironmentError { message: String },
}

impl ConfigError {
    /// Create an invalid value error
    pub fn invalid_value(
        field: impl Into<String>,
        value: impl Into<String>,
        expected: impl Into<String>,
    ) -> Self {
        Self::InvalidValue {
            field: field.into(),
            value: value.into(),
            expected: expected.into(),
        }
    }

    /// Create an environment error
    pub fn environment_error(message: impl Into<String>) -> Self {
        Self::EnvironmentError {
            message: message.into(),
        }
    }
}

/// Configuration for a migration run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrateConfig {
    /// Base timeout for a single database operation
    pub timeout: Duration,
}

impl Default for MigrateConfig {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_TIMEOUT,
        }
    }
}

impl MigrateConfig {
    /// Create a configuration with the given base timeout
    pub fn new(timeout: Duration) -> Self {
        let mut config = Self { timeout };
        config.ensure_defaults();
        config
    }

    /// Replace unset values with their defaults
    pub fn ensure_defaults(&mut self) {
        if self.timeout.is_zero() {
            self.timeout = DEFAULT_TIMEOUT;
        }
    }

    /// Deadline budget for one whole execution unit (guard, action and ledger mutation)
    pub fn unit_timeout(&self) -> Duration {
        self.timeout * 2
    }

    /// Load configuration from the environment, falling back to defaults
    pub fn from_env() -> Result<Self, ConfigError> {
        match std::env::var(TIMEOUT_ENV_VAR) {
            Ok(raw) => Ok(Self::new(parse_timeout(&raw)?)),
            Err(std::env::VarError::NotPresent) => Ok(Self::default()),
            Err(std::env::VarError::NotUnicode(_)) => Err(ConfigError::environment_error(
                format!("{} is not valid unicode", TIMEOUT_ENV_VAR),
            )),
        }
    }
}

fn parse_timeout(raw: &str) -> Result<Duration, ConfigError> {
    match raw.trim().parse::<u64>() {
        Ok(secs) if secs > 0 => Ok(Duration::from_secs(secs)),
        _ => Err(ConfigError::invalid_value(
            TIMEOUT_ENV_VAR,
            raw,
            "a positive number of seconds",
        )),
    }
}
