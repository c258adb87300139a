//! Relay configuration parsing and validation.

use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::relay::lifecycle::RetryPolicy;
use crate::{AppError, Result};

/// Connection timing knobs, all in milliseconds.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case", default)]
pub struct TimingConfig {
    /// Upper bound on a single connection attempt.
    pub connect_timeout_ms: u64,
    /// Immediate retries before escalating to the slower reconnect loop.
    pub initial_retry_attempts: u32,
    /// Delay between immediate retries.
    pub initial_retry_delay_ms: u64,
    /// Delay before each attempt on the reconnect loop.
    pub reconnect_delay_ms: u64,
    /// Pause after a reconnect before traffic resumes.
    pub warmup_delay_ms: u64,
    /// Failed reconnect attempts tolerated before giving up; 0 means never.
    pub max_reconnect_attempts: u32,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            connect_timeout_ms: 2_000,
            initial_retry_attempts: 3,
            initial_retry_delay_ms: 1_000,
            reconnect_delay_ms: 5_000,
            warmup_delay_ms: 1_500,
            max_reconnect_attempts: 0,
        }
    }
}

fn default_host() -> String {
    "127.0.0.1".into()
}

fn default_port() -> u16 {
    6005
}

fn default_staging_capacity() -> usize {
    1024
}

fn default_true() -> bool {
    true
}

/// Relay configuration parsed from an optional `config.toml`.
///
/// Every field has a default, so an empty file (or no file at all) yields a
/// usable configuration.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct RelayConfig {
    /// Peer host name or address.
    #[serde(default = "default_host")]
    pub host: String,
    /// Peer TCP port.
    #[serde(default = "default_port")]
    pub port: u16,
    /// Maximum number of outbound frames held while the peer is unavailable.
    #[serde(default = "default_staging_capacity")]
    pub staging_capacity: usize,
    /// Rewrite `file:` URIs in both directions.
    #[serde(default = "default_true")]
    pub normalize_uris: bool,
    /// Connection timing.
    #[serde(default)]
    pub timing: TimingConfig,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            staging_capacity: default_staging_capacity(),
            normalize_uris: true,
            timing: TimingConfig::default(),
        }
    }
}

impl RelayConfig {
    /// Load and validate configuration from a TOML file path.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the file cannot be read or contains
    /// invalid TOML, or if validation fails.
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .map_err(|err| AppError::Config(format!("failed to read config: {err}")))?;
        Self::from_toml_str(&raw)
    }

    /// Parse configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if parsing or validation fails.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Apply command-line overrides on top of file values.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the resulting configuration is invalid.
    pub fn with_overrides(mut self, host: Option<String>, port: Option<u16>) -> Result<Self> {
        if let Some(host) = host {
            self.host = host;
        }
        if let Some(port) = port {
            self.port = port;
        }
        self.validate()?;
        Ok(self)
    }

    /// `host:port` string handed to the TCP connector.
    #[must_use]
    pub fn peer_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Bound on a single connection attempt.
    #[must_use]
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.timing.connect_timeout_ms)
    }

    /// Retry/reconnect/warm-up schedule for the lifecycle state machine.
    #[must_use]
    pub fn retry_policy(&self) -> RetryPolicy {
        let timing = &self.timing;
        RetryPolicy {
            initial_retry_attempts: timing.initial_retry_attempts,
            initial_retry_delay: Duration::from_millis(timing.initial_retry_delay_ms),
            reconnect_delay: Duration::from_millis(timing.reconnect_delay_ms),
            warmup_delay: Duration::from_millis(timing.warmup_delay_ms),
            max_reconnect_attempts: match timing.max_reconnect_attempts {
                0 => None,
                cap => Some(cap),
            },
        }
    }

    fn validate(&self) -> Result<()> {
        if self.host.trim().is_empty() {
            return Err(AppError::Config("host must not be empty".into()));
        }

        if self.port == 0 {
            return Err(AppError::Config("port must be greater than zero".into()));
        }

        if self.staging_capacity == 0 {
            return Err(AppError::Config(
                "staging_capacity must be greater than zero".into(),
            ));
        }

        if self.timing.connect_timeout_ms == 0 {
            return Err(AppError::Config(
                "timing.connect_timeout_ms must be greater than zero".into(),
            ));
        }

        Ok(())
    }
}
