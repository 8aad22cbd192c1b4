//! Configuration management for Turnstile.

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use crate::error::{Result, TurnstileError};

/// Prefix for environment variable overrides, e.g.
/// `TURNSTILE__RATE_LIMITING__MAX_REQUESTS=50`.
pub const ENV_PREFIX: &str = "TURNSTILE";

/// Main configuration for the Turnstile service.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TurnstileConfig {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Rate limiting configuration
    #[serde(default)]
    pub rate_limiting: RateLimitingConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// HTTP listen address
    #[serde(default = "default_listen_addr")]
    pub listen_addr: SocketAddr,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
        }
    }
}

fn default_listen_addr() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 8080))
}

/// Rate limiting configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitingConfig {
    /// Requests admitted per client per window
    #[serde(default = "default_max_requests")]
    pub max_requests: u64,

    /// Window length in milliseconds
    #[serde(default = "default_window_duration_ms")]
    pub window_duration_ms: u64,

    /// Maximum number of tracked clients
    #[serde(default = "default_store_capacity")]
    pub store_capacity: usize,

    /// Store-level time-to-live in milliseconds
    #[serde(default = "default_store_ttl_ms")]
    pub store_ttl_ms: u64,

    /// Interval between sweeps of TTL-expired counters, 0 disables sweeping
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,

    /// Request paths that bypass rate limiting entirely
    #[serde(default)]
    pub skip_paths: Vec<String>,

    /// Derive client keys from `X-Forwarded-For` / `X-Real-IP`
    #[serde(default)]
    pub trust_proxy: bool,
}

impl Default for RateLimitingConfig {
    fn default() -> Self {
        Self {
            max_requests: default_max_requests(),
            window_duration_ms: default_window_duration_ms(),
            store_capacity: default_store_capacity(),
            store_ttl_ms: default_store_ttl_ms(),
            sweep_interval_secs: default_sweep_interval(),
            skip_paths: Vec::new(),
            trust_proxy: false,
        }
    }
}

fn default_max_requests() -> u64 {
    100
}

fn default_window_duration_ms() -> u64 {
    60_000
}

fn default_store_capacity() -> usize {
    10_000
}

fn default_store_ttl_ms() -> u64 {
    3_600_000
}

fn default_sweep_interval() -> u64 {
    60
}

impl RateLimitingConfig {
    /// Window length.
    pub fn window_duration(&self) -> Duration {
        Duration::from_millis(self.window_duration_ms)
    }

    /// Store-level time-to-live.
    pub fn store_ttl(&self) -> Duration {
        Duration::from_millis(self.store_ttl_ms)
    }

    /// Sweep interval, or `None` when sweeping is disabled.
    pub fn sweep_interval(&self) -> Option<Duration> {
        (self.sweep_interval_secs > 0).then(|| Duration::from_secs(self.sweep_interval_secs))
    }

    /// Reject combinations that would break window accounting.
    pub fn validate(&self) -> Result<()> {
        if self.window_duration_ms == 0 {
            return Err(TurnstileError::Config(
                "window_duration_ms must be greater than zero".to_string(),
            ));
        }

        if self.store_capacity == 0 {
            return Err(TurnstileError::Config(
                "store_capacity must be greater than zero".to_string(),
            ));
        }

        if self.store_ttl_ms < self.window_duration_ms {
            return Err(TurnstileError::Config(format!(
                "store_ttl_ms ({}) must be at least window_duration_ms ({})",
                self.store_ttl_ms, self.window_duration_ms
            )));
        }

        Ok(())
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable lines
    #[default]
    Pretty,
    /// One JSON object per event
    Json,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default filter directive, overridden by `RUST_LOG`
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Output format
    #[serde(default)]
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

impl TurnstileConfig {
    /// Load configuration from an optional YAML file layered with
    /// `TURNSTILE__*` environment variables.
    ///
    /// `TURNSTILE__RATE_LIMITING__SKIP_PATHS` takes a comma-separated list.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = ::config::Config::builder();

        if let Some(path) = path {
            builder = builder.add_source(
                ::config::File::from(path)
                    .format(::config::FileFormat::Yaml)
                    .required(true),
            );
        }

        let settings = builder
            .add_source(
                ::config::Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("rate_limiting.skip_paths"),
            )
            .build()?;

        let config: TurnstileConfig = settings.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: TurnstileConfig = serde_yaml::from_str(yaml)
            .map_err(|e| TurnstileError::Config(format!("Failed to parse configuration: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Validate every section.
    pub fn validate(&self) -> Result<()> {
        self.rate_limiting.validate()
    }
}
