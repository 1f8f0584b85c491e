//! Configuration management for Ratewarden.

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::time::Duration;

use crate::error::{RatewardenError, Result};
use crate::ratelimit::Quota;

/// Prefix for environment variable overrides, e.g. `RATEWARDEN__LIMITS__RATE=20`.
pub const ENV_PREFIX: &str = "RATEWARDEN";

/// Main configuration for the Ratewarden service.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RatewardenConfig {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Default quota and decision policy
    #[serde(default)]
    pub limits: LimitsConfig,

    /// State store configuration
    #[serde(default)]
    pub store: StoreConfig,

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
    SocketAddr::from(([0, 0, 0, 0], 8080))
}

/// Default quota and decision policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitsConfig {
    /// Requests allowed per creation window for identifiers without an API key
    #[serde(default = "default_rate")]
    pub rate: u32,

    /// Cooldown, in minutes, once an identifier exceeds its rate
    #[serde(default = "default_block_duration_minutes")]
    pub block_duration_minutes: u64,

    /// Upper bound on a single decision, including store round-trips
    #[serde(default)]
    pub decision_timeout_ms: Option<u64>,

    /// Admit requests when the store fails instead of rejecting them
    #[serde(default)]
    pub fail_open: bool,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            rate: default_rate(),
            block_duration_minutes: default_block_duration_minutes(),
            decision_timeout_ms: None,
            fail_open: false,
        }
    }
}

fn default_rate() -> u32 {
    10
}

fn default_block_duration_minutes() -> u64 {
    5
}

impl LimitsConfig {
    /// The quota applied when the request carries no API key.
    pub fn default_quota(&self) -> Result<Quota> {
        Quota::new(
            self.rate,
            Duration::from_secs(self.block_duration_minutes.saturating_mul(60)),
        )
    }

    /// The configured decision timeout.
    pub fn decision_timeout(&self) -> Option<Duration> {
        self.decision_timeout_ms.map(Duration::from_millis)
    }
}

/// Which store backs the limiter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    /// In-process map; state is lost on restart
    #[default]
    Memory,
    /// Shared Redis instance
    Redis,
}

/// State store configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Store backend
    #[serde(default)]
    pub backend: StoreBackend,

    /// Redis connection URL
    #[serde(default = "default_redis_url")]
    pub redis_url: String,

    /// Prefix for Redis keys
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,

    /// Expiry for Redis keys, in seconds. Raised per record to cover its
    /// block duration, so a cooldown never outlives its key.
    #[serde(default)]
    pub ttl_secs: Option<u64>,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::default(),
            redis_url: default_redis_url(),
            key_prefix: default_key_prefix(),
            ttl_secs: None,
        }
    }
}

fn default_redis_url() -> String {
    "redis://127.0.0.1:6379/".to_string()
}

fn default_key_prefix() -> String {
    "ratewarden:".to_string()
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable lines
    #[default]
    Text,
    /// One JSON object per line
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

impl RatewardenConfig {
    /// Load configuration from an optional YAML file, then apply
    /// `RATEWARDEN__*` environment overrides.
    pub fn load(path: Option<&str>) -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(
                config::File::with_name(path).format(config::FileFormat::Yaml),
            );
        }
        let config: RatewardenConfig = builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;

        config.validate()?;
        Ok(config)
    }

    /// Parse configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: RatewardenConfig = serde_yaml::from_str(yaml)
            .map_err(|e| RatewardenError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Check values that serde cannot.
    pub fn validate(&self) -> Result<()> {
        self.limits.default_quota()?;
        if self.limits.decision_timeout_ms == Some(0) {
            return Err(RatewardenError::Config(
                "decision_timeout_ms must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}
