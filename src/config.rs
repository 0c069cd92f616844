//! Configuration management for Tiergate.

use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use tracing::debug;

use crate::error::{Result, TiergateError};

/// Prefix for environment overrides, e.g. `TIERGATE_SERVER__LISTEN_ADDR`.
pub const ENV_PREFIX: &str = "TIERGATE";

/// Upper bound for `window_secs` and `cleanup_interval_secs` (ten years).
pub const MAX_DURATION_SECS: u64 = 10 * 365 * 24 * 60 * 60;

/// Main configuration for the Tiergate service.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TiergateConfig {
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

/// Which window store implementation backs the engine.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StoreKind {
    /// One mutex around the whole ledger
    #[default]
    SingleLock,
    /// Per-key shard locks
    Sharded,
}

/// Rate limiting configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitingConfig {
    /// Path to the limit table (YAML). The built-in table is used when unset.
    #[serde(default)]
    pub rules_path: Option<String>,

    /// Sliding window length in seconds
    #[serde(default = "default_window_secs")]
    pub window_secs: u64,

    /// Minimum seconds between ledger sweeps
    #[serde(default = "default_cleanup_interval_secs")]
    pub cleanup_interval_secs: u64,

    /// Paths that skip admission entirely
    #[serde(default = "default_bypass_paths")]
    pub bypass_paths: Vec<String>,

    /// Admin API keys
    #[serde(default)]
    pub admin_keys: Vec<String>,

    /// Window store implementation
    #[serde(default)]
    pub store: StoreKind,
}

impl Default for RateLimitingConfig {
    fn default() -> Self {
        Self {
            rules_path: None,
            window_secs: default_window_secs(),
            cleanup_interval_secs: default_cleanup_interval_secs(),
            bypass_paths: default_bypass_paths(),
            admin_keys: Vec::new(),
            store: StoreKind::default(),
        }
    }
}

fn default_window_secs() -> u64 {
    3600
}

fn default_cleanup_interval_secs() -> u64 {
    300
}

fn default_bypass_paths() -> Vec<String> {
    ["/health", "/", "/docs", "/openapi.json", "/api/rate-limit-status"]
        .into_iter()
        .map(String::from)
        .collect()
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Filter directive used when `RUST_LOG` is not set
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Emit JSON lines instead of human-readable output
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

impl TiergateConfig {
    /// Load configuration from a YAML file only.
    pub fn from_file(path: &str) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: TiergateConfig = serde_yaml::from_str(&contents)
            .map_err(|e| TiergateError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from an optional file, then apply `TIERGATE_*`
    /// environment overrides. Nested keys use `__`, lists use commas:
    /// `TIERGATE_RATE_LIMITING__ADMIN_KEYS=key1,key2`.
    pub fn load(path: Option<&str>) -> Result<Self> {
        let mut builder = Config::builder();
        if let Some(path) = path {
            debug!(path = path, "Reading configuration file");
            builder = builder.add_source(File::with_name(path));
        }

        let config: TiergateConfig = builder
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("rate_limiting.admin_keys")
                    .with_list_parse_key("rate_limiting.bypass_paths")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;

        config.validate()?;
        Ok(config)
    }

    /// Reject settings the engine cannot run with.
    pub fn validate(&self) -> Result<()> {
        let rl = &self.rate_limiting;
        for (name, secs) in [
            ("window_secs", rl.window_secs),
            ("cleanup_interval_secs", rl.cleanup_interval_secs),
        ] {
            if secs == 0 || secs > MAX_DURATION_SECS {
                return Err(TiergateError::Config(format!(
                    "rate_limiting.{} must be between 1 and {} seconds, got {}",
                    name, MAX_DURATION_SECS, secs
                )));
            }
        }
        Ok(())
    }
}
