//! Configuration management for slidelog.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

use crate::error::{Result, SlidelogError};
use crate::ratelimit::{PolicyRule, Quota, DEFAULT_LIMIT, DEFAULT_WINDOW_MS};

/// Prefix for environment variable overrides, e.g.
/// `SLIDELOG_LIMITER__DEFAULT_LIMIT=20`.
pub const ENV_PREFIX: &str = "SLIDELOG";

/// Main configuration for the slidelog service.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SlidelogConfig {
    /// Limiter configuration
    #[serde(default)]
    pub limiter: LimiterConfig,

    /// Named policies
    #[serde(default)]
    pub policies: HashMap<String, PolicyRule>,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Which backend keeps the per-key state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Strategy {
    /// Exact sliding window log
    #[default]
    Log,
    /// Approximate sliding window counter
    Counter,
}

/// Limiter configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimiterConfig {
    /// Backend strategy
    #[serde(default)]
    pub strategy: Strategy,

    /// Limit applied by default checks
    #[serde(default = "default_limit")]
    pub default_limit: u64,

    /// Window applied by default checks, in milliseconds
    #[serde(default = "default_window_ms")]
    pub default_window_ms: u64,

    /// How often the idle-key sweeper runs, in seconds
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,

    /// Keys untouched for this long are evicted by the sweeper
    #[serde(default = "default_idle_ttl")]
    pub idle_ttl_ms: u64,
}

impl Default for LimiterConfig {
    fn default() -> Self {
        Self {
            strategy: Strategy::default(),
            default_limit: default_limit(),
            default_window_ms: default_window_ms(),
            sweep_interval_secs: default_sweep_interval(),
            idle_ttl_ms: default_idle_ttl(),
        }
    }
}

fn default_limit() -> u64 {
    DEFAULT_LIMIT
}

fn default_window_ms() -> u64 {
    DEFAULT_WINDOW_MS
}

fn default_sweep_interval() -> u64 {
    60
}

fn default_idle_ttl() -> u64 {
    600_000
}

impl LimiterConfig {
    /// The validated default quota.
    pub fn default_quota(&self) -> Result<Quota> {
        Quota::new(self.default_limit, self.default_window_ms)
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default filter directive when `RUST_LOG` is unset
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

impl SlidelogConfig {
    /// Load configuration from a YAML file path.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    /// Load configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml).map_err(|e| SlidelogError::Config(e.to_string()))
    }

    /// Load configuration from an optional file, layered under
    /// `SLIDELOG_<SECTION>__<KEY>` environment overrides.
    ///
    /// Only `limiter` and `logging` take overrides. Policies come from the
    /// file alone, with their names kept exactly as written.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(true));
        }
        let settings = builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let mut config: SlidelogConfig = settings.try_deserialize()?;
        // The layered loader lowercases keys, which would rename policies.
        config.policies = match path {
            Some(path) => Self::from_file(path)?.policies,
            None => HashMap::new(),
        };
        Ok(config)
    }
}
