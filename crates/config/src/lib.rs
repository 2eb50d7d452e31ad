//! Configuration management for the experiment engine

use experiment_types::ExperimentConfiguration;
use figment::{
    providers::{Env, Format, Serialized, Yaml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;
use tracing_subscriber::EnvFilter;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    LoadError(String),

    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

pub type Result<T> = std::result::Result<T, ConfigError>;

/// Main engine configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EngineConfig {
    /// Engine-wide thresholds
    pub engine: EngineSettings,

    /// Event recorder buffering
    pub recorder: RecorderConfig,

    /// Configuration applied to experiments created without one
    pub experiment_defaults: ExperimentConfiguration,

    /// Observability settings
    pub observability: ObservabilityConfig,
}

impl EngineConfig {
    /// Load configuration from file and environment
    pub fn load(config_path: Option<PathBuf>) -> Result<Self> {
        let mut figment = Figment::from(Serialized::defaults(EngineConfig::default()));

        // Load from file if provided
        if let Some(path) = config_path {
            figment = figment.merge(Yaml::file(path));
        }

        // Override with environment variables (prefixed with EXPERIMENTS_)
        figment = figment.merge(Env::prefixed("EXPERIMENTS_").split("__"));

        let config: Self = figment
            .extract()
            .map_err(|e| ConfigError::LoadError(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        let engine = &self.engine;
        if engine.min_samples_per_arm < 2 {
            return Err(ConfigError::ValidationError(
                "min_samples_per_arm must be at least 2".to_string(),
            ));
        }

        if !(0.5..1.0).contains(&engine.early_stop_confidence) {
            return Err(ConfigError::ValidationError(format!(
                "early_stop_confidence must be in [0.5, 1.0), got {}",
                engine.early_stop_confidence
            )));
        }

        if engine.event_retention_secs == 0 {
            return Err(ConfigError::ValidationError(
                "event_retention_secs must be greater than 0".to_string(),
            ));
        }

        self.recorder.validate()?;

        let defaults = &self.experiment_defaults;
        if defaults.monitoring_interval_secs == 0 || defaults.max_duration_secs == 0 {
            return Err(ConfigError::ValidationError(
                "experiment default durations must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }
}

/// Engine-wide thresholds
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EngineSettings {
    /// Memory floor checked before an experiment starts
    pub min_available_memory_mb: u64,

    /// Samples per arm below which a metric is not tested
    pub min_samples_per_arm: usize,

    /// Confidence above which a running experiment may stop early
    pub early_stop_confidence: f64,

    /// Age after which recorded events are pruned
    pub event_retention_secs: u64,
}

impl EngineSettings {
    pub fn event_retention(&self) -> Duration {
        Duration::from_secs(self.event_retention_secs)
    }
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            min_available_memory_mb: 100,
            min_samples_per_arm: 30,
            early_stop_confidence: 0.99,
            event_retention_secs: 7 * 24 * 60 * 60, // 7 days
        }
    }
}

/// Event recorder configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RecorderConfig {
    /// Capacity of the in-memory queue
    pub buffer_size: usize,

    /// Pending events that force a flush
    pub max_batch_size: usize,

    /// Periodic flush interval in milliseconds
    pub flush_interval_ms: u64,
}

impl RecorderConfig {
    pub fn flush_interval(&self) -> Duration {
        Duration::from_millis(self.flush_interval_ms)
    }

    pub fn validate(&self) -> Result<()> {
        if self.buffer_size == 0 {
            return Err(ConfigError::ValidationError(
                "buffer_size must be greater than 0".to_string(),
            ));
        }
        if self.max_batch_size == 0 {
            return Err(ConfigError::ValidationError(
                "max_batch_size must be greater than 0".to_string(),
            ));
        }
        if self.max_batch_size > self.buffer_size {
            return Err(ConfigError::ValidationError(
                "max_batch_size cannot exceed buffer_size".to_string(),
            ));
        }
        if self.flush_interval_ms == 0 {
            return Err(ConfigError::ValidationError(
                "flush_interval_ms must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for RecorderConfig {
    fn default() -> Self {
        Self {
            buffer_size: 10_000,
            max_batch_size: 100,
            flush_interval_ms: 1_000,
        }
    }
}

/// Observability configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level, overridden by `RUST_LOG`
    pub log_level: String,

    /// Enable structured JSON logging
    pub json_logging: bool,
}

impl ObservabilityConfig {
    /// Install the global tracing subscriber
    pub fn init_tracing(&self) -> Result<()> {
        let filter = EnvFilter::try_from_default_env()
            .or_else(|_| EnvFilter::try_new(&self.log_level))
            .map_err(|e| ConfigError::ValidationError(format!("invalid log level: {}", e)))?;

        let builder = tracing_subscriber::fmt().with_env_filter(filter);
        let installed = if self.json_logging {
            builder.json().try_init()
        } else {
            builder.try_init()
        };

        installed.map_err(|e| ConfigError::LoadError(e.to_string()))
    }
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            json_logging: false,
        }
    }
}
