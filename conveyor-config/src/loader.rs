//! Configuration loading and environment variable handling

use crate::domains::logging::{LogFormat, LogLevel, LoggingConfig};
use crate::domains::queues::{EndpointConfig, QueuesConfig};
use crate::domains::workers::WorkersConfig;
use crate::domains::ConveyorConfig;
use crate::error::{ConfigError, ConfigResult};
use conveyor_queue::QueueKind;
use humantime_serde::re::humantime;
use log::debug;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Configuration loader with environment variable support
pub struct ConfigLoader {
    /// Environment variable prefix
    prefix: String,
}

impl ConfigLoader {
    /// Loader reading `CONVEYOR_*` variables
    pub fn new() -> Self {
        Self {
            prefix: "CONVEYOR".to_string(),
        }
    }

    pub fn with_prefix(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    /// Load configuration from a YAML file with environment overrides
    pub fn from_file(&self, path: impl AsRef<Path>) -> ConfigResult<ConveyorConfig> {
        let path = path.as_ref();
        debug!("Loading configuration from {}", path.display());
        let content = std::fs::read_to_string(path)?;
        let mut config: ConveyorConfig = serde_yaml::from_str(&content)?;

        self.apply_env_overrides(&mut config)?;
        config.validate_all()?;

        Ok(config)
    }

    /// Defaults plus environment overrides
    pub fn from_env(&self) -> ConfigResult<ConveyorConfig> {
        let mut config = ConveyorConfig::default();
        self.apply_env_overrides(&mut config)?;
        config.validate_all()?;
        Ok(config)
    }

    pub fn load(&self, config_path: Option<impl AsRef<Path>>) -> ConfigResult<ConveyorConfig> {
        match config_path {
            Some(path) => self.from_file(path),
            None => self.from_env(),
        }
    }

    fn apply_env_overrides(&self, config: &mut ConveyorConfig) -> ConfigResult<()> {
        self.apply_queue_overrides(&mut config.queues)?;
        self.apply_worker_overrides(&mut config.workers)?;
        self.apply_logging_overrides(&mut config.logging)?;
        Ok(())
    }

    fn apply_queue_overrides(&self, config: &mut QueuesConfig) -> ConfigResult<()> {
        self.apply_endpoint_overrides("JOBS", &mut config.jobs)?;
        self.apply_endpoint_overrides("RESULTS", &mut config.results)?;

        if let Some(queue_type) = self.get_env_var("QUEUE_TYPE") {
            config.queue_type = match queue_type.to_lowercase().as_str() {
                "fifo" => QueueKind::Fifo,
                "priority" => QueueKind::Priority,
                "journaled" => QueueKind::Journaled,
                _ => {
                    return Err(ConfigError::EnvError(format!(
                        "Invalid QUEUE_TYPE: {}",
                        queue_type
                    )))
                }
            };
        }

        if let Some(path) = self.get_env_var("JOURNAL_PATH") {
            config.journal_path = Some(PathBuf::from(path));
        }

        Ok(())
    }

    fn apply_endpoint_overrides(&self, name: &str, config: &mut EndpointConfig) -> ConfigResult<()> {
        if let Some(address) = self.get_env_var(&format!("{}_ADDRESS", name)) {
            config.address = address;
        }

        if let Some(port) = self.get_env_var(&format!("{}_PORT", name)) {
            config.port = port
                .parse()
                .map_err(|e| ConfigError::EnvError(format!("Invalid {}_PORT: {}", name, e)))?;
        }

        if let Some(secret) = self.get_env_var(&format!("{}_SECRET", name)) {
            config.secret = secret;
        }

        Ok(())
    }

    fn apply_worker_overrides(&self, config: &mut WorkersConfig) -> ConfigResult<()> {
        if let Some(initial) = self.get_env_var("INITIAL_WORKERS") {
            config.initial_workers = initial
                .parse()
                .map_err(|e| ConfigError::EnvError(format!("Invalid INITIAL_WORKERS: {}", e)))?;
        }

        if let Some(max) = self.get_env_var("MAX_WORKERS") {
            config.max_workers = max
                .parse()
                .map_err(|e| ConfigError::EnvError(format!("Invalid MAX_WORKERS: {}", e)))?;
        }

        if let Some(rate) = self.get_env_var("CONSUME_RATE") {
            config.consume_rate = rate
                .parse()
                .map_err(|e| ConfigError::EnvError(format!("Invalid CONSUME_RATE: {}", e)))?;
        }

        if let Some(sample_time) = self.get_env_var("SAMPLE_TIME") {
            config.sample_time = humantime::parse_duration(&sample_time)
                .map_err(|e| ConfigError::EnvError(format!("Invalid SAMPLE_TIME: {}", e)))?;
        }

        if let Some(pill) = self.get_env_var("POISON_PILL") {
            config.poison_pill = pill;
        }

        Ok(())
    }

    fn apply_logging_overrides(&self, config: &mut LoggingConfig) -> ConfigResult<()> {
        if let Some(level) = self.get_env_var("LOG_LEVEL") {
            config.level = LogLevel::from_str(&level)
                .map_err(|_| ConfigError::EnvError(format!("Invalid LOG_LEVEL: {}", level)))?;
        }

        if let Some(format) = self.get_env_var("LOG_FORMAT") {
            config.format = LogFormat::from_str(&format)
                .map_err(|_| ConfigError::EnvError(format!("Invalid LOG_FORMAT: {}", format)))?;
        }

        Ok(())
    }

    /// Get environment variable with prefix
    fn get_env_var(&self, name: &str) -> Option<String> {
        std::env::var(format!("{}_{}", self.prefix, name)).ok()
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}
