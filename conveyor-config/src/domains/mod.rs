//! Domain-specific configuration modules

pub mod logging;
pub mod queues;
pub mod workers;

use crate::error::ConfigResult;
use crate::validation::Validatable;
use serde::{Deserialize, Serialize};

/// Main Conveyor configuration combining all domains
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConveyorConfig {
    /// Job queue and result store managers
    pub queues: queues::QueuesConfig,

    /// Worker pool and autoscaler
    pub workers: workers::WorkersConfig,

    pub logging: logging::LoggingConfig,
}

impl ConveyorConfig {
    /// Validate all domain configurations
    pub fn validate_all(&self) -> ConfigResult<()> {
        self.queues.validate()?;
        self.workers.validate()?;
        self.logging.validate()?;
        Ok(())
    }

    /// Generate a sample configuration file
    pub fn generate_sample() -> String {
        serde_yaml::to_string(&ConveyorConfig::default())
            .unwrap_or_else(|_| "# Failed to generate sample config".to_string())
    }
}
