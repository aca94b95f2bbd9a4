//! Worker pool and autoscaler settings

use conveyor_execution::{
    ControlLaw, RetireMode, ScalingPolicy, WatchdogSettings, WorkerSettings,
};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::ConfigResult;
use crate::validation::{
    validate_non_negative, validate_positive, validate_required_string, Validatable,
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkersConfig {
    /// Floor of the pool, started up front
    pub initial_workers: usize,

    /// Ceiling of the pool
    pub max_workers: usize,

    /// Target tasks drained per worker per sample window
    pub consume_rate: f64,

    #[serde(with = "humantime_serde")]
    pub sample_time: Duration,

    /// Sentinel marker that stops a worker
    pub poison_pill: String,

    #[serde(with = "humantime_serde")]
    pub pop_timeout: Duration,

    pub control_law: ControlLaw,

    pub retire_mode: RetireMode,

    #[serde(with = "humantime_serde")]
    pub graceful_timeout: Duration,
}

impl Default for WorkersConfig {
    fn default() -> Self {
        Self {
            initial_workers: 3,
            max_workers: 6,
            consume_rate: 10.0,
            sample_time: Duration::from_secs(1),
            poison_pill: "-STOP-".to_string(),
            pop_timeout: Duration::from_secs(1),
            control_law: ControlLaw::Corrected,
            retire_mode: RetireMode::Sentinel,
            graceful_timeout: Duration::from_secs(5),
        }
    }
}

impl WorkersConfig {
    pub fn worker_settings(&self) -> WorkerSettings {
        WorkerSettings {
            poison_pill: self.poison_pill.clone(),
            pop_timeout: self.pop_timeout,
        }
    }

    pub fn watchdog_settings(&self) -> WatchdogSettings {
        WatchdogSettings {
            policy: ScalingPolicy {
                initial_workers: self.initial_workers,
                max_workers: self.max_workers,
                consume_rate: self.consume_rate,
                control_law: self.control_law,
            },
            sample_time: self.sample_time,
            poison_pill: self.poison_pill.clone(),
            retire_mode: self.retire_mode,
            graceful_timeout: self.graceful_timeout,
        }
    }
}

impl Validatable for WorkersConfig {
    fn validate(&self) -> ConfigResult<()> {
        validate_positive(self.initial_workers, "initial_workers", self.domain_name())?;
        if self.max_workers < self.initial_workers {
            return Err(self.validation_error(format!(
                "max_workers ({}) must be at least initial_workers ({})",
                self.max_workers, self.initial_workers
            )));
        }
        validate_non_negative(self.consume_rate, "consume_rate", self.domain_name())?;
        validate_required_string(&self.poison_pill, "poison_pill", self.domain_name())?;

        if self.sample_time.is_zero() {
            return Err(self.validation_error("sample_time must be greater than 0"));
        }

        Ok(())
    }

    fn domain_name(&self) -> &'static str {
        "workers"
    }
}
