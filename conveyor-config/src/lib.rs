//! Domain-driven configuration for Conveyor
//!
//! Configuration is split into `queues`, `workers` and `logging` domains,
//! each with defaults and validation. [`ConfigLoader`] reads YAML and applies
//! `CONVEYOR_*` environment overrides on top.

pub mod domains;
pub mod error;
pub mod loader;
pub mod validation;

pub use domains::{
    logging::{LogFormat, LogLevel, LoggingConfig},
    queues::{EndpointConfig, QueuesConfig},
    workers::WorkersConfig,
    ConveyorConfig,
};
pub use error::{ConfigError, ConfigResult};
pub use loader::ConfigLoader;
pub use validation::Validatable;
