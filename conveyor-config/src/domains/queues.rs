//! Queue manager endpoints

use conveyor_core::ServerEndpoint;
use conveyor_queue::QueueKind;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::error::ConfigResult;
use crate::validation::{validate_positive, validate_required_string, Validatable};

/// One manager endpoint: where it listens and the secret clients present
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EndpointConfig {
    pub address: String,
    pub port: u16,
    pub secret: String,
}

impl EndpointConfig {
    pub fn new(address: impl Into<String>, port: u16, secret: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            port,
            secret: secret.into(),
        }
    }

    pub fn to_endpoint(&self) -> ServerEndpoint {
        ServerEndpoint::new(self.address.clone(), self.port, self.secret.clone())
    }

    fn validate_in(&self, name: &str, domain: &str) -> ConfigResult<()> {
        validate_required_string(&self.address, &format!("{}.address", name), domain)?;
        validate_positive(self.port, &format!("{}.port", name), domain)?;
        validate_required_string(&self.secret, &format!("{}.secret", name), domain)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueuesConfig {
    /// Manager serving the job queue
    pub jobs: EndpointConfig,

    /// Manager serving the result store
    pub results: EndpointConfig,

    pub queue_type: QueueKind,

    /// Journal file, required when `queue_type` is `journaled`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub journal_path: Option<PathBuf>,
}

impl Default for QueuesConfig {
    fn default() -> Self {
        Self {
            jobs: EndpointConfig::new("localhost", 9999, "mykey"),
            results: EndpointConfig::new("localhost", 9998, "mykey"),
            queue_type: QueueKind::Priority,
            journal_path: None,
        }
    }
}

impl Validatable for QueuesConfig {
    fn validate(&self) -> ConfigResult<()> {
        self.jobs.validate_in("jobs", self.domain_name())?;
        self.results.validate_in("results", self.domain_name())?;

        if self.queue_type == QueueKind::Journaled && self.journal_path.is_none() {
            return Err(self.validation_error("journal_path is required for a journaled queue"));
        }

        Ok(())
    }

    fn domain_name(&self) -> &'static str {
        "queues"
    }
}
