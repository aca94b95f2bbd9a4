//! Logging configuration

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::ConfigResult;
use crate::validation::Validatable;

/// How the manager, pool and CLI log. Workers inherit `level` from the pool.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: LogLevel,
    pub format: LogFormat,
}

/// Verbosity, written the way `RUST_LOG` spells it
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Error,
    Warn,
    #[default]
    Info,
    Debug,
    Trace,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// One line per event
    #[default]
    Compact,
    /// Multi-line, for reading at a terminal
    Pretty,
    /// One JSON object per event
    Json,
}

const LEVELS: [(LogLevel, &str); 5] = [
    (LogLevel::Error, "error"),
    (LogLevel::Warn, "warn"),
    (LogLevel::Info, "info"),
    (LogLevel::Debug, "debug"),
    (LogLevel::Trace, "trace"),
];

const FORMATS: [(LogFormat, &str); 3] = [
    (LogFormat::Compact, "compact"),
    (LogFormat::Pretty, "pretty"),
    (LogFormat::Json, "json"),
];

fn lookup<T: Copy>(table: &[(T, &'static str)], input: &str, what: &str) -> Result<T, String> {
    let wanted = input.trim().to_ascii_lowercase();
    table
        .iter()
        .find(|(_, name)| *name == wanted)
        .map(|(value, _)| *value)
        .ok_or_else(|| {
            let names: Vec<&str> = table.iter().map(|(_, name)| *name).collect();
            format!("unknown {} '{}', expected one of {}", what, input, names.join(", "))
        })
}

fn name_of<T: PartialEq>(table: &[(T, &'static str)], value: &T) -> &'static str {
    table
        .iter()
        .find(|(candidate, _)| candidate == value)
        .map_or("", |(_, name)| *name)
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        name_of(&LEVELS, self)
    }
}

impl LogFormat {
    pub fn as_str(&self) -> &'static str {
        name_of(&FORMATS, self)
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Display for LogFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        // "warning" is what Python-style configs tend to carry
        if s.trim().eq_ignore_ascii_case("warning") {
            return Ok(LogLevel::Warn);
        }
        lookup(&LEVELS, s, "log level")
    }
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        lookup(&FORMATS, s, "log format")
    }
}

impl Validatable for LoggingConfig {
    fn validate(&self) -> ConfigResult<()> {
        Ok(())
    }

    fn domain_name(&self) -> &'static str {
        "logging"
    }
}
