//! Task outcomes and result entries

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::fmt;

/// Classification of a failed task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Function name did not resolve in the executing registry
    UnknownFunction,
    /// Payload could not be parsed as a task
    MalformedPayload,
    /// The task body returned an error
    ExecutionFailed,
    /// The task body panicked
    Panicked,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::UnknownFunction => "unknown_function",
            ErrorKind::MalformedPayload => "malformed_payload",
            ErrorKind::ExecutionFailed => "execution_failed",
            ErrorKind::Panicked => "panicked",
        };
        f.write_str(name)
    }
}

/// Error descriptor stored in place of a value
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorDescriptor {
    pub kind: ErrorKind,
    pub message: String,
}

/// Terminal state of a task
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Value(JsonValue),
    Error(ErrorDescriptor),
}

impl Outcome {
    pub fn value(value: JsonValue) -> Self {
        Outcome::Value(value)
    }

    pub fn error(kind: ErrorKind, message: impl Into<String>) -> Self {
        Outcome::Error(ErrorDescriptor {
            kind,
            message: message.into(),
        })
    }

    pub fn is_ok(&self) -> bool {
        matches!(self, Outcome::Value(_))
    }

    pub fn is_error(&self) -> bool {
        !self.is_ok()
    }

    /// Error descriptor, if the task failed
    pub fn error_descriptor(&self) -> Option<&ErrorDescriptor> {
        match self {
            Outcome::Error(descriptor) => Some(descriptor),
            Outcome::Value(_) => None,
        }
    }

    pub fn into_value(self) -> Option<JsonValue> {
        match self {
            Outcome::Value(value) => Some(value),
            Outcome::Error(_) => None,
        }
    }
}

/// Outcome keyed by the id of the task that produced it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultEntry {
    pub task_id: String,
    pub outcome: Outcome,
}

impl ResultEntry {
    pub fn new(task_id: impl Into<String>, outcome: Outcome) -> Self {
        Self {
            task_id: task_id.into(),
            outcome,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_outcome_wire_form() {
        let ok = Outcome::value(json!(6));
        assert_eq!(serde_json::to_value(&ok).unwrap(), json!({"value": 6}));

        let failed = Outcome::error(ErrorKind::UnknownFunction, "no such function 'nope'");
        assert_eq!(
            serde_json::to_value(&failed).unwrap(),
            json!({"error": {"kind": "unknown_function", "message": "no such function 'nope'"}})
        );
    }

    #[test]
    fn test_outcome_accessors() {
        let failed = Outcome::error(ErrorKind::Panicked, "boom");
        assert!(failed.is_error());
        assert_eq!(failed.error_descriptor().unwrap().kind, ErrorKind::Panicked);
        assert!(failed.into_value().is_none());

        let ok = Outcome::value(json!("done"));
        assert!(ok.is_ok());
        assert_eq!(ok.into_value(), Some(json!("done")));
    }
}
