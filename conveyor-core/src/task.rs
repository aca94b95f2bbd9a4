//! Task domain model
//!
//! A task travels between processes in its wire form, [`TaskPayload`]:
//! `{id, function, args}`. Only the function *name* crosses the boundary; the
//! receiving process resolves it against its own [`FunctionRegistry`] when it
//! decodes the payload into a runnable [`Task`].

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use uuid::Uuid;

use crate::error::TaskError;
use crate::outcome::{ErrorKind, Outcome};
use crate::registry::{FunctionRegistry, TaskFunction};

/// Arguments of a task call.
///
/// The shape decides how the arguments are spread over the function's
/// parameters: a sequence is positional, a mapping is by keyword, anything
/// else is a single positional argument.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TaskArgs {
    Positional(Vec<JsonValue>),
    Keyword(Map<String, JsonValue>),
    Single(JsonValue),
}

impl Default for TaskArgs {
    fn default() -> Self {
        TaskArgs::Positional(Vec::new())
    }
}

impl TaskArgs {
    /// Resolve the parameter at `position` (or named `name`) as a call would
    pub fn param(&self, position: usize, name: &str) -> Option<&JsonValue> {
        match self {
            TaskArgs::Positional(values) => values.get(position),
            TaskArgs::Keyword(map) => map.get(name),
            TaskArgs::Single(value) => (position == 0).then_some(value),
        }
    }

    /// Number of arguments supplied
    pub fn len(&self) -> usize {
        match self {
            TaskArgs::Positional(values) => values.len(),
            TaskArgs::Keyword(map) => map.len(),
            TaskArgs::Single(_) => 1,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn to_value(&self) -> JsonValue {
        self.clone().into()
    }
}

impl From<JsonValue> for TaskArgs {
    fn from(value: JsonValue) -> Self {
        match value {
            JsonValue::Array(values) => TaskArgs::Positional(values),
            JsonValue::Object(map) => TaskArgs::Keyword(map),
            other => TaskArgs::Single(other),
        }
    }
}

impl From<TaskArgs> for JsonValue {
    fn from(args: TaskArgs) -> Self {
        match args {
            TaskArgs::Positional(values) => JsonValue::Array(values),
            TaskArgs::Keyword(map) => JsonValue::Object(map),
            TaskArgs::Single(value) => value,
        }
    }
}

/// Wire form of a task
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskPayload {
    pub id: String,
    pub function: String,
    #[serde(default)]
    pub args: TaskArgs,
}

impl TaskPayload {
    /// Create a payload with a fresh UUID id
    pub fn new(function: impl Into<String>, args: impl Into<TaskArgs>) -> Self {
        Self::with_id(Uuid::new_v4().to_string(), function, args)
    }

    pub fn with_id(
        id: impl Into<String>,
        function: impl Into<String>,
        args: impl Into<TaskArgs>,
    ) -> Self {
        Self {
            id: id.into(),
            function: function.into(),
            args: args.into(),
        }
    }

    pub fn to_value(&self) -> JsonValue {
        let mut map = Map::new();
        map.insert("id".to_string(), JsonValue::String(self.id.clone()));
        map.insert(
            "function".to_string(),
            JsonValue::String(self.function.clone()),
        );
        map.insert("args".to_string(), self.args.to_value());
        JsonValue::Object(map)
    }

    /// Parse a payload out of an untyped value.
    ///
    /// On failure the task id is recovered from the raw value when present so
    /// the error can still be reported against it.
    pub fn from_value(value: &JsonValue) -> Result<Self, TaskError> {
        serde_json::from_value(value.clone()).map_err(|e| TaskError::MalformedPayload {
            task_id: value
                .get("id")
                .and_then(JsonValue::as_str)
                .map(str::to_string),
            reason: e.to_string(),
        })
    }
}

/// A decoded task bound to its executable behavior
#[derive(Clone)]
pub struct Task {
    id: String,
    function_name: String,
    args: TaskArgs,
    behavior: Arc<dyn TaskFunction>,
}

impl Task {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn function_name(&self) -> &str {
        &self.function_name
    }

    pub fn args(&self) -> &TaskArgs {
        &self.args
    }

    /// Build a task for `function_name`, resolving it immediately
    pub fn new(
        id: impl Into<String>,
        function_name: impl Into<String>,
        args: impl Into<TaskArgs>,
        registry: &FunctionRegistry,
    ) -> Result<Self, TaskError> {
        let payload = TaskPayload::with_id(id, function_name, args);
        Self::decode(&payload, registry)
    }

    /// Wire form of this task; the behavior is represented by its name only
    pub fn encode(&self) -> TaskPayload {
        TaskPayload {
            id: self.id.clone(),
            function: self.function_name.clone(),
            args: self.args.clone(),
        }
    }

    /// Resolve a payload against `registry`
    pub fn decode(payload: &TaskPayload, registry: &FunctionRegistry) -> Result<Self, TaskError> {
        let behavior =
            registry
                .resolve(&payload.function)
                .map_err(|_| TaskError::UnknownFunction {
                    task_id: payload.id.clone(),
                    function: payload.function.clone(),
                })?;

        Ok(Self {
            id: payload.id.clone(),
            function_name: payload.function.clone(),
            args: payload.args.clone(),
            behavior,
        })
    }

    /// Parse and resolve an untyped payload
    pub fn decode_value(value: &JsonValue, registry: &FunctionRegistry) -> Result<Self, TaskError> {
        let payload = TaskPayload::from_value(value)?;
        Self::decode(&payload, registry)
    }

    /// Run the behavior. Failures and panics become error outcomes.
    pub fn invoke(&self) -> Outcome {
        let result = panic::catch_unwind(AssertUnwindSafe(|| self.behavior.call(&self.args)));

        match result {
            Ok(Ok(value)) => Outcome::value(value),
            Ok(Err(error)) => Outcome::error(ErrorKind::ExecutionFailed, error.message),
            Err(payload) => Outcome::error(ErrorKind::Panicked, panic_message(payload.as_ref())),
        }
    }
}

impl PartialEq for Task {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id && self.function_name == other.function_name && self.args == other.args
    }
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("id", &self.id)
            .field("function_name", &self.function_name)
            .field("args", &self.args)
            .finish()
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        format!("task panicked: {}", message)
    } else if let Some(message) = payload.downcast_ref::<String>() {
        format!("task panicked: {}", message)
    } else {
        "task panicked".to_string()
    }
}
