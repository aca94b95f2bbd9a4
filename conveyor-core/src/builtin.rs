//! Built-in task bodies available to every worker

use serde_json::{json, Value as JsonValue};
use std::time::Duration;
use tracing::info;

use crate::error::FunctionError;
use crate::registry::{FunctionRegistry, FunctionResult};
use crate::task::TaskArgs;

const DELAY_PRINT_PAUSE: Duration = Duration::from_millis(1500);

/// Returns its arguments unchanged
pub fn echo(args: &TaskArgs) -> FunctionResult {
    Ok(args.to_value())
}

/// Logs its first argument
pub fn simple_print(args: &TaskArgs) -> FunctionResult {
    let message = args.param(0, "message").cloned().unwrap_or(JsonValue::Null);
    info!(%message, "simple_print");
    Ok(JsonValue::Null)
}

/// Waits 1.5s, then logs its first argument
pub fn delay_print(args: &TaskArgs) -> FunctionResult {
    std::thread::sleep(DELAY_PRINT_PAUSE);
    simple_print(args)
}

/// Factorial of a non-negative integer
pub fn fact(args: &TaskArgs) -> FunctionResult {
    let n = args
        .param(0, "n")
        .and_then(JsonValue::as_u64)
        .ok_or_else(|| FunctionError::bad_argument("n", "a non-negative integer"))?;

    let value = (1..=n)
        .try_fold(1u64, |acc, k| acc.checked_mul(k))
        .ok_or_else(|| FunctionError::new(format!("factorial of {} overflows", n)))?;

    Ok(json!(value))
}

/// Registry holding the built-in functions
pub fn default_registry() -> FunctionRegistry {
    let mut registry = FunctionRegistry::new();
    let builtins: [(&str, fn(&TaskArgs) -> FunctionResult); 4] = [
        ("echo", echo),
        ("simple_print", simple_print),
        ("delay_print", delay_print),
        ("fact", fact),
    ];
    for (name, function) in builtins {
        registry
            .register(name, function)
            .expect("built-in task names are unique");
    }
    registry
}
