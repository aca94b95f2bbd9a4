//! Function registry
//!
//! Maps stable function names to task bodies. A registry is built once at
//! process start and then shared read-only (behind an `Arc`) by everything that
//! executes tasks, so lookups need no locking.

use serde_json::Value as JsonValue;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use tracing::warn;

use crate::error::{FunctionError, RegistryError};
use crate::task::TaskArgs;

/// Result returned by a task body
pub type FunctionResult = Result<JsonValue, FunctionError>;

/// An executable task body
pub trait TaskFunction: Send + Sync {
    fn call(&self, args: &TaskArgs) -> FunctionResult;
}

impl<F> TaskFunction for F
where
    F: Fn(&TaskArgs) -> FunctionResult + Send + Sync,
{
    fn call(&self, args: &TaskArgs) -> FunctionResult {
        self(args)
    }
}

/// Name to behavior table
#[derive(Clone, Default)]
pub struct FunctionRegistry {
    functions: BTreeMap<String, Arc<dyn TaskFunction>>,
}

impl FunctionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind `name` to `function`, failing if the name is already bound
    pub fn register<F>(&mut self, name: impl Into<String>, function: F) -> Result<(), RegistryError>
    where
        F: TaskFunction + 'static,
    {
        let name = Self::checked_name(name.into())?;
        if self.functions.contains_key(&name) {
            return Err(RegistryError::Duplicate(name));
        }
        self.functions.insert(name, Arc::new(function));
        Ok(())
    }

    /// Bind `name` to `function`, replacing any previous binding
    pub fn replace<F>(&mut self, name: impl Into<String>, function: F) -> Result<(), RegistryError>
    where
        F: TaskFunction + 'static,
    {
        let name = Self::checked_name(name.into())?;
        if self.functions.insert(name.clone(), Arc::new(function)).is_some() {
            warn!(function = %name, "Replaced existing registry binding");
        }
        Ok(())
    }

    /// Look up the behavior bound to `name`
    pub fn resolve(&self, name: &str) -> Result<Arc<dyn TaskFunction>, RegistryError> {
        self.functions
            .get(name)
            .cloned()
            .ok_or_else(|| RegistryError::NameNotFound(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.functions.contains_key(name)
    }

    /// Registered names in sorted order
    pub fn names(&self) -> Vec<String> {
        self.functions.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.functions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.functions.is_empty()
    }

    /// Freeze the registry for sharing across workers
    pub fn into_shared(self) -> Arc<FunctionRegistry> {
        Arc::new(self)
    }

    fn checked_name(name: String) -> Result<String, RegistryError> {
        if name.trim().is_empty() {
            return Err(RegistryError::InvalidName(name));
        }
        Ok(name)
    }
}

impl fmt::Debug for FunctionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FunctionRegistry")
            .field("functions", &self.functions.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn constant(value: i64) -> impl Fn(&TaskArgs) -> FunctionResult {
        move |_args: &TaskArgs| Ok::<_, FunctionError>(json!(value))
    }

    #[test]
    fn test_register_and_resolve() {
        let mut registry = FunctionRegistry::new();
        registry.register("one", constant(1)).unwrap();

        let function = registry.resolve("one").unwrap();
        assert_eq!(function.call(&TaskArgs::default()).unwrap(), json!(1));
        assert!(registry.contains("one"));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_duplicate_registration_fails() {
        let mut registry = FunctionRegistry::new();
        registry.register("one", constant(1)).unwrap();

        let err = registry.register("one", constant(2)).unwrap_err();
        assert_eq!(err, RegistryError::Duplicate("one".to_string()));

        // original binding is untouched
        let function = registry.resolve("one").unwrap();
        assert_eq!(function.call(&TaskArgs::default()).unwrap(), json!(1));
    }

    #[test]
    fn test_replace_overwrites() {
        let mut registry = FunctionRegistry::new();
        registry.register("one", constant(1)).unwrap();
        registry.replace("one", constant(2)).unwrap();

        let function = registry.resolve("one").unwrap();
        assert_eq!(function.call(&TaskArgs::default()).unwrap(), json!(2));
    }

    #[test]
    fn test_resolve_missing_name() {
        let registry = FunctionRegistry::new();
        assert!(matches!(
            registry.resolve("missing"),
            Err(RegistryError::NameNotFound(name)) if name == "missing"
        ));
    }

    #[test]
    fn test_blank_name_rejected() {
        let mut registry = FunctionRegistry::new();
        assert!(matches!(
            registry.register("  ", constant(1)),
            Err(RegistryError::InvalidName(_))
        ));
    }

    #[test]
    fn test_names_are_sorted() {
        let mut registry = FunctionRegistry::new();
        registry.register("b", constant(1)).unwrap();
        registry.register("a", constant(1)).unwrap();
        assert_eq!(registry.names(), vec!["a".to_string(), "b".to_string()]);
    }
}
