//! Adapter registry for resolving a persistence backend by name.

use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

use envsync_common::{Error, Result};

use crate::adapter::PersistenceAdapter;

/// Factory function type for creating adapters.
pub type AdapterFactory = Box<dyn Fn(Value) -> Result<Arc<dyn PersistenceAdapter>> + Send + Sync>;

/// Registry for persistence adapter factories.
///
/// Lets the composition root pick a backend from configuration
/// (`"memory"`, `"sqlite"`, ...) without naming concrete types.
pub struct AdapterRegistry {
    factories: HashMap<String, AdapterFactory>,
}

impl AdapterRegistry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    /// Create a registry with the built-in adapters.
    ///
    /// - `memory`: no configuration
    /// - `sqlite`: `{"path": "<file>"}`, defaulting to an in-memory database
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();

        registry.factories.insert(
            "memory".to_string(),
            Box::new(|_config| Ok(Arc::new(crate::memory::MemoryAdapter::new()))),
        );

        registry.factories.insert(
            "sqlite".to_string(),
            Box::new(|config| {
                let path = match config.get("path") {
                    None => ":memory:",
                    Some(v) => v.as_str().ok_or_else(|| {
                        Error::InvalidInput("SQLite adapter 'path' must be a string".to_string())
                    })?,
                };
                Ok(Arc::new(crate::sqlite::SqliteAdapter::new(path)))
            }),
        );

        registry
    }

    /// Register an adapter factory.
    ///
    /// # Errors
    /// - Returns error if name is already registered
    pub fn register(&mut self, name: impl Into<String>, factory: AdapterFactory) -> Result<()> {
        let name = name.into();
        if self.factories.contains_key(&name) {
            return Err(Error::AlreadyExists(format!(
                "Adapter '{}' is already registered",
                name
            )));
        }
        self.factories.insert(name, factory);
        Ok(())
    }

    /// Resolve an adapter by name and configuration.
    ///
    /// # Errors
    /// - Adapter not found
    /// - Configuration invalid
    pub fn resolve(&self, name: &str, config: Value) -> Result<Arc<dyn PersistenceAdapter>> {
        let factory = self
            .factories
            .get(name)
            .ok_or_else(|| Error::NotFound(format!("Adapter '{}' is not registered", name)))?;
        factory(config)
    }

    /// Get list of registered adapter names.
    pub fn adapters(&self) -> Vec<String> {
        let mut names: Vec<String> = self.factories.keys().cloned().collect();
        names.sort();
        names
    }

    /// Check if an adapter is registered.
    pub fn has_adapter(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }
}

impl Default for AdapterRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryAdapter;
    use serde_json::json;

    #[test]
    fn test_defaults() {
        let registry = AdapterRegistry::with_defaults();
        assert_eq!(registry.adapters(), vec!["memory".to_string(), "sqlite".to_string()]);

        let adapter = registry.resolve("sqlite", json!({"path": ":memory:"})).unwrap();
        assert_eq!(adapter.name(), "sqlite");

        let adapter = registry.resolve("memory", Value::Null).unwrap();
        assert_eq!(adapter.name(), "memory");
    }

    #[test]
    fn test_sqlite_rejects_bad_path() {
        let registry = AdapterRegistry::with_defaults();
        assert!(registry.resolve("sqlite", json!({"path": 3})).is_err());
    }

    #[test]
    fn test_duplicate_registration_fails() {
        let mut registry = AdapterRegistry::new();

        registry
            .register("test", Box::new(|_| Ok(Arc::new(MemoryAdapter::new()))))
            .unwrap();

        let result = registry.register("test", Box::new(|_| Ok(Arc::new(MemoryAdapter::new()))));
        assert!(matches!(result, Err(Error::AlreadyExists(_))));
        assert!(registry.has_adapter("test"));
    }

    #[test]
    fn test_resolve_unknown_fails() {
        let registry = AdapterRegistry::new();
        assert!(matches!(
            registry.resolve("unknown", Value::Null),
            Err(Error::NotFound(_))
        ));
    }
}
