//! Reporter registry.
//!
//! Reporters are registered by name with a factory closure; the registry
//! keeps insertion order so dispatch order is stable and predictable.

use crate::core::error::ConfigError;
use crate::report::Reporter;
use indexmap::IndexMap;
use std::sync::Arc;

/// Factory function for creating reporter instances.
pub type ReporterFactory = Arc<dyn Fn() -> Box<dyn Reporter> + Send + Sync>;

/// Registry entry: factory plus bookkeeping.
#[derive(Clone)]
pub struct RegistryEntry {
    /// Factory function to create instances.
    pub factory: ReporterFactory,
    /// One-line description for listings.
    pub description: String,
    /// Whether this reporter may be instantiated.
    pub enabled: bool,
}

/// Registry of available reporter types.
pub struct ReporterRegistry {
    reporters: IndexMap<String, RegistryEntry>,
}

impl ReporterRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            reporters: IndexMap::new(),
        }
    }

    /// Create a registry pre-populated with the built-in reporters.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        crate::report::builtin::register_all(&mut registry);
        registry
    }

    /// Register a reporter type.
    pub fn register<F>(&mut self, name: &str, description: &str, factory: F)
    where
        F: Fn() -> Box<dyn Reporter> + Send + Sync + 'static,
    {
        self.reporters.insert(
            name.to_string(),
            RegistryEntry {
                factory: Arc::new(factory),
                description: description.to_string(),
                enabled: true,
            },
        );
    }

    /// Create a new instance of a reporter by name.
    pub fn create(&self, name: &str) -> Option<Box<dyn Reporter>> {
        self.reporters
            .get(name)
            .filter(|e| e.enabled)
            .map(|e| (e.factory)())
    }

    /// Instantiate a named set of reporters, in the order given.
    pub fn create_set(&self, names: &[String]) -> Result<Vec<Box<dyn Reporter>>, ConfigError> {
        names
            .iter()
            .map(|name| {
                self.create(name).ok_or_else(|| ConfigError::UnknownReporter {
                    name: name.clone(),
                })
            })
            .collect()
    }

    /// Whether a reporter is registered (enabled or not).
    pub fn contains(&self, name: &str) -> bool {
        self.reporters.contains_key(name)
    }

    /// Enable or disable a reporter. Returns false if unknown.
    pub fn set_enabled(&mut self, name: &str, enabled: bool) -> bool {
        match self.reporters.get_mut(name) {
            Some(entry) => {
                entry.enabled = enabled;
                true
            }
            None => false,
        }
    }

    /// All registered names, in registration order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.reporters.keys().map(|s| s.as_str())
    }

    /// All entries, in registration order.
    pub fn entries(&self) -> impl Iterator<Item = (&str, &RegistryEntry)> {
        self.reporters.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Number of registered reporters.
    pub fn len(&self) -> usize {
        self.reporters.len()
    }

    /// Whether the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.reporters.is_empty()
    }
}

impl Default for ReporterRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtins_are_registered() {
        let registry = ReporterRegistry::with_builtins();
        assert!(registry.contains("class_map"));
        assert!(registry.contains("aggregate"));
        assert!(registry.contains("preview"));
    }

    #[test]
    fn disabled_reporters_cannot_be_created() {
        let mut registry = ReporterRegistry::with_builtins();
        assert!(registry.create("aggregate").is_some());
        assert!(registry.set_enabled("aggregate", false));
        assert!(registry.create("aggregate").is_none());
    }

    #[test]
    fn unknown_names_fail_set_creation() {
        let registry = ReporterRegistry::with_builtins();
        let Err(err) = registry
            .create_set(&["class_map".to_string(), "nonexistent".to_string()])
        else {
            panic!("expected create_set to fail for unknown reporter");
        };
        assert!(matches!(err, ConfigError::UnknownReporter { name } if name == "nonexistent"));
    }

    #[test]
    fn create_set_preserves_order() {
        let registry = ReporterRegistry::with_builtins();
        let set = registry
            .create_set(&["preview".to_string(), "aggregate".to_string()])
            .unwrap();
        assert_eq!(set[0].name(), "preview");
        assert_eq!(set[1].name(), "aggregate");
    }
}
