//! Component factory registry for configuration-driven platforms.
//!
//! The registry maps the `type` names used in a [`PlatformConfig`] to
//! factories building the component from its attributes.
//!
//! # Example
//!
//! ```
//! use hiersim::registry::ComponentRegistry;
//! use hiersim::components::Memory;
//! use hiersim::config::ComponentConfig;
//!
//! let mut registry = ComponentRegistry::new();
//! registry.register("Memory", |attrs| Ok(Box::new(Memory::from_config(attrs)?)));
//!
//! let attrs = ComponentConfig::new().with("size", 1024).with("latency", 2);
//! let memory = registry.create("Memory", &attrs).unwrap();
//! assert_eq!(memory.type_name(), "Memory");
//! ```
//!
//! [`PlatformConfig`]: crate::config::PlatformConfig

use std::collections::HashMap;
use std::sync::Arc;

use crate::component::Component;
use crate::config::{ComponentConfig, ConfigError, ConfigResult};

/// Type alias for component factory functions.
pub type ComponentFactory =
    Arc<dyn Fn(&ComponentConfig) -> ConfigResult<Box<dyn Component>> + Send + Sync>;

/// A registry for component factories.
#[derive(Default, Clone)]
pub struct ComponentRegistry {
    factories: HashMap<String, ComponentFactory>,
}

impl ComponentRegistry {
    /// Creates a new empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a component factory under `name`, replacing any previous one.
    pub fn register<F>(&mut self, name: impl Into<String>, factory: F)
    where
        F: Fn(&ComponentConfig) -> ConfigResult<Box<dyn Component>> + Send + Sync + 'static,
    {
        self.factories.insert(name.into(), Arc::new(factory));
    }

    /// Builds a component of type `type_name` from `attrs`.
    pub fn create(&self, type_name: &str, attrs: &ComponentConfig) -> ConfigResult<Box<dyn Component>> {
        let factory = self.factories.get(type_name).ok_or_else(|| {
            ConfigError::Validation(format!("Unknown component type: {}", type_name))
        })?;
        factory(attrs)
    }

    /// Returns true if a type is registered.
    pub fn contains(&self, type_name: &str) -> bool {
        self.factories.contains_key(type_name)
    }

    /// Returns the number of registered types.
    pub fn len(&self) -> usize {
        self.factories.len()
    }

    /// Returns true if no types are registered.
    pub fn is_empty(&self) -> bool {
        self.factories.is_empty()
    }

    /// Returns an iterator over registered type names.
    pub fn type_names(&self) -> impl Iterator<Item = &String> {
        self.factories.keys()
    }

    /// Unregisters a component type.
    pub fn unregister(&mut self, type_name: &str) -> bool {
        self.factories.remove(type_name).is_some()
    }
}

impl std::fmt::Debug for ComponentRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut names: Vec<&String> = self.factories.keys().collect();
        names.sort();
        f.debug_struct("ComponentRegistry")
            .field("registered_types", &names)
            .finish()
    }
}

/// Creates a registry with every built-in component type.
///
/// Includes `Memory`, `Interleaver`, `RedMule`, `TransposeEngine`,
/// `D2DLink`, `Router`, `TopologyManager`, `Endpoint`, `PlatformCtrl`,
/// `CtrlRegisters`, `SyncMem`, `ClusterRegisters` and `HbmCtrl`.
pub fn create_default_registry() -> ComponentRegistry {
    use crate::components::*;

    let mut registry = ComponentRegistry::new();
    registry.register("Memory", |attrs| Ok(Box::new(Memory::from_config(attrs)?)));
    registry.register("Interleaver", |attrs| Ok(Box::new(Interleaver::from_config(attrs)?)));
    registry.register("RedMule", |attrs| Ok(Box::new(RedMule::from_config(attrs)?)));
    registry.register("TransposeEngine", |attrs| {
        Ok(Box::new(TransposeEngine::from_config(attrs)?))
    });
    registry.register("D2DLink", |attrs| Ok(Box::new(D2DLink::from_config(attrs)?)));
    registry.register("Router", |attrs| Ok(Box::new(Router::from_config(attrs)?)));
    registry.register("TopologyManager", |attrs| {
        Ok(Box::new(TopologyManager::from_config(attrs)?))
    });
    registry.register("Endpoint", |attrs| Ok(Box::new(Endpoint::from_config(attrs)?)));
    registry.register("PlatformCtrl", |attrs| Ok(Box::new(PlatformCtrl::from_config(attrs)?)));
    registry.register("CtrlRegisters", |attrs| {
        Ok(Box::new(CtrlRegisters::from_config(attrs)?))
    });
    registry.register("SyncMem", |attrs| Ok(Box::new(SyncMem::from_config(attrs)?)));
    registry.register("ClusterRegisters", |attrs| {
        Ok(Box::new(ClusterRegisters::from_config(attrs)?))
    });
    registry.register("HbmCtrl", |attrs| Ok(Box::new(HbmCtrl::from_config(attrs)?)));
    registry
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::components::Memory;

    #[test]
    fn test_registry_basic() {
        let mut registry = ComponentRegistry::new();
        assert!(registry.is_empty());

        registry.register("Mem", |_| Ok(Box::new(Memory::new(16, 1))));
        assert_eq!(registry.len(), 1);
        assert!(registry.contains("Mem"));
        assert!(registry.unregister("Mem"));
        assert!(!registry.unregister("Mem"));
    }

    #[test]
    fn test_registry_create() {
        let registry = create_default_registry();

        let attrs = ComponentConfig::new().with("size", 64);
        let memory = registry.create("Memory", &attrs).unwrap();
        assert_eq!(memory.type_name(), "Memory");

        assert!(matches!(
            registry.create("NonExistent", &attrs),
            Err(ConfigError::Validation(_))
        ));
        // missing keys surface as construction errors
        assert!(matches!(
            registry.create("Router", &ComponentConfig::new()),
            Err(ConfigError::MissingKey(_))
        ));
    }

    #[test]
    fn test_default_registry() {
        let registry = create_default_registry();
        for name in [
            "Memory",
            "Interleaver",
            "RedMule",
            "TransposeEngine",
            "D2DLink",
            "Router",
            "TopologyManager",
            "Endpoint",
            "PlatformCtrl",
            "CtrlRegisters",
            "SyncMem",
            "ClusterRegisters",
            "HbmCtrl",
        ] {
            assert!(registry.contains(name), "{} missing", name);
        }
        assert_eq!(registry.len(), 13);
    }
}
