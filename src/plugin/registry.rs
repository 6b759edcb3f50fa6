//! Plugin registry and location resolution
//!
//! The registry is an ordered list of factories filled once at startup by
//! explicit registration calls. Resolution walks it in registration order
//! and takes the first factory that claims a descriptor.

use std::sync::Arc;

use once_cell::sync::OnceCell;

use super::traits::{Exporter, ExporterFactory, Importer, ImporterFactory, PluginModule};

static GLOBAL: OnceCell<Arc<PluginRegistry>> = OnceCell::new();

/// Ordered importer and exporter factories
#[derive(Default, Clone)]
pub struct PluginRegistry {
    importers: Vec<Arc<dyn ImporterFactory>>,
    exporters: Vec<Arc<dyn ExporterFactory>>,
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry holding the connectors shipped with this crate
    pub fn with_builtin_plugins() -> Self {
        let mut registry = Self::new();
        registry.register_module(&crate::connectors::BuiltinPlugins);
        registry
    }

    /// Append an importer factory. Duplicates are kept.
    pub fn register_importer(&mut self, factory: Arc<dyn ImporterFactory>) {
        tracing::debug!(factory = factory.name(), "Registered importer factory");
        self.importers.push(factory);
    }

    /// Append an exporter factory. Duplicates are kept.
    pub fn register_exporter(&mut self, factory: Arc<dyn ExporterFactory>) {
        tracing::debug!(factory = factory.name(), "Registered exporter factory");
        self.exporters.push(factory);
    }

    /// Let a module register its factories
    pub fn register_module(&mut self, module: &dyn PluginModule) {
        tracing::info!(module = module.name(), "Loading plugin module");
        module.register(self);
    }

    /// Importer factories in registration order
    pub fn importers(&self) -> &[Arc<dyn ImporterFactory>] {
        &self.importers
    }

    /// Exporter factories in registration order
    pub fn exporters(&self) -> &[Arc<dyn ExporterFactory>] {
        &self.exporters
    }

    /// Install `registry` as the process-wide registry.
    ///
    /// Only the first installation wins; later calls get their registry back.
    pub fn install(registry: PluginRegistry) -> Result<Arc<PluginRegistry>, PluginRegistry> {
        let registry = Arc::new(registry);
        match GLOBAL.set(registry.clone()) {
            Ok(()) => Ok(registry),
            Err(_) => Err(Arc::try_unwrap(registry).unwrap_or_else(|shared| (*shared).clone())),
        }
    }

    /// The process-wide registry, initialized with the built-in plugins if
    /// nothing was installed
    pub fn global() -> Arc<PluginRegistry> {
        GLOBAL
            .get_or_init(|| Arc::new(PluginRegistry::with_builtin_plugins()))
            .clone()
    }
}

impl std::fmt::Debug for PluginRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginRegistry")
            .field("importers", &self.importers.iter().map(|i| i.name()).collect::<Vec<_>>())
            .field("exporters", &self.exporters.iter().map(|e| e.name()).collect::<Vec<_>>())
            .finish()
    }
}

/// Resolves location descriptors to connectors
#[derive(Debug, Clone)]
pub struct LocationResolver {
    registry: Arc<PluginRegistry>,
}

impl LocationResolver {
    pub fn new(registry: Arc<PluginRegistry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &PluginRegistry {
        &self.registry
    }

    /// First importer any registered factory creates for `descriptor`
    pub fn resolve_importer(&self, descriptor: &str) -> Option<Arc<dyn Importer>> {
        let found = self.registry.importers().iter().find_map(|factory| {
            factory
                .create_importer_for(descriptor)
                .map(|importer| (factory.name(), importer))
        });

        match found {
            Some((factory, importer)) => {
                tracing::debug!(descriptor, factory, "Resolved importer");
                Some(importer)
            }
            None => {
                tracing::debug!(descriptor, "No importer factory claims descriptor");
                None
            }
        }
    }

    /// First exporter any registered factory creates for `descriptor`
    pub fn resolve_exporter(&self, descriptor: &str) -> Option<Arc<dyn Exporter>> {
        let found = self.registry.exporters().iter().find_map(|factory| {
            factory
                .create_exporter_for(descriptor)
                .map(|exporter| (factory.name(), exporter))
        });

        match found {
            Some((factory, exporter)) => {
                tracing::debug!(descriptor, factory, "Resolved exporter");
                Some(exporter)
            }
            None => {
                tracing::debug!(descriptor, "No exporter factory claims descriptor");
                None
            }
        }
    }
}
