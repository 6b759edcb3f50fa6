//! Built-in connectors
//!
//! - `mendeley`: Mendeley Desktop SQLite database (import and export)
//! - `pocketbook`: PocketBook e-reader storage (import)

pub mod descriptor;
pub mod mendeley;
pub mod pocketbook;

use std::sync::Arc;

pub use mendeley::{MendeleyExporter, MendeleyExporterFactory, MendeleyImporter, MendeleyImporterFactory};
pub use pocketbook::{PocketbookImporter, PocketbookImporterFactory};

use crate::plugin::{PluginModule, PluginRegistry};

/// Plugin module registering the connectors shipped with this crate
#[derive(Debug, Default)]
pub struct BuiltinPlugins;

impl PluginModule for BuiltinPlugins {
    fn name(&self) -> &str {
        "builtin"
    }

    fn register(&self, registry: &mut PluginRegistry) {
        registry.register_importer(Arc::new(MendeleyImporterFactory));
        registry.register_importer(Arc::new(PocketbookImporterFactory));
        registry.register_exporter(Arc::new(MendeleyExporterFactory));
    }
}
