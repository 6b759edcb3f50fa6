//! Connector plugins
//!
//! Importers and exporters are contributed by plugin modules through an
//! explicit registry. Nothing registers itself implicitly: the binary builds
//! a [`PluginRegistry`] during startup and hands it to a
//! [`LocationResolver`].

mod registry;
mod traits;

pub use registry::{LocationResolver, PluginRegistry};
pub use traits::{Exporter, ExporterFactory, Importer, ImporterFactory, PluginModule};
