//! Connector traits
//!
//! Store-agnostic interfaces the sync engine drives. A connector provides
//! factories that claim location descriptors and produce importers and
//! exporters for them.

use std::sync::Arc;

use async_trait::async_trait;

use super::registry::PluginRegistry;
use crate::annotations::{Annotation, AnnotationSet, Representation};
use crate::error::{ExportError, ImportError};
use crate::library::{AnnotatedDocument, DocumentLibrary};

/// Reads documents and annotations from one store.
///
/// Implementations must not touch the store until
/// [`annotated_library`](Importer::annotated_library) is first called, and
/// must memoize the library it returns.
#[async_trait]
pub trait Importer: Send + Sync {
    /// Connector name for logs
    fn name(&self) -> &str;

    /// The store's documents, materialized on first call
    async fn annotated_library(&self) -> Result<Arc<DocumentLibrary>, ImportError>;

    /// Read the annotations of one document of this store's library
    async fn load_annotations(&self, document: &AnnotatedDocument) -> Result<AnnotationSet, ImportError>;

    /// Annotations of `document`, loaded once and cached on the document
    async fn annotations(&self, document: &AnnotatedDocument) -> Result<Arc<AnnotationSet>, ImportError> {
        document
            .annotations(|| self.load_annotations(document))
            .await
    }
}

/// Writes annotations into one store
#[async_trait]
pub trait Exporter: Send + Sync {
    /// Connector name for logs
    fn name(&self) -> &str;

    /// Representation annotations must be in to be written, if any
    fn representation(&self) -> Option<Representation> {
        None
    }

    /// Write a whole library
    async fn export_library(&self, _library: &DocumentLibrary) -> Result<(), ExportError> {
        Err(ExportError::Unsupported(format!(
            "{} cannot export whole libraries",
            self.name()
        )))
    }

    /// Add `annotations` to `document`, a document of this store's own
    /// library. Returns the number of annotations written.
    async fn add_annotations_to_document(
        &self,
        document: &AnnotatedDocument,
        annotations: &[Annotation],
    ) -> Result<usize, ExportError>;
}

/// Claims location descriptors for importing
pub trait ImporterFactory: Send + Sync {
    fn name(&self) -> &str;

    /// An importer for `descriptor`, or `None` if this factory does not
    /// handle it. Parses only; performs no I/O.
    fn create_importer_for(&self, descriptor: &str) -> Option<Arc<dyn Importer>>;
}

/// Claims location descriptors for exporting
pub trait ExporterFactory: Send + Sync {
    fn name(&self) -> &str;

    /// An exporter for `descriptor`, or `None` if this factory does not
    /// handle it. Parses only; performs no I/O.
    fn create_exporter_for(&self, descriptor: &str) -> Option<Arc<dyn Exporter>>;
}

/// A bundle of factories registered together
pub trait PluginModule {
    fn name(&self) -> &str;

    fn register(&self, registry: &mut PluginRegistry);
}
