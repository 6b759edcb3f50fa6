//! Error types for annotation sync
//!
//! Each collaborator boundary has its own error enum. `SyncError` is the
//! orchestrator-level taxonomy that wraps them.

use std::path::PathBuf;

use thiserror::Error;

/// Orchestrator-wide result type
pub type Result<T> = std::result::Result<T, SyncError>;

/// Errors raised while a connector produces its library or annotations
#[derive(Error, Debug)]
pub enum ImportError {
    #[error("Store not found: {0}")]
    StoreNotFound(String),

    #[error("Invalid store: {0}")]
    InvalidStore(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Malformed record: {0}")]
    Malformed(String),

    #[error("Document unreadable: {path}: {source}")]
    DocumentUnreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Errors raised while writing annotations to a destination
#[derive(Error, Debug)]
pub enum ExportError {
    #[error("Export not supported: {0}")]
    Unsupported(String),

    #[error("Document not managed by this exporter: {0}")]
    ForeignDocument(String),

    #[error("Annotation has no {0} representation")]
    MissingRepresentation(&'static str),

    #[error("Store not found: {0}")]
    StoreNotFound(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors raised by a coordinate converter
#[derive(Error, Debug, Clone)]
pub enum ConversionError {
    #[error("Coordinate conversion unavailable: {0}")]
    Unavailable(String),

    #[error("Cannot open document for conversion: {0}")]
    Document(String),

    #[error("Position cannot be mapped: {0}")]
    Unmappable(String),
}

/// Top-level sync errors
#[derive(Error, Debug)]
pub enum SyncError {
    #[error("No matching connector for location: {0}")]
    UnsupportedLocation(String),

    #[error("Source and destination must be set before syncing")]
    NotConfigured,

    #[error("Import failed: {0}")]
    Import(#[from] ImportError),

    #[error("Document unreadable: {path}: {source}")]
    DocumentUnreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Export failed: {0}")]
    Export(#[from] ExportError),

    #[error("Conversion failed: {0}")]
    Conversion(#[from] ConversionError),

    #[error("Operation timed out after {0} seconds")]
    Timeout(u64),

    #[error("Task failed: {0}")]
    Task(String),
}

impl From<tokio::task::JoinError> for SyncError {
    fn from(err: tokio::task::JoinError) -> Self {
        SyncError::Task(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unsupported_location_message() {
        let err = SyncError::UnsupportedLocation("kindle:/mnt".to_string());
        assert_eq!(
            err.to_string(),
            "No matching connector for location: kindle:/mnt"
        );
    }

    #[test]
    fn test_export_error_wraps_into_sync_error() {
        let err: SyncError = ExportError::MissingRepresentation("bounding box").into();
        assert!(matches!(err, SyncError::Export(_)));
        assert!(err.to_string().contains("bounding box"));
    }
}
