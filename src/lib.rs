//! Annotation Sync
//!
//! Reconciles PDF annotations between document stores, such as a reference
//! manager and an e-reader. Both stores' libraries are loaded, documents are
//! matched by size, name and content hash, each matched pair's annotations
//! are matched page by page, and the annotations only the source has are
//! written to the destination.
//!
//! Stores are reached through connectors registered in a
//! [`plugin::PluginRegistry`] and picked by location descriptor
//! (`mendeley:...`, `pocketbook:...`).

pub mod annotations;
pub mod config;
pub mod connectors;
pub mod coordinates;
pub mod error;
pub mod library;
pub mod plugin;
pub mod reconcile;
pub mod sync;

pub use error::{Result, SyncError};
