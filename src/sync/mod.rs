//! Sync between two annotation stores
//!
//! The [`SyncOrchestrator`] takes a source and a destination descriptor,
//! and each run produces a [`SyncReport`].

mod orchestrator;
mod types;

pub use orchestrator::SyncOrchestrator;
pub use types::{DocumentExport, DocumentFailure, FailureStage, SyncReport, SyncState};
