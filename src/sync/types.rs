//! Sync data types
//!
//! Defines the orchestrator state machine and the report a sync run
//! produces:
//! - per-document exports and failures
//! - documents that had no counterpart on the other side
//! - documents excluded because their files could not be read

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::library::UnreadableDocument;

/// Orchestrator lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum SyncState {
    Unconfigured,
    /// Source and destination resolved
    SourceDestSet,
    /// Document libraries matched
    Reconciled,
    /// Every matched pair processed
    Exported,
}

/// Step of per-document processing that failed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FailureStage {
    /// Reading either side's annotations
    Import,
    /// Converting the delta into the destination's representation
    Conversion,
    /// Writing the delta
    Export,
}

/// One matched pair whose processing failed
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentFailure {
    pub source: PathBuf,
    pub destination: PathBuf,
    pub stage: FailureStage,
    pub error: String,
}

/// One matched pair that was processed
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentExport {
    pub source: PathBuf,
    pub destination: PathBuf,
    /// Annotations present only in the source
    pub delta: usize,
    /// Delta annotations that could not be expressed for the destination
    pub unconvertible: usize,
    /// Annotations the exporter reported as written (zero on a dry run)
    pub written: usize,
}

/// Outcome of one sync run
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncReport {
    pub source: String,
    pub destination: String,
    pub started_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    pub dry_run: bool,
    /// Matched document pairs
    pub matched: usize,
    pub only_source: Vec<PathBuf>,
    pub only_destination: Vec<PathBuf>,
    pub unreadable: Vec<UnreadableDocument>,
    pub exports: Vec<DocumentExport>,
    pub failures: Vec<DocumentFailure>,
    /// Pairs not processed because the run was cancelled
    pub skipped: usize,
    pub cancelled: bool,
}

impl SyncReport {
    pub fn new(source: &str, destination: &str, dry_run: bool) -> Self {
        Self {
            source: source.to_string(),
            destination: destination.to_string(),
            started_at: Utc::now(),
            finished_at: None,
            dry_run,
            matched: 0,
            only_source: Vec::new(),
            only_destination: Vec::new(),
            unreadable: Vec::new(),
            exports: Vec::new(),
            failures: Vec::new(),
            skipped: 0,
            cancelled: false,
        }
    }

    /// Total size of every computed delta
    pub fn delta_total(&self) -> usize {
        self.exports.iter().map(|e| e.delta).sum()
    }

    /// Total annotations written
    pub fn written_total(&self) -> usize {
        self.exports.iter().map(|e| e.written).sum()
    }

    /// True when every matched pair was processed without failure
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty() && !self.cancelled
    }

    pub(crate) fn finish(&mut self) {
        self.exports.sort_by(|a, b| a.destination.cmp(&b.destination));
        self.failures.sort_by(|a, b| a.destination.cmp(&b.destination));
        self.finished_at = Some(Utc::now());
    }
}
