//! Sync orchestration
//!
//! One run loads both libraries, matches their documents, matches the
//! annotations of every document pair and hands the source-only annotations
//! to the destination's exporter. Pairs sharing a destination document are
//! processed one after another, each seeing what the previous one wrote;
//! distinct destinations run on a bounded pool of concurrent workers. A
//! failure on one pair is recorded and the others carry on.

use std::collections::BTreeMap;
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use futures::stream::{self, StreamExt};
use tokio_util::sync::CancellationToken;

use super::types::{DocumentExport, DocumentFailure, FailureStage, SyncReport, SyncState};
use crate::annotations::{Annotation, AnnotationSet, Representation};
use crate::config::SyncConfig;
use crate::coordinates::CoordinateConverter;
use crate::error::{Result, SyncError};
use crate::library::AnnotatedDocument;
use crate::plugin::{Exporter, Importer, LocationResolver};

/// Run `fut` under a deadline
async fn bounded<T, E, F>(limit: Duration, fut: F) -> Result<T>
where
    F: Future<Output = std::result::Result<T, E>>,
    SyncError: From<E>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result.map_err(SyncError::from),
        Err(_) => Err(SyncError::Timeout(limit.as_secs())),
    }
}

/// Connectors resolved for one run
struct Endpoints {
    source: Arc<dyn Importer>,
    destination: Arc<dyn Importer>,
    exporter: Arc<dyn Exporter>,
}

type DocumentPair = (Arc<AnnotatedDocument>, Arc<AnnotatedDocument>);

/// Split pairs into one group per destination document
fn group_by_destination(pairs: Vec<DocumentPair>) -> Vec<Vec<DocumentPair>> {
    let mut groups: BTreeMap<PathBuf, Vec<DocumentPair>> = BTreeMap::new();
    for (source, destination) in pairs {
        groups
            .entry(destination.full_path().to_path_buf())
            .or_default()
            .push((source, destination));
    }
    groups.into_values().collect()
}

enum PairOutcome {
    Exported(DocumentExport),
    Failed(DocumentFailure),
    Skipped,
}

/// Everything a worker needs to process one document pair
struct PairContext {
    endpoints: Endpoints,
    converter: Arc<dyn CoordinateConverter>,
    preferred: Representation,
    timeout: Duration,
    dry_run: bool,
    cancel: CancellationToken,
}

impl PairContext {
    /// Process pairs that share one destination document, in order
    async fn process_group(&self, pairs: Vec<DocumentPair>) -> Vec<PairOutcome> {
        // the destination's annotations including this run's earlier writes
        let mut current = None;
        let mut outcomes = Vec::with_capacity(pairs.len());
        for (source, destination) in pairs {
            outcomes.push(self.process(source, destination, &mut current).await);
        }
        outcomes
    }

    async fn process(
        &self,
        source: Arc<AnnotatedDocument>,
        destination: Arc<AnnotatedDocument>,
        current: &mut Option<Arc<AnnotationSet>>,
    ) -> PairOutcome {
        if self.cancel.is_cancelled() {
            tracing::debug!(path = %destination.full_path().display(), "Sync cancelled, skipping document");
            return PairOutcome::Skipped;
        }

        match self.export_delta(&source, &destination, current).await {
            Ok(export) => PairOutcome::Exported(export),
            Err((stage, error)) => {
                tracing::warn!(
                    source = %source.full_path().display(),
                    destination = %destination.full_path().display(),
                    stage = ?stage,
                    error = %error,
                    "Failed to sync document"
                );
                PairOutcome::Failed(DocumentFailure {
                    source: source.full_path().to_path_buf(),
                    destination: destination.full_path().to_path_buf(),
                    stage,
                    error: error.to_string(),
                })
            }
        }
    }

    /// Compute and write the delta of one pair. On success `current` holds
    /// the destination's annotations with the delta added, dry run or not.
    async fn export_delta(
        &self,
        source: &AnnotatedDocument,
        destination: &AnnotatedDocument,
        current: &mut Option<Arc<AnnotationSet>>,
    ) -> std::result::Result<DocumentExport, (FailureStage, SyncError)> {
        let (source_set, destination_set) = futures::try_join!(
            bounded(self.timeout, self.endpoints.source.annotations(source)),
            async {
                match current.as_ref() {
                    Some(set) => Ok(set.clone()),
                    None => bounded(self.timeout, self.endpoints.destination.annotations(destination)).await,
                }
            },
        )
        .map_err(|e| (FailureStage::Import, e))?;

        let comparison = {
            let (mine, theirs) = (source_set.clone(), destination_set.clone());
            let (converter, preferred) = (self.converter.clone(), self.preferred);
            tokio::task::spawn_blocking(move || mine.find_common_annotations(&theirs, converter.as_ref(), preferred))
                .await
                .map_err(|e| (FailureStage::Conversion, SyncError::from(e)))?
        };

        let mut export = DocumentExport {
            source: source.full_path().to_path_buf(),
            destination: destination.full_path().to_path_buf(),
            delta: comparison.only_self.len(),
            unconvertible: 0,
            written: 0,
        };

        tracing::debug!(
            path = %destination.full_path().display(),
            matched = comparison.pairs.len(),
            delta = export.delta,
            representation = ?comparison.representation,
            "Matched annotations"
        );

        if comparison.only_self.is_empty() {
            return Ok(export);
        }

        let delta = self
            .express_delta(&source_set, &comparison.only_self)
            .await
            .map_err(|e| (FailureStage::Conversion, e))?;

        export.unconvertible = export.delta - delta.len();
        if export.unconvertible > 0 {
            tracing::warn!(
                path = %source.full_path().display(),
                count = export.unconvertible,
                "Annotations cannot be expressed for the destination, leaving them out"
            );
        }

        if delta.is_empty() {
            return Ok(export);
        }

        if !self.dry_run {
            export.written = bounded(
                self.timeout,
                self.endpoints
                    .exporter
                    .add_annotations_to_document(destination, &delta),
            )
            .await
            .map_err(|e| (FailureStage::Export, e))?;

            tracing::info!(
                path = %destination.full_path().display(),
                written = export.written,
                "Exported annotations"
            );
        }

        *current = Some(Arc::new(destination_set.extended(delta)));
        Ok(export)
    }

    /// The annotations at `indices`, in the representation the exporter
    /// needs. Annotations that cannot be converted are dropped.
    async fn express_delta(&self, set: &Arc<AnnotationSet>, indices: &[usize]) -> Result<Vec<Annotation>> {
        let Some(repr) = self.endpoints.exporter.representation() else {
            return Ok(indices
                .iter()
                .filter_map(|&i| set.annotations().get(i).cloned())
                .collect());
        };

        if !set.is_materialized(repr) {
            let (set, converter) = (set.clone(), self.converter.clone());
            tokio::task::spawn_blocking(move || set.materialize(repr, converter.as_ref())).await?;
        }

        Ok(indices
            .iter()
            .filter_map(|&i| set.annotation_in(i, repr))
            .collect())
    }
}

/// Drives annotation sync from a source store to a destination store
pub struct SyncOrchestrator {
    resolver: LocationResolver,
    converter: Arc<dyn CoordinateConverter>,
    config: SyncConfig,
    dry_run: bool,
    cancel: CancellationToken,
    state: SyncState,
    source: Option<String>,
    destination: Option<String>,
}

impl SyncOrchestrator {
    pub fn new(resolver: LocationResolver, converter: Arc<dyn CoordinateConverter>, config: SyncConfig) -> Self {
        Self {
            resolver,
            converter,
            config,
            dry_run: false,
            cancel: CancellationToken::new(),
            state: SyncState::Unconfigured,
            source: None,
            destination: None,
        }
    }

    /// Compute deltas without writing them
    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    /// Use `token` to stop runs between documents. Once cancelled, a token
    /// stays cancelled.
    pub fn with_cancellation_token(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn state(&self) -> SyncState {
        self.state
    }

    pub fn source(&self) -> Option<&str> {
        self.source.as_deref()
    }

    pub fn destination(&self) -> Option<&str> {
        self.destination.as_deref()
    }

    /// Set the store annotations are read from
    pub fn set_source(&mut self, descriptor: &str) -> Result<()> {
        self.resolve_source(descriptor)?;
        self.source = Some(descriptor.to_string());
        self.update_state();
        Ok(())
    }

    /// Set the store annotations are written to. It must be both readable
    /// and writable.
    pub fn set_destination(&mut self, descriptor: &str) -> Result<()> {
        self.resolve_destination(descriptor)?;
        self.destination = Some(descriptor.to_string());
        self.update_state();
        Ok(())
    }

    fn update_state(&mut self) {
        self.state = match (&self.source, &self.destination) {
            (Some(_), Some(_)) => SyncState::SourceDestSet,
            _ => SyncState::Unconfigured,
        };
    }

    fn resolve_source(&self, descriptor: &str) -> Result<Arc<dyn Importer>> {
        self.resolver
            .resolve_importer(descriptor)
            .ok_or_else(|| SyncError::UnsupportedLocation(descriptor.to_string()))
    }

    fn resolve_destination(&self, descriptor: &str) -> Result<(Arc<dyn Importer>, Arc<dyn Exporter>)> {
        let importer = self.resolver.resolve_importer(descriptor);
        let exporter = self.resolver.resolve_exporter(descriptor);
        match (importer, exporter) {
            (Some(importer), Some(exporter)) => Ok((importer, exporter)),
            _ => Err(SyncError::UnsupportedLocation(descriptor.to_string())),
        }
    }

    /// Run one sync.
    ///
    /// Connectors are resolved afresh for every run so each run sees the
    /// stores' current contents. Only failing to load either library aborts
    /// the run; per-document problems end up in the report.
    pub async fn sync(&mut self) -> Result<SyncReport> {
        let (Some(source), Some(destination)) = (self.source.clone(), self.destination.clone()) else {
            return Err(SyncError::NotConfigured);
        };

        let (destination_importer, exporter) = self.resolve_destination(&destination)?;
        let endpoints = Endpoints {
            source: self.resolve_source(&source)?,
            destination: destination_importer,
            exporter,
        };

        tracing::info!(
            source = %source,
            destination = %destination,
            dry_run = self.dry_run,
            "Starting sync"
        );

        let mut report = SyncReport::new(&source, &destination, self.dry_run);
        let timeout = self.config.io_timeout();

        let (source_library, destination_library) = futures::try_join!(
            bounded(timeout, endpoints.source.annotated_library()),
            bounded(timeout, endpoints.destination.annotated_library()),
        )?;

        let matched = {
            let (mine, theirs) = (source_library.clone(), destination_library.clone());
            tokio::task::spawn_blocking(move || mine.find_common_documents(&theirs)).await?
        };
        self.state = SyncState::Reconciled;

        report.matched = matched.pairs.len();
        report.only_source = matched
            .only_self
            .iter()
            .map(|d| d.full_path().to_path_buf())
            .collect();
        report.only_destination = matched
            .only_other
            .iter()
            .map(|d| d.full_path().to_path_buf())
            .collect();
        report.unreadable = matched.unreadable;

        tracing::info!(
            matched = report.matched,
            only_source = report.only_source.len(),
            only_destination = report.only_destination.len(),
            unreadable = report.unreadable.len(),
            "Matched document libraries"
        );
        for path in &report.only_source {
            tracing::debug!(path = %path.display(), "No counterpart in destination");
        }

        let context = PairContext {
            endpoints,
            converter: self.converter.clone(),
            preferred: self.config.representation,
            timeout,
            dry_run: self.dry_run,
            cancel: self.cancel.clone(),
        };

        let outcomes: Vec<Vec<PairOutcome>> = stream::iter(group_by_destination(matched.pairs))
            .map(|pairs| {
                let context = &context;
                async move { context.process_group(pairs).await }
            })
            .buffer_unordered(self.config.workers.max(1))
            .collect()
            .await;

        for outcome in outcomes.into_iter().flatten() {
            match outcome {
                PairOutcome::Exported(export) => report.exports.push(export),
                PairOutcome::Failed(failure) => report.failures.push(failure),
                PairOutcome::Skipped => report.skipped += 1,
            }
        }

        report.cancelled = self.cancel.is_cancelled();
        if !report.cancelled {
            self.state = SyncState::Exported;
        }
        report.finish();

        tracing::info!(
            exported = report.written_total(),
            delta = report.delta_total(),
            failures = report.failures.len(),
            skipped = report.skipped,
            cancelled = report.cancelled,
            "Sync finished"
        );

        Ok(report)
    }
}
