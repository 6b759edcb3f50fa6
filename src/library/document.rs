//! Annotated documents and their identity
//!
//! A document is identified by its path, filename and size. Content hashes
//! are computed only when two documents of equal size carry different names,
//! and each hash is computed at most once per document.

use std::collections::BTreeMap;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

use super::hash::{HashAlgorithm, DEFAULT_HASH_ALGORITHM};
use crate::annotations::AnnotationSet;
use crate::error::{ImportError, Result, SyncError};

/// A document known to one store
#[derive(Debug)]
pub struct AnnotatedDocument {
    full_path: PathBuf,
    filename: String,
    filesize: u64,
    /// Connector-private identifier (e.g. a database row id)
    store_key: Option<String>,
    hashes: RwLock<BTreeMap<HashAlgorithm, String>>,
    /// Serializes hash computation so racing callers hash a file once
    hashing: Mutex<()>,
    hash_computations: AtomicUsize,
    annotations: tokio::sync::OnceCell<Arc<AnnotationSet>>,
}

impl AnnotatedDocument {
    /// Create a document whose size is already known
    pub fn new(full_path: impl Into<PathBuf>, filesize: u64) -> Self {
        let full_path = full_path.into();
        let filename = full_path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();

        Self {
            full_path,
            filename,
            filesize,
            store_key: None,
            hashes: RwLock::new(BTreeMap::new()),
            hashing: Mutex::new(()),
            hash_computations: AtomicUsize::new(0),
            annotations: tokio::sync::OnceCell::new(),
        }
    }

    /// Create a document from a file on disk, reading its size
    pub fn from_file(full_path: impl Into<PathBuf>) -> std::result::Result<Self, ImportError> {
        let full_path = full_path.into();
        let filesize = std::fs::metadata(&full_path)
            .map_err(|source| ImportError::DocumentUnreadable {
                path: full_path.clone(),
                source,
            })?
            .len();
        Ok(Self::new(full_path, filesize))
    }

    /// Attach a connector-private identifier
    pub fn with_store_key(mut self, key: impl Into<String>) -> Self {
        self.store_key = Some(key.into());
        self
    }

    /// Seed a hash the store already knows
    pub fn with_hash(self, algorithm: HashAlgorithm, value: impl Into<String>) -> Self {
        self.hashes.write().insert(algorithm, value.into());
        self
    }

    pub fn full_path(&self) -> &Path {
        &self.full_path
    }

    pub fn filename(&self) -> &str {
        &self.filename
    }

    pub fn filesize(&self) -> u64 {
        self.filesize
    }

    pub fn store_key(&self) -> Option<&str> {
        self.store_key.as_deref()
    }

    /// A hash that is already known, without doing any I/O
    pub fn known_hash(&self, algorithm: HashAlgorithm) -> Option<String> {
        self.hashes.read().get(&algorithm).cloned()
    }

    /// Number of times this document's file was read for hashing
    pub fn hash_computations(&self) -> usize {
        self.hash_computations.load(Ordering::Relaxed)
    }

    /// Get a hash, computing and caching it on first use.
    ///
    /// A failed computation caches nothing.
    pub fn hash(&self, algorithm: HashAlgorithm) -> Result<String> {
        if let Some(hash) = self.known_hash(algorithm) {
            return Ok(hash);
        }

        let _guard = self.hashing.lock();
        if let Some(hash) = self.known_hash(algorithm) {
            return Ok(hash);
        }

        self.hash_computations.fetch_add(1, Ordering::Relaxed);
        let hash = algorithm
            .compute(&self.full_path)
            .map_err(|source| SyncError::DocumentUnreadable {
                path: self.full_path.clone(),
                source,
            })?;

        tracing::debug!(
            path = %self.full_path.display(),
            algorithm = %algorithm,
            "Computed document hash"
        );

        self.hashes.write().insert(algorithm, hash.clone());
        Ok(hash)
    }

    /// Decide whether `self` and `other` are the same file.
    ///
    /// 1. Different sizes: not the same (no I/O).
    /// 2. Same filename: the same (no I/O).
    /// 3. A hash known on both sides under one algorithm: compare it.
    /// 4. Otherwise hash both with the default algorithm and compare.
    pub fn same_document(&self, other: &AnnotatedDocument) -> Result<bool> {
        if self.filesize != other.filesize {
            return Ok(false);
        }

        if self.filename == other.filename {
            return Ok(true);
        }

        if let Some((mine, theirs)) = self.common_known_hash(other) {
            return Ok(mine == theirs);
        }

        let mine = self.hash(DEFAULT_HASH_ALGORITHM)?;
        let theirs = other.hash(DEFAULT_HASH_ALGORITHM)?;
        Ok(mine == theirs)
    }

    fn common_known_hash(&self, other: &AnnotatedDocument) -> Option<(String, String)> {
        // one lock at a time, so two opposite comparisons cannot deadlock
        // behind a writer
        let mine = self.hashes.read().clone();
        let theirs = other.hashes.read();
        mine.iter()
            .find_map(|(algorithm, hash)| theirs.get(algorithm).map(|t| (hash.clone(), t.clone())))
    }

    /// The document's annotations, loaded by `load` on first call.
    ///
    /// The loaded set is shared by every later caller, so conversions cached
    /// on it survive across comparisons.
    pub async fn annotations<F, Fut>(&self, load: F) -> std::result::Result<Arc<AnnotationSet>, ImportError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = std::result::Result<AnnotationSet, ImportError>>,
    {
        self.annotations
            .get_or_try_init(|| async move { load().await.map(Arc::new) })
            .await
            .cloned()
    }

    /// The annotations, if already loaded
    pub fn loaded_annotations(&self) -> Option<Arc<AnnotationSet>> {
        self.annotations.get().cloned()
    }
}
