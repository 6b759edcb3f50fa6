//! Document libraries
//!
//! A library is the ordered set of documents one store knows about, keyed
//! by path. Two libraries are matched by filesize buckets and the document
//! identity rules in [`AnnotatedDocument::same_document`].

mod document;
mod hash;

pub use document::AnnotatedDocument;
pub use hash::{HashAlgorithm, DEFAULT_HASH_ALGORITHM};

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Serialize;

use crate::reconcile::reconcile;

/// Ordered mapping from path to document
#[derive(Debug, Default)]
pub struct DocumentLibrary {
    documents: Vec<Arc<AnnotatedDocument>>,
    index: HashMap<PathBuf, usize>,
}

/// A document excluded from matching because its file could not be read
#[derive(Debug, Clone, Serialize)]
pub struct UnreadableDocument {
    pub path: PathBuf,
    pub error: String,
}

/// Outcome of matching two libraries
#[derive(Debug, Default)]
pub struct DocumentMatch {
    pub pairs: Vec<(Arc<AnnotatedDocument>, Arc<AnnotatedDocument>)>,
    pub only_self: Vec<Arc<AnnotatedDocument>>,
    pub only_other: Vec<Arc<AnnotatedDocument>>,
    pub unreadable: Vec<UnreadableDocument>,
}

impl DocumentLibrary {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a document. A document with the same path replaces the earlier
    /// one in place, keeping its position.
    pub fn add_document(&mut self, document: AnnotatedDocument) {
        let document = Arc::new(document);
        match self.index.get(document.full_path()) {
            Some(&position) => self.documents[position] = document,
            None => {
                self.index
                    .insert(document.full_path().to_path_buf(), self.documents.len());
                self.documents.push(document);
            }
        }
    }

    /// All documents in insertion order
    pub fn documents(&self) -> &[Arc<AnnotatedDocument>] {
        &self.documents
    }

    /// Exact path lookup
    pub fn get_by_path(&self, path: impl AsRef<Path>) -> Option<&Arc<AnnotatedDocument>> {
        self.index
            .get(path.as_ref())
            .map(|&position| &self.documents[position])
    }

    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }

    /// Match this library's documents against `other`'s.
    ///
    /// Hashing happens here, so this blocks on file I/O. A document whose
    /// file cannot be read is reported in `unreadable` instead of its
    /// only-set.
    pub fn find_common_documents(&self, other: &DocumentLibrary) -> DocumentMatch {
        let mut unreadable: Vec<UnreadableDocument> = Vec::new();

        let result = reconcile(
            self.documents.iter().cloned(),
            other.documents.iter().cloned(),
            |document| document.filesize(),
            |a, b| match a.same_document(b) {
                Ok(same) => same,
                Err(e) => {
                    let path = match &e {
                        crate::error::SyncError::DocumentUnreadable { path, .. } => path.clone(),
                        _ => a.full_path().to_path_buf(),
                    };
                    tracing::warn!(
                        path = %path.display(),
                        error = %e,
                        "Excluding unreadable document from matching"
                    );
                    if !unreadable.iter().any(|u| u.path == path) {
                        unreadable.push(UnreadableDocument {
                            path,
                            error: e.to_string(),
                        });
                    }
                    false
                }
            },
        );

        let is_unreadable =
            |document: &Arc<AnnotatedDocument>| unreadable.iter().any(|u| u.path == document.full_path());

        let only_self: Vec<_> = result
            .only_left
            .into_iter()
            .filter(|d| !is_unreadable(d))
            .collect();
        let only_other: Vec<_> = result
            .only_right
            .into_iter()
            .filter(|d| !is_unreadable(d))
            .collect();

        // A document that failed one comparison but matched another stays
        // matched and is not reported.
        let paired = |path: &Path| {
            result
                .pairs
                .iter()
                .any(|(a, b)| a.full_path() == path || b.full_path() == path)
        };
        let unreadable = unreadable
            .into_iter()
            .filter(|u| !paired(&u.path))
            .collect();

        DocumentMatch {
            pairs: result.pairs,
            only_self,
            only_other,
            unreadable,
        }
    }
}

impl FromIterator<AnnotatedDocument> for DocumentLibrary {
    fn from_iter<I: IntoIterator<Item = AnnotatedDocument>>(iter: I) -> Self {
        let mut library = DocumentLibrary::new();
        for document in iter {
            library.add_document(document);
        }
        library
    }
}
