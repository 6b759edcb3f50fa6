//! PocketBook e-reader connector (import only)
//!
//! Descriptor: `pocketbook:systemPath[:externalPath]`. PDFs are found by
//! walking both storage roots. The reader keeps one HTML annotation file per
//! document under `system/config/Active Contents`, named after the
//! document's filename and its PocketBook MD5.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use tokio::sync::OnceCell;
use walkdir::WalkDir;

use super::descriptor::LocationDescriptor;
use crate::annotations::{Annotation, AnnotationSet, LogicalPosition, PdfLoc, Position, Timestamp};
use crate::error::{ImportError, SyncError};
use crate::library::{AnnotatedDocument, DocumentLibrary, HashAlgorithm};
use crate::plugin::{Importer, ImporterFactory};

pub const SCHEME: &str = "pocketbook";

static HIGHLIGHT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r#"^<!-- type="32" level="1" position="(#pdfloc\([^)]+\))" endposition="(#pdfloc\([^)]+\))" --!>"#,
    )
    .expect("valid highlight regex")
});

static COMMENT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r##"^<font color="#000000" size="3" face="Arial">(.*)</font><br>"##)
        .expect("valid comment regex")
});

/// Storage roots of a PocketBook device, as named by a descriptor
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PocketbookLocation {
    pub system_path: PathBuf,
    pub external_path: Option<PathBuf>,
}

impl PocketbookLocation {
    /// Parse `pocketbook:systemPath[:externalPath]`. No I/O.
    pub fn parse(descriptor: &str) -> Option<Self> {
        let descriptor = LocationDescriptor::parse(descriptor)?;
        if descriptor.scheme() != SCHEME || !(2..=3).contains(&descriptor.token_count()) {
            return None;
        }

        Some(Self {
            system_path: PathBuf::from(descriptor.arg(0)?),
            external_path: descriptor.arg(1).map(PathBuf::from),
        })
    }

    pub fn annotations_dir(&self) -> PathBuf {
        self.system_path
            .join("system")
            .join("config")
            .join("Active Contents")
    }

    /// Annotation file of a document whose PocketBook MD5 is `hash`
    pub fn annotation_file(&self, filename: &str, hash: &str) -> PathBuf {
        self.annotations_dir()
            .join(format!("{}_A_{}.html", filename, hash))
    }

    /// Storage roots that exist, system first
    fn roots(&self) -> Result<Vec<PathBuf>, ImportError> {
        if !self.system_path.is_dir() {
            return Err(ImportError::StoreNotFound(format!(
                "PocketBook storage {}",
                self.system_path.display()
            )));
        }
        if !self.annotations_dir().is_dir() {
            return Err(ImportError::InvalidStore(format!(
                "{} has no annotation directory",
                self.system_path.display()
            )));
        }

        let mut roots = vec![self.system_path.clone()];
        match &self.external_path {
            Some(external) if external.is_dir() => roots.push(external.clone()),
            Some(external) => {
                tracing::warn!(path = %external.display(), "External storage not found, skipping");
            }
            None => {}
        }
        Ok(roots)
    }
}

fn is_pdf(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| e.eq_ignore_ascii_case("pdf"))
        .unwrap_or(false)
}

/// Walk the storage roots for PDFs. Blocking.
fn scan_library(location: &PocketbookLocation) -> Result<DocumentLibrary, ImportError> {
    let mut library = DocumentLibrary::new();

    for root in location.roots()? {
        for entry in WalkDir::new(&root).sort_by_file_name() {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    tracing::warn!(root = %root.display(), error = %e, "Skipping unreadable entry");
                    continue;
                }
            };

            if !entry.file_type().is_file() || !is_pdf(entry.path()) {
                continue;
            }

            match AnnotatedDocument::from_file(entry.path()) {
                Ok(document) => library.add_document(document),
                Err(e) => tracing::warn!(error = %e, "Skipping document"),
            }
        }
    }

    tracing::info!(documents = library.len(), "Scanned PocketBook storage");
    Ok(library)
}

/// Extract annotations from the contents of an annotation file.
///
/// A highlight's note, if any, is on the second line after it.
pub fn parse_annotation_file(content: &str, when: Timestamp) -> Result<Vec<Annotation>, ImportError> {
    let mut annotations = Vec::new();
    let mut lines = content.lines();

    while let Some(line) = lines.next() {
        let Some(captures) = HIGHLIGHT.captures(line) else {
            continue;
        };

        let start: PdfLoc = captures[1].parse()?;
        let end: PdfLoc = captures[2].parse()?;

        lines.next();
        let note = lines
            .next()
            .and_then(|line| COMMENT.captures(line))
            .map(|c| c[1].to_string());

        let position = Position::Logical(LogicalPosition::Range { start, end });
        let annotation = match note {
            Some(text) => Annotation::note(position, &text, when),
            None => Annotation::highlight(position, when),
        };
        annotations.push(annotation);
    }

    Ok(annotations)
}

fn into_import_error(err: SyncError) -> ImportError {
    match err {
        SyncError::DocumentUnreadable { path, source } => ImportError::DocumentUnreadable { path, source },
        SyncError::Import(e) => e,
        other => ImportError::Malformed(other.to_string()),
    }
}

/// Importer over a PocketBook device
#[derive(Debug)]
pub struct PocketbookImporter {
    location: PocketbookLocation,
    library: OnceCell<Arc<DocumentLibrary>>,
}

impl PocketbookImporter {
    pub fn new(location: PocketbookLocation) -> Self {
        Self {
            location,
            library: OnceCell::new(),
        }
    }

    pub fn location(&self) -> &PocketbookLocation {
        &self.location
    }
}

#[async_trait]
impl Importer for PocketbookImporter {
    fn name(&self) -> &str {
        SCHEME
    }

    async fn annotated_library(&self) -> Result<Arc<DocumentLibrary>, ImportError> {
        self.library
            .get_or_try_init(|| async {
                let location = self.location.clone();
                let library = tokio::task::spawn_blocking(move || scan_library(&location))
                    .await
                    .map_err(|e| ImportError::Malformed(format!("library scan failed: {}", e)))??;
                Ok(Arc::new(library))
            })
            .await
            .cloned()
    }

    async fn load_annotations(&self, document: &AnnotatedDocument) -> Result<AnnotationSet, ImportError> {
        let library = self.annotated_library().await?;
        let owned = library
            .get_by_path(document.full_path())
            .cloned()
            .ok_or_else(|| {
                ImportError::Malformed(format!(
                    "{} is not on this PocketBook",
                    document.full_path().display()
                ))
            })?;

        let hash = tokio::task::spawn_blocking(move || owned.hash(HashAlgorithm::PocketbookMd5))
            .await
            .map_err(|e| ImportError::Malformed(format!("hashing failed: {}", e)))?
            .map_err(into_import_error)?;

        let path = self.location.annotation_file(document.filename(), &hash);
        let metadata = match tokio::fs::metadata(&path).await {
            Ok(metadata) => metadata,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "No annotation file");
                return Ok(AnnotationSet::empty(document.full_path()));
            }
            Err(e) => return Err(e.into()),
        };

        // the file format carries no times; the file's mtime is the best guess
        let when = Timestamp::approximate(
            metadata
                .modified()
                .map(DateTime::<Utc>::from)
                .unwrap_or_else(|_| Utc::now()),
        );

        let bytes = tokio::fs::read(&path).await?;
        let annotations = parse_annotation_file(&String::from_utf8_lossy(&bytes), when)?;

        tracing::debug!(
            path = %document.full_path().display(),
            count = annotations.len(),
            "Read PocketBook annotations"
        );
        Ok(AnnotationSet::new(document.full_path(), annotations))
    }
}

/// Claims `pocketbook` descriptors for importing
#[derive(Debug, Default)]
pub struct PocketbookImporterFactory;

impl ImporterFactory for PocketbookImporterFactory {
    fn name(&self) -> &str {
        SCHEME
    }

    fn create_importer_for(&self, descriptor: &str) -> Option<Arc<dyn Importer>> {
        let location = PocketbookLocation::parse(descriptor)?;
        Some(Arc::new(PocketbookImporter::new(location)))
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::annotations::AnnotationKind;

    pub(crate) const ANNOTATION_FILE: &str = r##"<html><body>
<!-- type="32" level="1" position="#pdfloc(a1b2,3,10,4)" endposition="#pdfloc(a1b2,3,10,42)" --!>
<div class="bm">
<font color="#000000" size="3" face="Arial">worth re-reading</font><br>
</div>
<!-- type="32" level="1" position="#pdfloc(a1b2,5,2)" endposition="#pdfloc(a1b2,5,9)" --!>
<div class="bm">
<p>no note here</p>
</body></html>
"##;

    /// A PocketBook system root with one PDF in `books/`
    pub(crate) struct Device {
        pub root: tempfile::TempDir,
        pub pdf: PathBuf,
    }

    impl Device {
        pub fn descriptor(&self) -> String {
            format!("pocketbook:{}", self.root.path().display())
        }

        pub fn location(&self) -> PocketbookLocation {
            PocketbookLocation::parse(&self.descriptor()).unwrap()
        }

        pub fn write_annotations(&self, content: &str) {
            let hash = HashAlgorithm::PocketbookMd5.compute(&self.pdf).unwrap();
            let filename = self.pdf.file_name().unwrap().to_str().unwrap();
            std::fs::write(self.location().annotation_file(filename, &hash), content).unwrap();
        }
    }

    pub(crate) fn device(pdf_name: &str, pdf_content: &[u8]) -> Device {
        let root = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(root.path().join("system/config/Active Contents")).unwrap();
        std::fs::create_dir_all(root.path().join("books")).unwrap();
        let pdf = root.path().join("books").join(pdf_name);
        std::fs::write(&pdf, pdf_content).unwrap();
        Device { root, pdf }
    }

    #[test]
    fn test_parse_location() {
        let location = PocketbookLocation::parse("pocketbook:/mnt/ext1:/mnt/ext2").unwrap();
        assert_eq!(location.system_path, PathBuf::from("/mnt/ext1"));
        assert_eq!(location.external_path, Some(PathBuf::from("/mnt/ext2")));
        assert_eq!(
            location.annotations_dir(),
            PathBuf::from("/mnt/ext1/system/config/Active Contents")
        );

        assert!(PocketbookLocation::parse("pocketbook").is_none());
        assert!(PocketbookLocation::parse("pocketbook:").is_none());
        assert!(PocketbookLocation::parse("pocketbook:/a:/b:/c").is_none());
        assert!(PocketbookLocation::parse("mendeley:/a").is_none());
    }

    #[test]
    fn test_parse_annotation_file() {
        let when = Timestamp::approximate(Utc::now());
        let annotations = parse_annotation_file(ANNOTATION_FILE, when).unwrap();
        assert_eq!(annotations.len(), 2);

        assert_eq!(annotations[0].kind, AnnotationKind::Note);
        assert_eq!(annotations[0].text.as_deref(), Some("worth re-reading"));
        assert_eq!(annotations[0].page(), 3);
        assert!(!annotations[0].created.exact);

        assert_eq!(annotations[1].kind, AnnotationKind::Highlight);
        assert_eq!(annotations[1].text, None);
        assert_eq!(annotations[1].page(), 5);
    }

    #[test]
    fn test_malformed_pdfloc_rejected() {
        let content = r##"<!-- type="32" level="1" position="#pdfloc(a1b2,x)" endposition="#pdfloc(a1b2,3)" --!>"##;
        let err = parse_annotation_file(content, Timestamp::approximate(Utc::now())).unwrap_err();
        assert!(matches!(err, ImportError::Malformed(_)));
    }

    #[tokio::test]
    async fn test_scan_finds_pdfs_case_insensitively() {
        let device = device("a.pdf", b"%PDF-a");
        std::fs::write(device.root.path().join("books/B.PDF"), b"%PDF-b").unwrap();
        std::fs::write(device.root.path().join("books/notes.txt"), b"text").unwrap();

        let importer = PocketbookImporter::new(device.location());
        let library = importer.annotated_library().await.unwrap();

        let names: Vec<&str> = library.documents().iter().map(|d| d.filename()).collect();
        assert_eq!(names, vec!["B.PDF", "a.pdf"]);
    }

    #[tokio::test]
    async fn test_missing_external_storage_is_skipped() {
        let device = device("a.pdf", b"%PDF-a");
        let descriptor = format!("{}:/nonexistent/sdcard", device.descriptor());
        let importer = PocketbookImporter::new(PocketbookLocation::parse(&descriptor).unwrap());

        assert_eq!(importer.annotated_library().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_external_storage_scanned() {
        let device = device("a.pdf", b"%PDF-a");
        let sdcard = tempfile::tempdir().unwrap();
        std::fs::write(sdcard.path().join("c.pdf"), b"%PDF-c").unwrap();

        let descriptor = format!("{}:{}", device.descriptor(), sdcard.path().display());
        let importer = PocketbookImporter::new(PocketbookLocation::parse(&descriptor).unwrap());
        let library = importer.annotated_library().await.unwrap();

        assert_eq!(library.len(), 2);
        assert!(library.get_by_path(sdcard.path().join("c.pdf")).is_some());
    }

    #[tokio::test]
    async fn test_missing_system_path() {
        let importer = PocketbookImporter::new(PocketbookLocation::parse("pocketbook:/nonexistent/pb").unwrap());
        let err = importer.annotated_library().await.unwrap_err();
        assert!(matches!(err, ImportError::StoreNotFound(_)));
    }

    #[tokio::test]
    async fn test_load_annotations() {
        let device = device("paper.pdf", b"%PDF-1.4 pocketbook");
        device.write_annotations(ANNOTATION_FILE);

        let importer = PocketbookImporter::new(device.location());
        let library = importer.annotated_library().await.unwrap();
        let document = library.get_by_path(&device.pdf).unwrap();

        let set = importer.annotations(document).await.unwrap();
        assert_eq!(set.len(), 2);
        assert!(document.known_hash(HashAlgorithm::PocketbookMd5).is_some());
    }

    #[tokio::test]
    async fn test_missing_annotation_file_means_no_annotations() {
        let device = device("paper.pdf", b"%PDF-1.4 pocketbook");
        let importer = PocketbookImporter::new(device.location());
        let library = importer.annotated_library().await.unwrap();
        let document = library.get_by_path(&device.pdf).unwrap();

        let set = importer.annotations(document).await.unwrap();
        assert!(set.is_empty());
    }
}
