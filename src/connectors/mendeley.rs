//! Mendeley Desktop connector
//!
//! Reads documents, highlight rectangles and notes from the Mendeley Desktop
//! SQLite database and writes new highlights and notes back into it. A note
//! attached to a highlight is stored as a `FileNotes` row on the top-left
//! corner of the highlight's first box.
//!
//! Descriptor: `mendeley[:dataDir[:accountId]]`. Without a data directory
//! the platform default is used; without an account the connector opens
//! `online.sqlite`, falling back to the first account database it finds.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteConnection, SqlitePool, SqlitePoolOptions};
use tokio::sync::OnceCell;
use uuid::Uuid;

use super::descriptor::LocationDescriptor;
use crate::annotations::{
    Annotation, AnnotationKind, AnnotationSet, BoxPosition, PageBox, Position, Representation, Timestamp,
    BOX_TOLERANCE,
};
use crate::error::{ExportError, ImportError};
use crate::library::{AnnotatedDocument, DocumentLibrary, HashAlgorithm};
use crate::plugin::{Exporter, ExporterFactory, Importer, ImporterFactory};

pub const SCHEME: &str = "mendeley";

/// First 16 bytes of every SQLite 3 database file
const SQLITE_HEADER: &[u8; 16] = b"SQLite format 3\0";

const DEFAULT_DATABASE: &str = "online.sqlite";
const MONITOR_DATABASE: &str = "monitor.sqlite";

/// Color Mendeley Desktop gives new highlights
const HIGHLIGHT_COLOR: &str = "#fff5ad";

/// Where a Mendeley database lives, as named by a descriptor
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MendeleyLocation {
    pub data_dir: PathBuf,
    pub account: Option<String>,
}

impl MendeleyLocation {
    /// Parse `mendeley[:dataDir[:accountId]]`. No I/O.
    pub fn parse(descriptor: &str) -> Option<Self> {
        let descriptor = LocationDescriptor::parse(descriptor)?;
        if descriptor.scheme() != SCHEME || descriptor.token_count() > 3 {
            return None;
        }

        let data_dir = match descriptor.arg(0) {
            Some(dir) => PathBuf::from(dir),
            None => default_data_dir()?,
        };

        Some(Self {
            data_dir,
            account: descriptor.arg(1).map(str::to_string),
        })
    }

    /// Find the database file and check it really is SQLite
    pub async fn locate_database(&self) -> Result<PathBuf, ImportError> {
        if !tokio::fs::try_exists(&self.data_dir).await? {
            return Err(ImportError::StoreNotFound(format!(
                "Mendeley data directory {}",
                self.data_dir.display()
            )));
        }

        let file_name = match &self.account {
            Some(account) => format!("{}@www.mendeley.com.sqlite", account),
            None => DEFAULT_DATABASE.to_string(),
        };
        let mut path = self.data_dir.join(&file_name);

        if !tokio::fs::try_exists(&path).await? {
            if self.account.is_some() {
                return Err(ImportError::StoreNotFound(format!(
                    "Mendeley database {}",
                    path.display()
                )));
            }
            path = self.find_any_database().await?;
        }

        let mut header = [0u8; 16];
        let mut file = tokio::fs::File::open(&path).await?;
        tokio::io::AsyncReadExt::read_exact(&mut file, &mut header)
            .await
            .map_err(|_| ImportError::InvalidStore(format!("{} is too short", path.display())))?;
        if &header != SQLITE_HEADER {
            return Err(ImportError::InvalidStore(format!(
                "{} is not an SQLite database",
                path.display()
            )));
        }

        Ok(path)
    }

    async fn find_any_database(&self) -> Result<PathBuf, ImportError> {
        let mut entries = tokio::fs::read_dir(&self.data_dir).await?;
        let mut candidates = Vec::new();

        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name().to_string_lossy().into_owned();
            if name != MONITOR_DATABASE && name.ends_with(".sqlite") {
                candidates.push(entry.path());
            }
        }

        candidates.sort();
        candidates.into_iter().next().ok_or_else(|| {
            ImportError::StoreNotFound(format!(
                "no Mendeley database in {}",
                self.data_dir.display()
            ))
        })
    }
}

/// Platform default for the Mendeley Desktop data directory
fn default_data_dir() -> Option<PathBuf> {
    if cfg!(target_os = "windows") {
        dirs::data_local_dir().map(|d| d.join("Mendeley Ltd.").join("Mendeley Desktop"))
    } else if cfg!(target_os = "macos") {
        dirs::home_dir().map(|h| h.join("Library/Application Support/Mendeley Desktop"))
    } else if cfg!(target_os = "linux") {
        dirs::home_dir().map(|h| h.join(".local/share/data/Mendeley Ltd./Mendeley Desktop"))
    } else {
        None
    }
}

/// Turn a Mendeley `localUrl` (`file:///...`) into a filesystem path
fn url_to_path(url: &str) -> Option<PathBuf> {
    let encoded = url.strip_prefix("file://")?;
    let decoded = urlencoding::decode(encoded).ok()?.replace("//", "/");

    if cfg!(windows) {
        // file:///C:/Users/... -> C:\Users\...
        let trimmed = decoded.strip_prefix('/').unwrap_or(&decoded);
        Some(PathBuf::from(trimmed.replace('/', "\\")))
    } else {
        Some(PathBuf::from(decoded))
    }
}

async fn open_pool(path: &Path) -> Result<SqlitePool, sqlx::Error> {
    let options = SqliteConnectOptions::new()
        .filename(path)
        .create_if_missing(false);

    SqlitePoolOptions::new()
        .max_connections(1)
        .connect_with(options)
        .await
}

/// Lazily opened connection to one Mendeley database
#[derive(Debug)]
struct MendeleyStore {
    location: MendeleyLocation,
    pool: OnceCell<SqlitePool>,
}

impl MendeleyStore {
    fn new(location: MendeleyLocation) -> Self {
        Self {
            location,
            pool: OnceCell::new(),
        }
    }

    async fn pool(&self) -> Result<&SqlitePool, ImportError> {
        self.pool
            .get_or_try_init(|| async {
                let path = self.location.locate_database().await?;
                tracing::info!(database = %path.display(), "Opening Mendeley database");
                Ok(open_pool(&path).await?)
            })
            .await
    }
}

#[derive(sqlx::FromRow)]
struct DocumentFileRow {
    #[sqlx(rename = "documentId")]
    document_id: i64,
    hash: String,
    #[sqlx(rename = "localUrl")]
    local_url: String,
}

#[derive(sqlx::FromRow)]
struct NoteRow {
    #[sqlx(rename = "createdTime")]
    created_time: Option<String>,
    page: i64,
    x: f64,
    y: f64,
    note: String,
}

#[derive(sqlx::FromRow)]
struct HighlightRectRow {
    id: i64,
    #[sqlx(rename = "createdTime")]
    created_time: Option<String>,
    page: i64,
    x1: f64,
    y1: f64,
    x2: f64,
    y2: f64,
}

fn parse_created_time(value: Option<&str>) -> Timestamp {
    match value.map(DateTime::parse_from_rfc3339) {
        Some(Ok(at)) => Timestamp::exact(at.with_timezone(&Utc)),
        _ => Timestamp::approximate(Utc::now()),
    }
}

/// Importer over a Mendeley database
#[derive(Debug)]
pub struct MendeleyImporter {
    store: MendeleyStore,
    library: OnceCell<Arc<DocumentLibrary>>,
}

impl MendeleyImporter {
    pub fn new(location: MendeleyLocation) -> Self {
        Self {
            store: MendeleyStore::new(location),
            library: OnceCell::new(),
        }
    }

    async fn read_library(&self) -> Result<DocumentLibrary, ImportError> {
        let pool = self.store.pool().await?;

        let rows = sqlx::query_as::<_, DocumentFileRow>(
            r#"
            SELECT df.documentId, df.hash, f.localUrl
            FROM DocumentFiles df
            JOIN Files f ON df.hash = f.hash
            WHERE df.unlinked = 'false' AND f.localUrl != ''
            "#,
        )
        .fetch_all(pool)
        .await?;

        let mut library = DocumentLibrary::new();
        for row in rows {
            let Some(path) = url_to_path(&row.local_url) else {
                tracing::warn!(url = %row.local_url, "Skipping document with unsupported URL");
                continue;
            };

            match AnnotatedDocument::from_file(path) {
                Ok(document) => library.add_document(
                    document
                        .with_store_key(row.document_id.to_string())
                        .with_hash(HashAlgorithm::Sha1, row.hash),
                ),
                Err(e) => {
                    tracing::warn!(url = %row.local_url, error = %e, "Skipping missing document");
                }
            }
        }

        tracing::info!(documents = library.len(), "Imported Mendeley library");
        Ok(library)
    }
}

#[async_trait]
impl Importer for MendeleyImporter {
    fn name(&self) -> &str {
        SCHEME
    }

    async fn annotated_library(&self) -> Result<Arc<DocumentLibrary>, ImportError> {
        self.library
            .get_or_try_init(|| async { self.read_library().await.map(Arc::new) })
            .await
            .cloned()
    }

    async fn load_annotations(&self, document: &AnnotatedDocument) -> Result<AnnotationSet, ImportError> {
        let document_id = document.store_key().ok_or_else(|| {
            ImportError::Malformed(format!(
                "{} is not a Mendeley document",
                document.full_path().display()
            ))
        })?;
        let pool = self.store.pool().await?;

        let rows = sqlx::query_as::<_, HighlightRectRow>(
            r#"
            SELECT h.id, h.createdTime, hr.page, hr.x1, hr.y1, hr.x2, hr.y2
            FROM FileHighlights h
            JOIN FileHighlightRects hr ON h.id = hr.highlightId
            WHERE h.unlinked = 'false' AND h.documentId = ?
            ORDER BY h.id, hr.id
            "#,
        )
        .bind(document_id)
        .fetch_all(pool)
        .await?;

        // rows arrive grouped by highlight id
        let mut highlights: Vec<(i64, Timestamp, Vec<PageBox>)> = Vec::new();
        for row in rows {
            let page_box = PageBox::new(row.page.max(0) as u32, row.x1, row.y1, row.x2, row.y2);
            match highlights.last_mut() {
                Some((id, _, boxes)) if *id == row.id => boxes.push(page_box),
                _ => highlights.push((
                    row.id,
                    parse_created_time(row.created_time.as_deref()),
                    vec![page_box],
                )),
            }
        }

        let mut annotations: Vec<Annotation> = highlights
            .into_iter()
            .filter_map(|(_, created, boxes)| {
                let position = BoxPosition::range(boxes)?;
                Some(
                    Annotation::highlight(Position::Boxes(position), created)
                        .with_modified(Timestamp::approximate(created.at)),
                )
            })
            .collect();

        let notes = sqlx::query_as::<_, NoteRow>(
            r#"
            SELECT createdTime, page, x, y, note
            FROM FileNotes
            WHERE unlinked = 'false' AND documentId = ?
            ORDER BY id
            "#,
        )
        .bind(document_id)
        .fetch_all(pool)
        .await?;

        for note in notes {
            let page = note.page.max(0) as u32;
            let anchor = annotations
                .iter_mut()
                .find(|a| a.text.is_none() && anchored_at(a, page, note.x, note.y));
            match anchor {
                Some(highlight) => {
                    highlight.kind = AnnotationKind::Note;
                    highlight.text = Some(note.note);
                }
                None => {
                    let position = Position::Boxes(BoxPosition::Point {
                        page,
                        x: note.x,
                        y: note.y,
                    });
                    let created = parse_created_time(note.created_time.as_deref());
                    annotations.push(Annotation::note(position, &note.note, created));
                }
            }
        }

        Ok(AnnotationSet::new(document.full_path(), annotations))
    }
}

/// A note written alongside a highlight sits on the top-left corner of the
/// highlight's first box
fn anchored_at(annotation: &Annotation, page: u32, x: f64, y: f64) -> bool {
    match &annotation.position {
        Position::Boxes(BoxPosition::Range { boxes }) => boxes.first().is_some_and(|b| {
            b.page == page && (b.x1 - x).abs() <= BOX_TOLERANCE && (b.y1 - y).abs() <= BOX_TOLERANCE
        }),
        _ => false,
    }
}

/// One annotation as it will be written
enum Pending<'a> {
    Highlight { boxes: &'a [PageBox], note: Option<&'a str> },
    Note { page: u32, x: f64, y: f64, text: &'a str },
}

/// Columns shared by every row of one export
struct RowContext<'a> {
    document_id: &'a str,
    file_hash: String,
    created: String,
    profile_uuid: Option<String>,
}

impl RowContext<'_> {
    async fn insert_highlight(&self, conn: &mut SqliteConnection, boxes: &[PageBox]) -> Result<(), sqlx::Error> {
        let uuid = Uuid::new_v4().to_string();

        let highlight_id = sqlx::query(
            r#"
            INSERT INTO FileHighlights (
                author, uuid, documentId, fileHash, createdTime, unlinked, color, profileUuid
            ) VALUES ('', ?, ?, ?, ?, 'false', ?, ?)
            "#,
        )
        .bind(&uuid)
        .bind(self.document_id)
        .bind(&self.file_hash)
        .bind(&self.created)
        .bind(HIGHLIGHT_COLOR)
        .bind(&self.profile_uuid)
        .execute(&mut *conn)
        .await?
        .last_insert_rowid();

        sqlx::query("INSERT INTO RemoteFileHighlights (uuid, status, revision) VALUES (?, 'ObjectCreated', 0)")
            .bind(&uuid)
            .execute(&mut *conn)
            .await?;

        for page_box in boxes {
            sqlx::query(
                r#"
                INSERT INTO FileHighlightRects (highlightId, page, x1, y1, x2, y2)
                VALUES (?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(highlight_id)
            .bind(page_box.page as i64)
            .bind(page_box.x1)
            .bind(page_box.y1)
            .bind(page_box.x2)
            .bind(page_box.y2)
            .execute(&mut *conn)
            .await?;
        }
        Ok(())
    }

    async fn insert_note(
        &self,
        conn: &mut SqliteConnection,
        page: u32,
        x: f64,
        y: f64,
        text: &str,
    ) -> Result<(), sqlx::Error> {
        let uuid = Uuid::new_v4().to_string();

        sqlx::query(
            r#"
            INSERT INTO FileNotes (
                author, uuid, documentId, fileHash, page, x, y, note,
                modifiedTime, createdTime, unlinked, color, profileUuid
            ) VALUES ('', ?, ?, ?, ?, ?, ?, ?, ?, ?, 'false', ?, ?)
            "#,
        )
        .bind(&uuid)
        .bind(self.document_id)
        .bind(&self.file_hash)
        .bind(page as i64)
        .bind(x)
        .bind(y)
        .bind(text)
        .bind(&self.created)
        .bind(&self.created)
        .bind(HIGHLIGHT_COLOR)
        .bind(&self.profile_uuid)
        .execute(&mut *conn)
        .await?;

        sqlx::query("INSERT INTO RemoteFileNotes (uuid, status, revision) VALUES (?, 'ObjectCreated', 0)")
            .bind(&uuid)
            .execute(&mut *conn)
            .await?;
        Ok(())
    }
}

/// Exporter writing highlights into a Mendeley database
#[derive(Debug)]
pub struct MendeleyExporter {
    store: MendeleyStore,
}

impl MendeleyExporter {
    pub fn new(location: MendeleyLocation) -> Self {
        Self {
            store: MendeleyStore::new(location),
        }
    }

    async fn pool(&self) -> Result<&SqlitePool, ExportError> {
        self.store.pool().await.map_err(|e| match e {
            ImportError::Database(e) => ExportError::Database(e),
            ImportError::Io(e) => ExportError::Io(e),
            other => ExportError::StoreNotFound(other.to_string()),
        })
    }
}

#[async_trait]
impl Exporter for MendeleyExporter {
    fn name(&self) -> &str {
        SCHEME
    }

    fn representation(&self) -> Option<Representation> {
        Some(Representation::Boxes)
    }

    async fn add_annotations_to_document(
        &self,
        document: &AnnotatedDocument,
        annotations: &[Annotation],
    ) -> Result<usize, ExportError> {
        let foreign = || ExportError::ForeignDocument(document.full_path().display().to_string());
        let document_id = document.store_key().ok_or_else(foreign)?;
        let file_hash = document.known_hash(HashAlgorithm::Sha1).ok_or_else(foreign)?;

        let mut pending: Vec<Pending<'_>> = Vec::with_capacity(annotations.len());
        for annotation in annotations {
            let text = annotation.text.as_deref();
            match &annotation.position {
                Position::Boxes(BoxPosition::Range { boxes }) if !boxes.is_empty() => {
                    pending.push(Pending::Highlight { boxes, note: text });
                }
                Position::Boxes(BoxPosition::Range { .. }) => {
                    tracing::warn!(
                        path = %document.full_path().display(),
                        "Skipping highlight without boxes"
                    );
                }
                Position::Boxes(BoxPosition::Point { page, x, y }) => match text {
                    Some(text) => pending.push(Pending::Note {
                        page: *page,
                        x: *x,
                        y: *y,
                        text,
                    }),
                    None => {
                        tracing::warn!(
                            path = %document.full_path().display(),
                            page,
                            "Mendeley has no bookmarks, skipping point annotation without text"
                        );
                    }
                },
                Position::Logical(_) => {
                    return Err(ExportError::MissingRepresentation("bounding box"));
                }
            }
        }

        if pending.is_empty() {
            return Ok(0);
        }

        let pool = self.pool().await?;
        let mut tx = pool.begin().await?;

        let profile_uuid: Option<String> = sqlx::query_scalar(
            "SELECT profileUuid FROM FileHighlights WHERE profileUuid IS NOT NULL ORDER BY id DESC LIMIT 1",
        )
        .fetch_optional(&mut *tx)
        .await?;

        let rows = RowContext {
            document_id,
            file_hash,
            created: Utc::now().format("%Y-%m-%dT%H:%M:%SZ").to_string(),
            profile_uuid,
        };

        for item in &pending {
            match *item {
                Pending::Highlight { boxes, note } => {
                    rows.insert_highlight(&mut *tx, boxes).await?;
                    if let (Some(text), Some(first)) = (note, boxes.first()) {
                        rows.insert_note(&mut *tx, first.page, first.x1, first.y1, text).await?;
                    }
                }
                Pending::Note { page, x, y, text } => {
                    rows.insert_note(&mut *tx, page, x, y, text).await?;
                }
            }
        }

        tx.commit().await?;

        tracing::info!(
            path = %document.full_path().display(),
            count = pending.len(),
            "Added annotations to Mendeley document"
        );
        Ok(pending.len())
    }
}

/// Claims `mendeley` descriptors for importing
#[derive(Debug, Default)]
pub struct MendeleyImporterFactory;

impl ImporterFactory for MendeleyImporterFactory {
    fn name(&self) -> &str {
        SCHEME
    }

    fn create_importer_for(&self, descriptor: &str) -> Option<Arc<dyn Importer>> {
        let location = MendeleyLocation::parse(descriptor)?;
        Some(Arc::new(MendeleyImporter::new(location)))
    }
}

/// Claims `mendeley` descriptors for exporting
#[derive(Debug, Default)]
pub struct MendeleyExporterFactory;

impl ExporterFactory for MendeleyExporterFactory {
    fn name(&self) -> &str {
        SCHEME
    }

    fn create_exporter_for(&self, descriptor: &str) -> Option<Arc<dyn Exporter>> {
        let location = MendeleyLocation::parse(descriptor)?;
        Some(Arc::new(MendeleyExporter::new(location)))
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::io::Write;

    use super::*;

    pub(crate) const SCHEMA: &str = r#"
        CREATE TABLE Files (hash TEXT PRIMARY KEY, localUrl TEXT NOT NULL);
        CREATE TABLE DocumentFiles (
            documentId INTEGER NOT NULL,
            hash TEXT NOT NULL,
            unlinked TEXT NOT NULL DEFAULT 'false'
        );
        CREATE TABLE FileHighlights (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            author TEXT,
            uuid TEXT NOT NULL,
            documentId INTEGER NOT NULL,
            fileHash TEXT,
            createdTime TEXT,
            unlinked TEXT NOT NULL DEFAULT 'false',
            color TEXT,
            profileUuid TEXT
        );
        CREATE TABLE FileHighlightRects (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            highlightId INTEGER NOT NULL,
            page INTEGER NOT NULL,
            x1 REAL, y1 REAL, x2 REAL, y2 REAL
        );
        CREATE TABLE RemoteFileHighlights (uuid TEXT, status TEXT, revision INTEGER);
        CREATE TABLE FileNotes (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            author TEXT,
            uuid TEXT NOT NULL,
            documentId INTEGER NOT NULL,
            fileHash TEXT,
            page INTEGER NOT NULL,
            x REAL NOT NULL,
            y REAL NOT NULL,
            note TEXT NOT NULL,
            modifiedTime TEXT NOT NULL,
            createdTime TEXT NOT NULL,
            unlinked TEXT NOT NULL DEFAULT 'false',
            baseNote TEXT,
            color TEXT,
            profileUuid TEXT
        );
        CREATE TABLE RemoteFileNotes (uuid TEXT, status TEXT, revision INTEGER);
    "#;

    /// A Mendeley data directory with one database and one linked PDF
    pub(crate) struct Fixture {
        pub dir: tempfile::TempDir,
        pub database: PathBuf,
        pub pdf: PathBuf,
    }

    impl Fixture {
        pub fn descriptor(&self) -> String {
            format!("mendeley:{}", self.dir.path().display())
        }
    }

    pub(crate) async fn fixture(pdf_name: &str, pdf_content: &[u8]) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let pdf = dir.path().join(pdf_name);
        std::fs::File::create(&pdf).unwrap().write_all(pdf_content).unwrap();

        let database = dir.path().join(DEFAULT_DATABASE);
        let options = SqliteConnectOptions::new()
            .filename(&database)
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new().connect_with(options).await.unwrap();

        sqlx::Executor::execute(&pool, SCHEMA).await.unwrap();

        let url = format!("file://{}", urlencoding::encode(&pdf.display().to_string()).replace("%2F", "/"));
        sqlx::query("INSERT INTO Files (hash, localUrl) VALUES ('sha1-of-pdf', ?)")
            .bind(&url)
            .execute(&pool)
            .await
            .unwrap();
        sqlx::query("INSERT INTO DocumentFiles (documentId, hash) VALUES (7, 'sha1-of-pdf')")
            .execute(&pool)
            .await
            .unwrap();

        // one two-line highlight on page 3
        sqlx::query(
            "INSERT INTO FileHighlights (id, uuid, documentId, fileHash, createdTime, profileUuid)
             VALUES (1, 'u-1', 7, 'sha1-of-pdf', '2015-06-01T10:00:00Z', 'profile-1')",
        )
        .execute(&pool)
        .await
        .unwrap();
        sqlx::query(
            "INSERT INTO FileHighlightRects (highlightId, page, x1, y1, x2, y2) VALUES
             (1, 3, 10.0, 20.0, 200.0, 32.0),
             (1, 3, 10.0, 34.0, 120.0, 46.0)",
        )
        .execute(&pool)
        .await
        .unwrap();

        pool.close().await;

        Fixture { dir, database, pdf }
    }

    #[test]
    fn test_parse_location() {
        let location = MendeleyLocation::parse("mendeley:/data/mendeley:abc").unwrap();
        assert_eq!(location.data_dir, PathBuf::from("/data/mendeley"));
        assert_eq!(location.account.as_deref(), Some("abc"));

        let location = MendeleyLocation::parse("mendeley:/data").unwrap();
        assert_eq!(location.account, None);

        assert!(MendeleyLocation::parse("pocketbook:/mnt").is_none());
        assert!(MendeleyLocation::parse("mendeley:/a:b:c").is_none());
    }

    #[test]
    fn test_factory_does_no_io() {
        let factory = MendeleyImporterFactory;
        assert!(factory
            .create_importer_for("mendeley:/does/not/exist")
            .is_some());
    }

    #[test]
    fn test_url_to_path() {
        let path = url_to_path("file:///home/me/My%20Papers/a.pdf").unwrap();
        if !cfg!(windows) {
            assert_eq!(path, PathBuf::from("/home/me/My Papers/a.pdf"));
        }
        assert!(url_to_path("http://example.com/a.pdf").is_none());
    }

    #[tokio::test]
    async fn test_locate_database_checks_header() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("online.sqlite"), b"definitely not sqlite").unwrap();

        let location = MendeleyLocation {
            data_dir: dir.path().to_path_buf(),
            account: None,
        };
        let err = location.locate_database().await.unwrap_err();
        assert!(matches!(err, ImportError::InvalidStore(_)));
    }

    #[tokio::test]
    async fn test_locate_database_falls_back_to_account_file() {
        let f = fixture("a.pdf", b"%PDF").await;
        let account_db = f.dir.path().join("someone@www.mendeley.com.sqlite");
        std::fs::rename(&f.database, &account_db).unwrap();
        std::fs::write(f.dir.path().join(MONITOR_DATABASE), b"x").unwrap();

        let location = MendeleyLocation::parse(&f.descriptor()).unwrap();
        assert_eq!(location.locate_database().await.unwrap(), account_db);
    }

    #[tokio::test]
    async fn test_missing_data_dir() {
        let importer = MendeleyImporter::new(MendeleyLocation {
            data_dir: PathBuf::from("/nonexistent/mendeley"),
            account: None,
        });
        let err = importer.annotated_library().await.unwrap_err();
        assert!(matches!(err, ImportError::StoreNotFound(_)));
    }

    #[tokio::test]
    async fn test_import_library_and_highlights() {
        let f = fixture("paper.pdf", b"%PDF-1.4 test").await;
        let importer = MendeleyImporter::new(MendeleyLocation::parse(&f.descriptor()).unwrap());

        let library = importer.annotated_library().await.unwrap();
        assert_eq!(library.len(), 1);

        let document = library.get_by_path(&f.pdf).unwrap();
        assert_eq!(document.store_key(), Some("7"));
        assert_eq!(document.filesize(), 13);
        assert_eq!(document.known_hash(HashAlgorithm::Sha1).as_deref(), Some("sha1-of-pdf"));

        let set = importer.annotations(document).await.unwrap();
        assert_eq!(set.len(), 1);

        let highlight = &set.annotations()[0];
        assert_eq!(highlight.page(), 3);
        assert!(highlight.created.exact);
        match &highlight.position {
            Position::Boxes(BoxPosition::Range { boxes }) => assert_eq!(boxes.len(), 2),
            other => panic!("unexpected position {:?}", other),
        }

        // memoized
        let again = importer.annotated_library().await.unwrap();
        assert!(Arc::ptr_eq(&library, &again));
    }

    #[tokio::test]
    async fn test_export_highlight_round_trip() {
        let f = fixture("paper.pdf", b"%PDF-1.4 test").await;
        let location = MendeleyLocation::parse(&f.descriptor()).unwrap();
        let importer = MendeleyImporter::new(location.clone());
        let exporter = MendeleyExporter::new(location);

        let library = importer.annotated_library().await.unwrap();
        let document = library.get_by_path(&f.pdf).unwrap();

        let new_highlight = Annotation::highlight(
            Position::Boxes(BoxPosition::Range {
                boxes: vec![PageBox::new(1, 5.0, 5.0, 50.0, 15.0)],
            }),
            Timestamp::exact(Utc::now()),
        );
        let written = exporter
            .add_annotations_to_document(document, &[new_highlight])
            .await
            .unwrap();
        assert_eq!(written, 1);

        let set = importer.load_annotations(document).await.unwrap();
        let pages: Vec<u32> = set.annotations().iter().map(|a| a.page()).collect();
        assert_eq!(pages, vec![3, 1]);

        let pool = exporter.pool().await.unwrap();
        let (profile, color): (Option<String>, String) = sqlx::query_as(
            "SELECT profileUuid, color FROM FileHighlights ORDER BY id DESC LIMIT 1",
        )
        .fetch_one(pool)
        .await
        .unwrap();
        assert_eq!(profile.as_deref(), Some("profile-1"));
        assert_eq!(color, HIGHLIGHT_COLOR);

        let remote: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM RemoteFileHighlights")
            .fetch_one(pool)
            .await
            .unwrap();
        assert_eq!(remote, 1);
    }

    #[tokio::test]
    async fn test_export_note_text_round_trip() {
        let f = fixture("paper.pdf", b"%PDF-1.4 test").await;
        let location = MendeleyLocation::parse(&f.descriptor()).unwrap();
        let importer = MendeleyImporter::new(location.clone());
        let exporter = MendeleyExporter::new(location);

        let library = importer.annotated_library().await.unwrap();
        let document = library.get_by_path(&f.pdf).unwrap();

        let commented = Annotation::note(
            Position::Boxes(BoxPosition::Range {
                boxes: vec![
                    PageBox::new(2, 5.0, 5.0, 50.0, 15.0),
                    PageBox::new(2, 5.0, 17.0, 30.0, 27.0),
                ],
            }),
            "check this",
            Timestamp::exact(Utc::now()),
        );
        let sticky = Annotation::note(
            Position::Boxes(BoxPosition::Point { page: 4, x: 80.0, y: 90.0 }),
            "margin note",
            Timestamp::exact(Utc::now()),
        );
        let written = exporter
            .add_annotations_to_document(document, &[commented.clone(), sticky.clone()])
            .await
            .unwrap();
        assert_eq!(written, 2);

        let set = importer.load_annotations(document).await.unwrap();
        assert_eq!(set.len(), 3);

        let on_page_2 = set.annotations().iter().find(|a| a.page() == 2).unwrap();
        assert_eq!(on_page_2.kind, AnnotationKind::Note);
        assert_eq!(on_page_2.text.as_deref(), Some("check this"));
        assert!(on_page_2.position.same_as(&commented.position));

        let on_page_4 = set.annotations().iter().find(|a| a.page() == 4).unwrap();
        assert_eq!(on_page_4.text.as_deref(), Some("margin note"));
        assert!(on_page_4.position.same_as(&sticky.position));

        // the fixture highlight has no note
        let on_page_3 = set.annotations().iter().find(|a| a.page() == 3).unwrap();
        assert_eq!(on_page_3.text, None);

        let pool = exporter.pool().await.unwrap();
        let remote: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM RemoteFileNotes")
            .fetch_one(pool)
            .await
            .unwrap();
        assert_eq!(remote, 2);
    }

    #[tokio::test]
    async fn test_export_skips_empty_ranges_and_bare_points() {
        let f = fixture("paper.pdf", b"%PDF-1.4 test").await;
        let exporter = MendeleyExporter::new(MendeleyLocation::parse(&f.descriptor()).unwrap());
        let document = AnnotatedDocument::new(&f.pdf, 13)
            .with_store_key("7")
            .with_hash(HashAlgorithm::Sha1, "sha1-of-pdf");

        let now = Timestamp::exact(Utc::now());
        let empty = Annotation::highlight(Position::Boxes(BoxPosition::Range { boxes: Vec::new() }), now);
        let bookmark = Annotation::bookmark(Position::Boxes(BoxPosition::Point { page: 1, x: 0.0, y: 0.0 }), now);

        let written = exporter
            .add_annotations_to_document(&document, &[empty, bookmark])
            .await
            .unwrap();
        assert_eq!(written, 0);

        let pool = exporter.pool().await.unwrap();
        let highlights: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM FileHighlights")
            .fetch_one(pool)
            .await
            .unwrap();
        assert_eq!(highlights, 1);
    }

    #[tokio::test]
    async fn test_export_rejects_logical_positions() {
        let f = fixture("paper.pdf", b"%PDF-1.4 test").await;
        let exporter = MendeleyExporter::new(MendeleyLocation::parse(&f.descriptor()).unwrap());
        let document = AnnotatedDocument::new(&f.pdf, 13)
            .with_store_key("7")
            .with_hash(HashAlgorithm::Sha1, "sha1-of-pdf");

        let annotation = Annotation::highlight(
            Position::Logical(crate::annotations::LogicalPosition::Point {
                at: "#pdfloc(ab,1,2)".parse().unwrap(),
            }),
            Timestamp::exact(Utc::now()),
        );
        let err = exporter
            .add_annotations_to_document(&document, &[annotation])
            .await
            .unwrap_err();
        assert!(matches!(err, ExportError::MissingRepresentation(_)));
    }

    #[tokio::test]
    async fn test_export_rejects_foreign_document() {
        let f = fixture("paper.pdf", b"%PDF-1.4 test").await;
        let exporter = MendeleyExporter::new(MendeleyLocation::parse(&f.descriptor()).unwrap());
        let document = AnnotatedDocument::new("/pocketbook/paper.pdf", 13);

        let err = exporter
            .add_annotations_to_document(&document, &[])
            .await
            .unwrap_err();
        assert!(matches!(err, ExportError::ForeignDocument(_)));
    }
}
