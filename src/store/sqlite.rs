//! SQLite-backed [`LibraryStore`].
//!
//! A single connection behind a mutex. Queries are short, so they run inline
//! on the calling task instead of a blocking pool.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension, Row};
use tracing::debug;
use uuid::Uuid;

use crate::domain::{ComicFile, FileStatus, Library, ScanJob, ScanStage, Series};

use super::{LibraryStore, StoreError, StoreResult};

const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS libraries (
    id BLOB PRIMARY KEY,
    name TEXT NOT NULL UNIQUE,
    root_path TEXT NOT NULL,
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS comic_files (
    id BLOB PRIMARY KEY,
    library_id BLOB NOT NULL REFERENCES libraries(id) ON DELETE CASCADE,
    path TEXT NOT NULL,
    relative_path TEXT NOT NULL,
    filename TEXT NOT NULL,
    size INTEGER NOT NULL,
    content_hash TEXT,
    status TEXT NOT NULL,
    series_id BLOB,
    page_count INTEGER,
    has_comic_info INTEGER NOT NULL DEFAULT 0,
    metadata_at TEXT,
    cover_cached INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_comic_files_library ON comic_files(library_id, relative_path);
CREATE INDEX IF NOT EXISTS idx_comic_files_hash ON comic_files(content_hash);

CREATE TABLE IF NOT EXISTS series (
    id BLOB PRIMARY KEY,
    library_id BLOB NOT NULL REFERENCES libraries(id) ON DELETE CASCADE,
    name TEXT NOT NULL,
    folder_key TEXT,
    created_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_series_folder ON series(library_id, folder_key);

CREATE TABLE IF NOT EXISTS scan_jobs (
    id BLOB PRIMARY KEY,
    library_id BLOB NOT NULL,
    stage TEXT NOT NULL,
    progress TEXT NOT NULL,
    log TEXT NOT NULL,
    error TEXT,
    created_at TEXT NOT NULL,
    started_at TEXT,
    finished_at TEXT
);
CREATE INDEX IF NOT EXISTS idx_scan_jobs_stage ON scan_jobs(stage);
"#;

const FILE_COLUMNS: &str = "id, library_id, path, relative_path, filename, size, content_hash, \
     status, series_id, page_count, has_comic_info, metadata_at, cover_cached, created_at, updated_at";

const JOB_COLUMNS: &str =
    "id, library_id, stage, progress, log, error, created_at, started_at, finished_at";

/// SQLite implementation of the storage collaborator
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open (and migrate) a database file
    pub fn open(path: &Path) -> StoreResult<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                StoreError::Corrupt(format!("cannot create {}: {}", parent.display(), e))
            })?;
        }
        Self::init(Connection::open(path)?)
    }

    /// Private in-memory database (tests, dry runs)
    pub fn open_in_memory() -> StoreResult<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> StoreResult<Self> {
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        conn.execute_batch(SCHEMA_SQL)?;
        debug!("Database schema ready");
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn query_files(&self, filter: &str, library_id: Uuid) -> StoreResult<Vec<ComicFile>> {
        let conn = self.conn.lock();
        let sql = format!(
            "SELECT {} FROM comic_files WHERE library_id = ?1 {} ORDER BY relative_path",
            FILE_COLUMNS, filter
        );
        let mut stmt = conn.prepare(&sql)?;
        let files = stmt
            .query_map(params![library_id], file_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(files)
    }
}

fn corrupt(idx: usize, message: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(
        idx,
        rusqlite::types::Type::Text,
        Box::new(std::io::Error::new(std::io::ErrorKind::InvalidData, message)),
    )
}

fn library_from_row(row: &Row<'_>) -> rusqlite::Result<Library> {
    Ok(Library {
        id: row.get(0)?,
        name: row.get(1)?,
        root_path: PathBuf::from(row.get::<_, String>(2)?),
        created_at: row.get(3)?,
    })
}

fn file_from_row(row: &Row<'_>) -> rusqlite::Result<ComicFile> {
    let status: String = row.get(7)?;
    Ok(ComicFile {
        id: row.get(0)?,
        library_id: row.get(1)?,
        path: PathBuf::from(row.get::<_, String>(2)?),
        relative_path: row.get(3)?,
        filename: row.get(4)?,
        size: row.get::<_, i64>(5)? as u64,
        content_hash: row.get(6)?,
        status: status.parse::<FileStatus>().map_err(|e| corrupt(7, e))?,
        series_id: row.get(8)?,
        page_count: row.get::<_, Option<i64>>(9)?.map(|n| n as u32),
        has_comic_info: row.get(10)?,
        metadata_at: row.get(11)?,
        cover_cached: row.get(12)?,
        created_at: row.get(13)?,
        updated_at: row.get(14)?,
    })
}

fn series_from_row(row: &Row<'_>) -> rusqlite::Result<Series> {
    Ok(Series {
        id: row.get(0)?,
        library_id: row.get(1)?,
        name: row.get(2)?,
        folder_key: row.get(3)?,
        created_at: row.get(4)?,
    })
}

fn job_from_row(row: &Row<'_>) -> rusqlite::Result<ScanJob> {
    let stage: String = row.get(2)?;
    let progress: String = row.get(3)?;
    let log: String = row.get(4)?;
    Ok(ScanJob {
        id: row.get(0)?,
        library_id: row.get(1)?,
        stage: stage.parse::<ScanStage>().map_err(|e| corrupt(2, e))?,
        progress: serde_json::from_str(&progress).map_err(|e| corrupt(3, e.to_string()))?,
        log: serde_json::from_str(&log).map_err(|e| corrupt(4, e.to_string()))?,
        error: row.get(5)?,
        created_at: row.get(6)?,
        started_at: row.get(7)?,
        finished_at: row.get(8)?,
    })
}

#[async_trait]
impl LibraryStore for SqliteStore {
    async fn create_library(&self, name: &str, root_path: &Path) -> StoreResult<Library> {
        let conn = self.conn.lock();

        let exists: bool = conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM libraries WHERE name = ?1)",
            params![name],
            |row| row.get(0),
        )?;
        if exists {
            return Err(StoreError::Conflict(format!("Library '{}'", name)));
        }

        let library = Library::new(name, root_path);
        conn.execute(
            "INSERT INTO libraries (id, name, root_path, created_at) VALUES (?1, ?2, ?3, ?4)",
            params![
                library.id,
                library.name,
                library.root_path.to_string_lossy().to_string(),
                library.created_at
            ],
        )?;
        Ok(library)
    }

    async fn get_library(&self, id: Uuid) -> StoreResult<Library> {
        let conn = self.conn.lock();
        conn.query_row(
            "SELECT id, name, root_path, created_at FROM libraries WHERE id = ?1",
            params![id],
            library_from_row,
        )
        .optional()?
        .ok_or_else(|| StoreError::not_found("Library", id))
    }

    async fn find_library(&self, name_or_id: &str) -> StoreResult<Option<Library>> {
        if let Ok(id) = Uuid::parse_str(name_or_id) {
            match self.get_library(id).await {
                Ok(library) => return Ok(Some(library)),
                Err(e) if e.is_not_found() => {}
                Err(e) => return Err(e),
            }
        }

        let conn = self.conn.lock();
        let library = conn
            .query_row(
                "SELECT id, name, root_path, created_at FROM libraries WHERE name = ?1",
                params![name_or_id],
                library_from_row,
            )
            .optional()?;
        Ok(library)
    }

    async fn list_libraries(&self) -> StoreResult<Vec<Library>> {
        let conn = self.conn.lock();
        let mut stmt =
            conn.prepare("SELECT id, name, root_path, created_at FROM libraries ORDER BY name")?;
        let libraries = stmt
            .query_map([], library_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(libraries)
    }

    async fn list_files(&self, library_id: Uuid) -> StoreResult<Vec<ComicFile>> {
        self.query_files("", library_id)
    }

    async fn get_file(&self, id: Uuid) -> StoreResult<ComicFile> {
        let conn = self.conn.lock();
        let sql = format!("SELECT {} FROM comic_files WHERE id = ?1", FILE_COLUMNS);
        conn.query_row(&sql, params![id], file_from_row)
            .optional()?
            .ok_or_else(|| StoreError::not_found("File", id))
    }

    async fn insert_file(&self, file: &ComicFile) -> StoreResult<()> {
        let conn = self.conn.lock();
        let sql = format!(
            "INSERT INTO comic_files ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)",
            FILE_COLUMNS
        );
        conn.execute(
            &sql,
            params![
                file.id,
                file.library_id,
                file.path.to_string_lossy().to_string(),
                file.relative_path,
                file.filename,
                file.size as i64,
                file.content_hash,
                file.status.as_str(),
                file.series_id,
                file.page_count.map(i64::from),
                file.has_comic_info,
                file.metadata_at,
                file.cover_cached,
                file.created_at,
                file.updated_at,
            ],
        )?;
        Ok(())
    }

    async fn update_file(&self, file: &ComicFile) -> StoreResult<()> {
        let conn = self.conn.lock();
        let changed = conn.execute(
            "UPDATE comic_files SET path = ?2, relative_path = ?3, filename = ?4, size = ?5, \
             content_hash = ?6, status = ?7, series_id = ?8, page_count = ?9, has_comic_info = ?10, \
             metadata_at = ?11, cover_cached = ?12, updated_at = ?13 WHERE id = ?1",
            params![
                file.id,
                file.path.to_string_lossy().to_string(),
                file.relative_path,
                file.filename,
                file.size as i64,
                file.content_hash,
                file.status.as_str(),
                file.series_id,
                file.page_count.map(i64::from),
                file.has_comic_info,
                file.metadata_at,
                file.cover_cached,
                Utc::now(),
            ],
        )?;
        if changed == 0 {
            return Err(StoreError::not_found("File", file.id));
        }
        Ok(())
    }

    async fn delete_file(&self, id: Uuid) -> StoreResult<()> {
        let conn = self.conn.lock();
        let changed = conn.execute("DELETE FROM comic_files WHERE id = ?1", params![id])?;
        if changed == 0 {
            return Err(StoreError::not_found("File", id));
        }
        Ok(())
    }

    async fn files_needing_metadata(&self, library_id: Uuid) -> StoreResult<Vec<ComicFile>> {
        self.query_files(
            "AND status IN ('pending', 'indexed') AND metadata_at IS NULL",
            library_id,
        )
    }

    async fn unlinked_files(&self, library_id: Uuid) -> StoreResult<Vec<ComicFile>> {
        self.query_files("AND status = 'indexed' AND series_id IS NULL", library_id)
    }

    async fn files_needing_cover(&self, library_id: Uuid) -> StoreResult<Vec<ComicFile>> {
        self.query_files("AND status = 'indexed' AND cover_cached = 0", library_id)
    }

    async fn insert_series(&self, series: &Series) -> StoreResult<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO series (id, library_id, name, folder_key, created_at) VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                series.id,
                series.library_id,
                series.name,
                series.folder_key,
                series.created_at
            ],
        )?;
        Ok(())
    }

    async fn get_series(&self, id: Uuid) -> StoreResult<Series> {
        let conn = self.conn.lock();
        conn.query_row(
            "SELECT id, library_id, name, folder_key, created_at FROM series WHERE id = ?1",
            params![id],
            series_from_row,
        )
        .optional()?
        .ok_or_else(|| StoreError::not_found("Series", id))
    }

    async fn find_series_by_folder(
        &self,
        library_id: Uuid,
        folder_key: &str,
    ) -> StoreResult<Option<Series>> {
        let conn = self.conn.lock();
        let series = conn
            .query_row(
                "SELECT id, library_id, name, folder_key, created_at FROM series \
                 WHERE library_id = ?1 AND folder_key = ?2 ORDER BY created_at LIMIT 1",
                params![library_id, folder_key],
                series_from_row,
            )
            .optional()?;
        Ok(series)
    }

    async fn save_scan_job(&self, job: &ScanJob) -> StoreResult<()> {
        let progress = serde_json::to_string(&job.progress)?;
        let log = serde_json::to_string(&job.log)?;

        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO scan_jobs (id, library_id, stage, progress, log, error, created_at, started_at, finished_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9) \
             ON CONFLICT(id) DO UPDATE SET stage = excluded.stage, progress = excluded.progress, \
             log = excluded.log, error = excluded.error, started_at = excluded.started_at, \
             finished_at = excluded.finished_at",
            params![
                job.id,
                job.library_id,
                job.stage.as_str(),
                progress,
                log,
                job.error,
                job.created_at,
                job.started_at,
                job.finished_at,
            ],
        )?;
        Ok(())
    }

    async fn get_scan_job(&self, id: Uuid) -> StoreResult<ScanJob> {
        let conn = self.conn.lock();
        let sql = format!("SELECT {} FROM scan_jobs WHERE id = ?1", JOB_COLUMNS);
        conn.query_row(&sql, params![id], job_from_row)
            .optional()?
            .ok_or_else(|| StoreError::not_found("Scan job", id))
    }

    async fn list_scan_jobs(&self, library_id: Option<Uuid>, limit: usize) -> StoreResult<Vec<ScanJob>> {
        let conn = self.conn.lock();
        let sql = format!(
            "SELECT {} FROM scan_jobs WHERE (?1 IS NULL OR library_id = ?1) \
             ORDER BY created_at DESC LIMIT ?2",
            JOB_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let jobs = stmt
            .query_map(params![library_id, limit as i64], job_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(jobs)
    }

    async fn interrupted_scan_jobs(&self) -> StoreResult<Vec<ScanJob>> {
        let conn = self.conn.lock();
        let sql = format!(
            "SELECT {} FROM scan_jobs WHERE stage NOT IN ('complete', 'cancelled', 'failed') \
             ORDER BY created_at",
            JOB_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let jobs = stmt
            .query_map([], job_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(jobs)
    }
}
