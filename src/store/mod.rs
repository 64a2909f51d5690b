//! Storage collaborator.
//!
//! The engine only talks to persisted records through [`LibraryStore`].
//! [`SqliteStore`] is the bundled implementation.

pub mod sqlite;

use std::path::Path;

use async_trait::async_trait;
use thiserror::Error;
use uuid::Uuid;

use crate::domain::{ComicFile, Library, ScanJob, Series};

pub use sqlite::SqliteStore;

/// Errors from the storage layer
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    #[error("{0} already exists")]
    Conflict(String),

    #[error("Database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Corrupt record: {0}")]
    Corrupt(String),
}

impl StoreError {
    pub fn not_found(kind: &'static str, id: impl ToString) -> Self {
        StoreError::NotFound {
            kind,
            id: id.to_string(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound { .. })
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

/// CRUD access to libraries, comic files, series and scan jobs
#[async_trait]
pub trait LibraryStore: Send + Sync {
    // Libraries

    async fn create_library(&self, name: &str, root_path: &Path) -> StoreResult<Library>;
    async fn get_library(&self, id: Uuid) -> StoreResult<Library>;
    /// Look a library up by name or by id string
    async fn find_library(&self, name_or_id: &str) -> StoreResult<Option<Library>>;
    async fn list_libraries(&self) -> StoreResult<Vec<Library>>;

    // Comic files

    /// Every record of a library, any status
    async fn list_files(&self, library_id: Uuid) -> StoreResult<Vec<ComicFile>>;
    async fn get_file(&self, id: Uuid) -> StoreResult<ComicFile>;
    async fn insert_file(&self, file: &ComicFile) -> StoreResult<()>;
    async fn update_file(&self, file: &ComicFile) -> StoreResult<()>;
    async fn delete_file(&self, id: Uuid) -> StoreResult<()>;

    /// Pending or indexed files without fresh metadata
    async fn files_needing_metadata(&self, library_id: Uuid) -> StoreResult<Vec<ComicFile>>;
    /// Indexed files not linked to a series
    async fn unlinked_files(&self, library_id: Uuid) -> StoreResult<Vec<ComicFile>>;
    /// Indexed files without a cached cover
    async fn files_needing_cover(&self, library_id: Uuid) -> StoreResult<Vec<ComicFile>>;

    // Series

    async fn insert_series(&self, series: &Series) -> StoreResult<()>;
    async fn get_series(&self, id: Uuid) -> StoreResult<Series>;
    async fn find_series_by_folder(
        &self,
        library_id: Uuid,
        folder_key: &str,
    ) -> StoreResult<Option<Series>>;

    // Scan jobs

    /// Insert or replace a scan job
    async fn save_scan_job(&self, job: &ScanJob) -> StoreResult<()>;
    async fn get_scan_job(&self, id: Uuid) -> StoreResult<ScanJob>;
    /// Most recent first
    async fn list_scan_jobs(&self, library_id: Option<Uuid>, limit: usize) -> StoreResult<Vec<ScanJob>>;
    /// Jobs left queued or mid-stage, oldest first
    async fn interrupted_scan_jobs(&self) -> StoreResult<Vec<ScanJob>>;
}
