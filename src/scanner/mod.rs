//! Filesystem scanner and differ.
//!
//! Walks a library root, reconciles what it finds against the stored index,
//! and applies the resulting changes. Scanning is read-only; only
//! [`Scanner::apply`] writes.

pub mod diff;
pub mod discover;
pub mod pending;

use std::sync::Arc;
use std::time::Instant;

use thiserror::Error;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::domain::{ComicFile, FileStatus, Library};
use crate::store::{LibraryStore, StoreError};

use self::diff::content_differs;

pub use diff::{
    compute_diff, ApplyOutcome, ModifiedFile, MovedFile, OrphanedFile, ScanResult, ScanSummary,
};
pub use discover::{
    default_ignore_patterns, discover_files, hash_file, DiscoverOptions, DiscoveredFile,
    DiscoveryError, DiscoveryResult,
};
pub use pending::{InMemoryPendingScans, PendingScan, PendingScanStore};

/// Errors that abort a scan
#[derive(Debug, Error)]
pub enum ScanError {
    #[error("Library root not found: {path}: {source}")]
    RootNotFound {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Library root is not a directory: {0}")]
    RootNotADirectory(std::path::PathBuf),

    #[error("Library not found: {0}")]
    LibraryNotFound(Uuid),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Scan task failed: {0}")]
    Task(String),
}

/// Discovers, diffs and applies changes for one store
#[derive(Clone)]
pub struct Scanner {
    store: Arc<dyn LibraryStore>,
    options: DiscoverOptions,
}

impl Scanner {
    pub fn new(store: Arc<dyn LibraryStore>, options: DiscoverOptions) -> Self {
        Self { store, options }
    }

    pub fn options(&self) -> &DiscoverOptions {
        &self.options
    }

    async fn library(&self, library_id: Uuid) -> Result<Library, ScanError> {
        match self.store.get_library(library_id).await {
            Ok(library) => Ok(library),
            Err(e) if e.is_not_found() => Err(ScanError::LibraryNotFound(library_id)),
            Err(e) => Err(e.into()),
        }
    }

    /// Walk a library's root off the async runtime
    pub async fn discover(&self, library_id: Uuid) -> Result<DiscoveryResult, ScanError> {
        let library = self.library(library_id).await?;
        let options = self.options.clone();
        let root = library.root_path.clone();

        tokio::task::spawn_blocking(move || discover_files(&root, &options))
            .await
            .map_err(|e| ScanError::Task(e.to_string()))?
    }

    /// Walk and classify a library. Nothing is persisted.
    #[instrument(skip(self), fields(library_id = %library_id))]
    pub async fn scan_library(&self, library_id: Uuid) -> Result<ScanResult, ScanError> {
        let started = Instant::now();
        let discovery = self.discover(library_id).await?;
        let mut result = self.scan_with_discovery(library_id, discovery).await?;
        result.duration_ms = started.elapsed().as_millis() as u64;

        info!(
            new = result.new_files.len(),
            moved = result.moved_files.len(),
            modified = result.modified_files.len(),
            orphaned = result.orphaned_files.len(),
            unchanged = result.unchanged_files,
            duration_ms = result.duration_ms,
            "Scan complete"
        );
        Ok(result)
    }

    /// Classify an already-collected discovery against the stored index
    pub async fn scan_with_discovery(
        &self,
        library_id: Uuid,
        discovery: DiscoveryResult,
    ) -> Result<ScanResult, ScanError> {
        let index = self.store.list_files(library_id).await?;
        debug!(indexed = index.len(), discovered = discovery.files.len(), "Computing diff");
        Ok(compute_diff(library_id, &index, discovery.files, discovery.errors))
    }

    /// Persist a scan result.
    ///
    /// Records that disappeared between scan and apply are skipped with a
    /// warning rather than failing the whole apply.
    #[instrument(skip(self, result), fields(library_id = %result.library_id))]
    pub async fn apply(&self, result: &ScanResult) -> Result<ApplyOutcome, ScanError> {
        let mut outcome = ApplyOutcome::default();

        for discovered in &result.new_files {
            let file = ComicFile::from_discovered(result.library_id, discovered);
            self.store.insert_file(&file).await?;
            outcome.added += 1;
        }

        for moved in &result.moved_files {
            let Some(mut file) = self.load(moved.file_id).await? else {
                continue;
            };
            file.path = moved.discovered.path.clone();
            file.relative_path = moved.discovered.relative_path.clone();
            file.filename = moved.discovered.filename.clone();
            if content_differs(&file, &moved.discovered) {
                file.size = moved.discovered.size;
                file.content_hash = moved.discovered.content_hash.clone();
                file.metadata_at = None;
                file.cover_cached = false;
            }
            if moved.restored {
                file.status = if file.metadata_at.is_some() {
                    FileStatus::Indexed
                } else {
                    FileStatus::Pending
                };
            }
            file.touch();
            self.store.update_file(&file).await?;
            debug!(file_id = %file.id, from = %moved.old_path, to = %moved.new_path, "Moved");
            outcome.moved += 1;
        }

        for modified in &result.modified_files {
            let Some(mut file) = self.load(modified.file_id).await? else {
                continue;
            };
            file.size = modified.discovered.size;
            file.content_hash = modified.discovered.content_hash.clone();
            file.metadata_at = None;
            file.cover_cached = false;
            file.touch();
            self.store.update_file(&file).await?;
            outcome.updated += 1;
        }

        for orphan in &result.orphaned_files {
            if orphan.status == FileStatus::Pending {
                if self.delete(orphan.file_id).await? {
                    outcome.removed += 1;
                }
                continue;
            }
            let Some(mut file) = self.load(orphan.file_id).await? else {
                continue;
            };
            file.status = FileStatus::Orphaned;
            file.touch();
            self.store.update_file(&file).await?;
            outcome.orphaned += 1;
        }

        for id in &result.existing_orphaned_ids {
            if self.delete(*id).await? {
                outcome.removed += 1;
            }
        }

        info!(
            added = outcome.added,
            moved = outcome.moved,
            updated = outcome.updated,
            orphaned = outcome.orphaned,
            removed = outcome.removed,
            "Applied scan result"
        );
        Ok(outcome)
    }

    async fn load(&self, id: Uuid) -> Result<Option<ComicFile>, ScanError> {
        match self.store.get_file(id).await {
            Ok(file) => Ok(Some(file)),
            Err(e) if e.is_not_found() => {
                warn!(file_id = %id, "Record vanished before apply, skipping");
                Ok(None)
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn delete(&self, id: Uuid) -> Result<bool, ScanError> {
        match self.store.delete_file(id).await {
            Ok(()) => Ok(true),
            Err(e) if e.is_not_found() => {
                warn!(file_id = %id, "Record already removed, skipping");
                Ok(false)
            }
            Err(e) => Err(e.into()),
        }
    }
}
