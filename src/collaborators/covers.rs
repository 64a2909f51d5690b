//! Content-addressed cover cache.
//!
//! Covers are the raw bytes of the archive's cover entry, stored as
//! `<cache_dir>/<key>.<ext>` where the key is the file's content hash (or its
//! id when unhashed). Nothing is decoded or resized.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use tempfile::NamedTempFile;
use tracing::{debug, warn};

use crate::archive::format::IMAGE_EXTENSIONS;
use crate::archive::{list_entries, read_entry};
use crate::domain::ComicFile;
use crate::store::LibraryStore;

use super::{CoverBatchOutcome, CoverExtractor};

/// Writes covers to a directory and marks files as cached in the store
pub struct CoverCache {
    cache_dir: PathBuf,
    store: Arc<dyn LibraryStore>,
}

enum CoverWrite {
    Extracted(PathBuf),
    AlreadyCached(PathBuf),
}

impl CoverCache {
    pub fn new(cache_dir: impl Into<PathBuf>, store: Arc<dyn LibraryStore>) -> Self {
        Self {
            cache_dir: cache_dir.into(),
            store,
        }
    }

    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    fn cache_key(file: &ComicFile) -> String {
        file.content_hash
            .clone()
            .unwrap_or_else(|| file.id.simple().to_string())
    }

    /// Path of a file's cached cover, if one exists
    pub fn cached_cover(&self, file: &ComicFile) -> Option<PathBuf> {
        find_cached(&self.cache_dir, &Self::cache_key(file))
    }

    async fn cache_one(&self, file: &ComicFile) -> Result<CoverWrite> {
        let cache_dir = self.cache_dir.clone();
        let archive = file.path.clone();
        let key = Self::cache_key(file);

        tokio::task::spawn_blocking(move || write_cover(&cache_dir, &archive, &key))
            .await
            .context("Cover task panicked")?
    }
}

fn find_cached(cache_dir: &Path, key: &str) -> Option<PathBuf> {
    IMAGE_EXTENSIONS
        .iter()
        .map(|ext| cache_dir.join(format!("{}.{}", key, ext)))
        .find(|path| path.is_file())
}

fn write_cover(cache_dir: &Path, archive: &Path, key: &str) -> Result<CoverWrite> {
    if let Some(existing) = find_cached(cache_dir, key) {
        return Ok(CoverWrite::AlreadyCached(existing));
    }

    let listing = list_entries(archive)
        .with_context(|| format!("Failed to list {}", archive.display()))?;
    let cover = listing
        .cover_path
        .as_deref()
        .ok_or_else(|| anyhow!("No image pages in {}", archive.display()))?;
    let ext = Path::new(cover)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .unwrap_or_else(|| "jpg".to_string());

    let bytes = read_entry(archive, cover)?;

    std::fs::create_dir_all(cache_dir)
        .with_context(|| format!("Failed to create {}", cache_dir.display()))?;
    let target = cache_dir.join(format!("{}.{}", key, ext));
    let mut tmp = NamedTempFile::new_in(cache_dir)?;
    tmp.write_all(&bytes)?;
    tmp.persist(&target)
        .with_context(|| format!("Failed to write {}", target.display()))?;

    Ok(CoverWrite::Extracted(target))
}

#[async_trait]
impl CoverExtractor for CoverCache {
    async fn extract_batch(&self, files: &[ComicFile]) -> Result<CoverBatchOutcome> {
        let mut outcome = CoverBatchOutcome::default();

        for file in files {
            let write = match self.cache_one(file).await {
                Ok(write) => write,
                Err(e) => {
                    warn!(file = %file.relative_path, error = %e, "Cover extraction failed");
                    outcome.failed += 1;
                    continue;
                }
            };

            match &write {
                CoverWrite::Extracted(path) => {
                    debug!(file = %file.relative_path, cover = %path.display(), "Cover cached");
                    outcome.extracted += 1;
                }
                CoverWrite::AlreadyCached(_) => outcome.cached += 1,
            }

            let mut updated = file.clone();
            updated.cover_cached = true;
            updated.touch();
            self.store.update_file(&updated).await?;
        }

        Ok(outcome)
    }
}
