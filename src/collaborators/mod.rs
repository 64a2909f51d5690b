//! Collaborator interfaces used by the scan pipeline.
//!
//! The orchestrator only depends on these traits. Each has a bundled default
//! that works from the archive listing alone:
//!
//! - [`ArchiveMetadataExtractor`]: page count and ComicInfo presence
//! - [`FolderSeriesLinker`]: one series per parent folder
//! - [`CoverCache`]: raw cover entry copied into a cache directory

pub mod covers;
pub mod metadata;
pub mod series;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::ComicFile;

pub use covers::CoverCache;
pub use metadata::ArchiveMetadataExtractor;
pub use series::FolderSeriesLinker;

/// Metadata pulled from one archive
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractedMetadata {
    pub page_count: u32,
    pub has_comic_info: bool,
}

/// Produces or refreshes sidecar metadata for a file
#[async_trait]
pub trait MetadataExtractor: Send + Sync {
    fn name(&self) -> &str;

    async fn extract(&self, file: &ComicFile) -> Result<ExtractedMetadata>;
}

/// Result of one linking attempt
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LinkOutcome {
    pub linked: bool,
    pub series_id: Option<Uuid>,
    /// True if a new series record was created for this link
    pub created_series: bool,
}

impl LinkOutcome {
    pub fn not_linked() -> Self {
        Self::default()
    }
}

/// Associates files with series records, persisting the link itself
#[async_trait]
pub trait SeriesLinker: Send + Sync {
    /// Link using extracted metadata. Linkers that do not interpret metadata
    /// leave the file unlinked.
    async fn link_by_metadata(&self, _file: &ComicFile) -> Result<LinkOutcome> {
        Ok(LinkOutcome::not_linked())
    }

    /// Link by the file's location on disk
    async fn link_by_folder(&self, file: &ComicFile) -> Result<LinkOutcome>;
}

/// Counts from one cover batch
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoverBatchOutcome {
    /// Covers written to the cache by this batch
    pub extracted: u64,
    /// Covers that were already in the cache
    pub cached: u64,
    /// Files skipped after an error
    pub failed: u64,
}

/// Extracts and caches cover images
#[async_trait]
pub trait CoverExtractor: Send + Sync {
    /// Process a batch. Per-file failures are counted, not returned.
    async fn extract_batch(&self, files: &[ComicFile]) -> Result<CoverBatchOutcome>;
}
