//! Archive abstraction layer.
//!
//! Format detection, entry listing and safe in-place page mutation for comic
//! containers. Nothing here knows about libraries or jobs.
//!
//! # Mutation protocol
//!
//! ```text
//! book.cbz ──copy──► book.cbz.bak
//!                      │ raw entry copy (deletes skipped, renames applied)
//!                      ▼
//!                   book.cbz          success: remove .bak
//!                                     failure: .bak ──copy──► book.cbz, remove .bak
//! ```

pub mod format;
pub mod listing;
pub mod mutate;
pub mod order;

use std::path::PathBuf;

use thiserror::Error;

pub use format::{get_archive_format, is_comic_archive, is_image_name, ArchiveFormat};
pub use listing::{
    clear_listing_cache, list_entries, read_entry, summarize_entries, ArchiveEntry,
    ArchiveListing, ListingCache,
};
pub use mutate::{
    backup_path, check_archive_modifiable, modify_pages_in_archive, reorder_pages_in_archive,
    Modifiability, PageMutationResult, PageOperation, PageReorder,
};
pub use order::{apply_order_prefix, has_order_prefix, strip_order_prefix};

/// Errors raised by archive operations
#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("Archive not found: {0}")]
    NotFound(PathBuf),

    #[error("Unsupported archive format '{format}' for {path}")]
    UnsupportedFormat { path: PathBuf, format: ArchiveFormat },

    #[error("Entry '{entry}' not found in {path}")]
    EntryNotFound { path: PathBuf, entry: String },

    #[error("Failed to create backup {backup}: {source}")]
    Backup {
        backup: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Archive updated but backup {backup} could not be removed: {source}")]
    BackupCleanup {
        backup: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The mutation failed and the original bytes could not be put back.
    /// The backup file is left on disk as the only intact copy.
    #[error(
        "Failed to restore {path} from {backup} after failed mutation ({mutation_error}): {source}"
    )]
    RestoreFailed {
        path: PathBuf,
        backup: PathBuf,
        mutation_error: String,
        #[source]
        source: std::io::Error,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Zip error: {0}")]
    Zip(#[from] zip::result::ZipError),
}

impl ArchiveError {
    /// True for the double-failure case that may have lost data
    pub fn is_restore_failure(&self) -> bool {
        matches!(self, ArchiveError::RestoreFailed { .. })
    }
}
