//! Library, comic file and series records.
//!
//! These are the persisted shapes the scanner reconciles against. The
//! storage layer owns them; the scanner and orchestrator only move them
//! through their lifecycle.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::scanner::DiscoveredFile;

/// A root folder that is scanned for comic archives
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Library {
    /// Unique identifier
    pub id: Uuid,

    /// Display name (unique per store)
    pub name: String,

    /// Absolute root path that gets walked on every scan
    pub root_path: PathBuf,

    /// When the library was registered
    pub created_at: DateTime<Utc>,
}

impl Library {
    /// Create a new library record
    pub fn new(name: impl Into<String>, root_path: impl Into<PathBuf>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            root_path: root_path.into(),
            created_at: Utc::now(),
        }
    }
}

/// Lifecycle of an indexed comic file.
///
/// `Pending` → `Indexed` once metadata has been extracted. Only an indexed
/// file can become `Orphaned`; a pending file that disappears is removed.
/// `Quarantined` is terminal and never touched by scans.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileStatus {
    /// Discovered, metadata not yet extracted
    Pending,

    /// Metadata extracted
    Indexed,

    /// Missing from disk on the last scan
    Orphaned,

    /// Set aside for manual intervention
    Quarantined,
}

impl FileStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            FileStatus::Pending => "pending",
            FileStatus::Indexed => "indexed",
            FileStatus::Orphaned => "orphaned",
            FileStatus::Quarantined => "quarantined",
        }
    }
}

impl fmt::Display for FileStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FileStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(FileStatus::Pending),
            "indexed" => Ok(FileStatus::Indexed),
            "orphaned" => Ok(FileStatus::Orphaned),
            "quarantined" => Ok(FileStatus::Quarantined),
            other => Err(format!("unknown file status: {}", other)),
        }
    }
}

/// A comic archive tracked in a library
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComicFile {
    /// Stable identity, preserved across moves
    pub id: Uuid,

    /// Owning library
    pub library_id: Uuid,

    /// Absolute path on disk
    pub path: PathBuf,

    /// Path relative to the library root, always `/`-separated
    pub relative_path: String,

    /// File name only
    pub filename: String,

    /// Size in bytes
    pub size: u64,

    /// SHA-256 of the file contents (hex), if hashing was enabled
    pub content_hash: Option<String>,

    /// Lifecycle status
    pub status: FileStatus,

    /// Linked series (if any)
    pub series_id: Option<Uuid>,

    /// Number of image pages, filled in by metadata extraction
    pub page_count: Option<u32>,

    /// Whether the archive carries a ComicInfo.xml sidecar
    pub has_comic_info: bool,

    /// When metadata was last extracted; `None` means stale
    pub metadata_at: Option<DateTime<Utc>>,

    /// Whether a cover has been written to the cover cache
    pub cover_cached: bool,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ComicFile {
    /// Build a fresh `Pending` record from a discovered file
    pub fn from_discovered(library_id: Uuid, discovered: &DiscoveredFile) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            library_id,
            path: discovered.path.clone(),
            relative_path: discovered.relative_path.clone(),
            filename: discovered.filename.clone(),
            size: discovered.size,
            content_hash: discovered.content_hash.clone(),
            status: FileStatus::Pending,
            series_id: None,
            page_count: None,
            has_comic_info: false,
            metadata_at: None,
            cover_cached: false,
            created_at: now,
            updated_at: now,
        }
    }

    /// Parent folder of the file relative to the library root ("" at the root)
    pub fn folder_key(&self) -> &str {
        match self.relative_path.rfind('/') {
            Some(idx) => &self.relative_path[..idx],
            None => "",
        }
    }

    /// Mark the record as modified now
    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

/// A group of comic files, created by series linking
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Series {
    pub id: Uuid,
    pub library_id: Uuid,

    /// Display name
    pub name: String,

    /// Folder the series was grouped from (relative to the library root)
    pub folder_key: Option<String>,

    pub created_at: DateTime<Utc>,
}

impl Series {
    pub fn new(library_id: Uuid, name: impl Into<String>, folder_key: Option<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            library_id,
            name: name.into(),
            folder_key,
            created_at: Utc::now(),
        }
    }
}
