//! Three-way reconciliation of discovered files against the stored index.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::{ComicFile, FileStatus};

use super::discover::{DiscoveredFile, DiscoveryError};

/// An indexed file found at a different path (or back after being orphaned)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MovedFile {
    pub file_id: Uuid,
    pub old_path: String,
    pub new_path: String,

    /// The file on disk at its new location
    pub discovered: DiscoveredFile,

    /// True if the record was orphaned and has reappeared
    pub restored: bool,
}

/// An indexed file whose content changed in place
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModifiedFile {
    pub file_id: Uuid,
    pub discovered: DiscoveredFile,
}

/// An index record missing from disk for the first time
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrphanedFile {
    pub file_id: Uuid,
    pub relative_path: String,

    /// Status before this scan; pending records are removed, not orphaned
    pub status: FileStatus,
}

/// Proposed changes from one scan. Transient: applied once or discarded.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanResult {
    pub library_id: Uuid,
    pub new_files: Vec<DiscoveredFile>,
    pub moved_files: Vec<MovedFile>,
    pub modified_files: Vec<ModifiedFile>,
    pub orphaned_files: Vec<OrphanedFile>,

    /// Files matching the index at the same path with the same hash
    pub unchanged_files: usize,

    /// Records already orphaned by a previous scan and still missing
    pub existing_orphaned_count: usize,

    /// Ids of those records; they are deleted on apply
    pub existing_orphaned_ids: Vec<Uuid>,

    pub errors: Vec<DiscoveryError>,
    pub duration_ms: u64,
}

impl ScanResult {
    /// True if applying this result would change the index
    pub fn has_changes(&self) -> bool {
        !self.new_files.is_empty()
            || !self.moved_files.is_empty()
            || !self.modified_files.is_empty()
            || !self.orphaned_files.is_empty()
            || !self.existing_orphaned_ids.is_empty()
    }

    pub fn summary(&self) -> ScanSummary {
        ScanSummary {
            new_files: self.new_files.len(),
            moved_files: self.moved_files.len(),
            modified_files: self.modified_files.len(),
            orphaned_files: self.orphaned_files.len(),
            unchanged_files: self.unchanged_files,
            existing_orphaned_count: self.existing_orphaned_count,
            errors: self.errors.len(),
            duration_ms: self.duration_ms,
        }
    }
}

/// Counts-only view of a [`ScanResult`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanSummary {
    pub new_files: usize,
    pub moved_files: usize,
    pub modified_files: usize,
    pub orphaned_files: usize,
    pub unchanged_files: usize,
    pub existing_orphaned_count: usize,
    pub errors: usize,
    pub duration_ms: u64,
}

/// Counts returned by applying a scan result
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplyOutcome {
    /// New records inserted (status pending)
    pub added: usize,
    /// Records whose path was updated in place
    pub moved: usize,
    /// Records whose content hash/size was refreshed
    pub updated: usize,
    /// Records newly marked orphaned
    pub orphaned: usize,
    /// Records hard-deleted (confirmed orphans and vanished pending files)
    pub removed: usize,
}

/// True when the file on disk no longer has the recorded content.
///
/// Hashes decide when both sides have one; otherwise size does.
pub(crate) fn content_differs(record: &ComicFile, on_disk: &DiscoveredFile) -> bool {
    match (&record.content_hash, &on_disk.content_hash) {
        (Some(old), Some(new)) => old != new,
        _ => record.size != on_disk.size,
    }
}

/// Classify discovered files against the index.
///
/// Identity is content hash first, relative path second:
///
/// 1. same path and same content: unchanged (or restored if orphaned)
/// 2. same content at an unclaimed path: moved
/// 3. same path, content changed or unknown: modified (or restored)
///
/// Quarantined records take part in matching (so their files are never
/// reported as new) but never produce changes.
pub fn compute_diff(
    library_id: Uuid,
    index: &[ComicFile],
    discovered: Vec<DiscoveredFile>,
    errors: Vec<DiscoveryError>,
) -> ScanResult {
    let by_path: HashMap<&str, usize> = discovered
        .iter()
        .enumerate()
        .map(|(i, f)| (f.relative_path.as_str(), i))
        .collect();

    let mut by_hash: HashMap<&str, Vec<usize>> = HashMap::new();
    for (i, file) in discovered.iter().enumerate() {
        if let Some(hash) = file.content_hash.as_deref() {
            by_hash.entry(hash).or_default().push(i);
        }
    }

    let mut matched_disk: HashSet<usize> = HashSet::new();
    let mut matched_index: HashSet<Uuid> = HashSet::new();

    let mut moved_files = Vec::new();
    let mut modified_files = Vec::new();
    let mut unchanged_files = 0;

    let restore = |record: &ComicFile, on_disk: &DiscoveredFile| MovedFile {
        file_id: record.id,
        old_path: record.relative_path.clone(),
        new_path: on_disk.relative_path.clone(),
        discovered: on_disk.clone(),
        restored: true,
    };

    // Same path, same content
    for record in index {
        let Some(&i) = by_path.get(record.relative_path.as_str()) else {
            continue;
        };
        let on_disk = &discovered[i];
        if record.content_hash.is_none() || on_disk.content_hash.is_none() {
            continue;
        }
        if content_differs(record, on_disk) {
            continue;
        }
        matched_disk.insert(i);
        matched_index.insert(record.id);

        match record.status {
            FileStatus::Quarantined => {}
            FileStatus::Orphaned => moved_files.push(restore(record, on_disk)),
            FileStatus::Pending | FileStatus::Indexed => unchanged_files += 1,
        }
    }

    // Same content, different path
    for record in index {
        if matched_index.contains(&record.id) {
            continue;
        }
        let Some(hash) = record.content_hash.as_deref() else {
            continue;
        };
        let Some(candidates) = by_hash.get(hash) else {
            continue;
        };
        let Some(&i) = candidates.iter().find(|i| !matched_disk.contains(*i)) else {
            continue;
        };
        matched_disk.insert(i);
        matched_index.insert(record.id);

        if record.status == FileStatus::Quarantined {
            continue;
        }
        moved_files.push(MovedFile {
            file_id: record.id,
            old_path: record.relative_path.clone(),
            new_path: discovered[i].relative_path.clone(),
            discovered: discovered[i].clone(),
            restored: record.status == FileStatus::Orphaned,
        });
    }

    // Same path, content changed or not hashed
    for record in index {
        if matched_index.contains(&record.id) {
            continue;
        }
        let Some(&i) = by_path.get(record.relative_path.as_str()) else {
            continue;
        };
        if matched_disk.contains(&i) {
            continue;
        }
        matched_disk.insert(i);
        matched_index.insert(record.id);

        let on_disk = &discovered[i];
        match record.status {
            FileStatus::Quarantined => {}
            FileStatus::Orphaned => moved_files.push(restore(record, on_disk)),
            FileStatus::Pending | FileStatus::Indexed => {
                if content_differs(record, on_disk) {
                    modified_files.push(ModifiedFile {
                        file_id: record.id,
                        discovered: on_disk.clone(),
                    });
                } else {
                    unchanged_files += 1;
                }
            }
        }
    }

    let mut orphaned_files = Vec::new();
    let mut existing_orphaned_ids = Vec::new();
    for record in index.iter().filter(|r| !matched_index.contains(&r.id)) {
        match record.status {
            FileStatus::Quarantined => {}
            FileStatus::Orphaned => existing_orphaned_ids.push(record.id),
            FileStatus::Pending | FileStatus::Indexed => orphaned_files.push(OrphanedFile {
                file_id: record.id,
                relative_path: record.relative_path.clone(),
                status: record.status,
            }),
        }
    }

    let new_files = discovered
        .into_iter()
        .enumerate()
        .filter(|(i, _)| !matched_disk.contains(i))
        .map(|(_, f)| f)
        .collect();

    ScanResult {
        library_id,
        new_files,
        moved_files,
        modified_files,
        orphaned_files,
        unchanged_files,
        existing_orphaned_count: existing_orphaned_ids.len(),
        existing_orphaned_ids,
        errors,
        duration_ms: 0,
    }
}
