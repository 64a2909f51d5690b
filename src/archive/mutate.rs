//! In-place page mutation (reorder/delete) with backup and rollback.
//!
//! Only zip containers can be rewritten. Every call either leaves the
//! archive byte-for-byte untouched or replaces it with a fully written new
//! container. No `.bak` sibling survives the call unless restoring failed
//! or the filesystem refused to delete it after retries. In the second case
//! a successful rewrite returns `BackupCleanup` (the archive already holds
//! the new content) and a restored archive returns the original mutation
//! error; both are logged at error level.

use std::collections::{HashMap, HashSet};
use std::ffi::OsString;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};
use zip::{ZipArchive, ZipWriter};

use super::format::{get_archive_format, ArchiveFormat};
use super::listing::{read_entries, ArchiveEntry, ListingCache};
use super::order::apply_order_prefix;
use super::ArchiveError;

/// Whether an archive can be mutated in place
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Modifiability {
    pub is_modifiable: bool,
    pub format: ArchiveFormat,

    /// Image entries only
    pub page_count: usize,

    /// Why the archive cannot be modified
    pub reason: Option<String>,
}

impl Modifiability {
    fn refused(format: ArchiveFormat, page_count: usize, reason: impl Into<String>) -> Self {
        Self {
            is_modifiable: false,
            format,
            page_count,
            reason: Some(reason.into()),
        }
    }
}

/// Check whether `path` can be mutated in place
pub fn check_archive_modifiable(path: impl AsRef<Path>) -> Modifiability {
    let path = path.as_ref();

    let metadata = match fs::metadata(path) {
        Ok(m) if m.is_file() => m,
        Ok(_) => {
            return Modifiability::refused(ArchiveFormat::Unknown, 0, "Path is not a file");
        }
        Err(_) => {
            return Modifiability::refused(ArchiveFormat::Unknown, 0, "File not found");
        }
    };

    let format = get_archive_format(path);
    let page_count = || -> usize {
        read_entries(path)
            .map(|entries| entries.iter().filter(|e| e.is_image).count())
            .unwrap_or(0)
    };

    match format {
        ArchiveFormat::Zip => {}
        ArchiveFormat::Tar => {
            return Modifiability::refused(
                format,
                page_count(),
                "Modifying tar archives is not supported",
            );
        }
        ArchiveFormat::Rar | ArchiveFormat::SevenZip => {
            return Modifiability::refused(
                format,
                0,
                format!("Modifying {} archives is not supported", format),
            );
        }
        ArchiveFormat::Unknown => {
            return Modifiability::refused(format, 0, "Not a recognized archive format");
        }
    }

    let entries = match read_entries(path) {
        Ok(entries) => entries,
        Err(e) => {
            return Modifiability::refused(format, 0, format!("Unable to read archive: {}", e));
        }
    };
    let pages = entries.iter().filter(|e| e.is_image).count();

    if metadata.permissions().readonly() {
        return Modifiability::refused(format, pages, "Archive is read-only");
    }

    Modifiability {
        is_modifiable: true,
        format,
        page_count: pages,
        reason: None,
    }
}

/// Move a page to a new position
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageReorder {
    /// Current in-archive path
    pub original_path: String,

    /// New zero-based position
    pub new_index: usize,
}

/// A single change to an archive's pages
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PageOperation {
    Delete { path: String },
    Reorder { path: String, new_index: usize },
}

/// Outcome of a page mutation call
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PageMutationResult {
    pub success: bool,
    pub deleted_count: usize,
    pub reordered_count: usize,
    pub new_total_pages: usize,
    pub error: Option<String>,
}

impl PageMutationResult {
    fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            deleted_count: 0,
            reordered_count: 0,
            new_total_pages: 0,
            error: Some(error.into()),
        }
    }
}

/// Sibling backup path: `<archive>.bak`
pub fn backup_path(path: &Path) -> PathBuf {
    let mut name: OsString = path.as_os_str().to_os_string();
    name.push(".bak");
    PathBuf::from(name)
}

/// Rename some pages by applying their order prefix.
///
/// Entries not listed keep their current names. An empty list is rejected
/// without touching the archive.
pub fn reorder_pages_in_archive(
    path: impl AsRef<Path>,
    reorders: &[PageReorder],
) -> Result<PageMutationResult, ArchiveError> {
    if reorders.is_empty() {
        return Ok(PageMutationResult::failed("No pages specified for reordering"));
    }

    let ops: Vec<PageOperation> = reorders
        .iter()
        .map(|r| PageOperation::Reorder {
            path: r.original_path.clone(),
            new_index: r.new_index,
        })
        .collect();

    run_mutation(path.as_ref(), &ops)
}

/// Apply a mixed list of deletes and reorders.
///
/// Deletes are validated first; if they would leave no image pages the call
/// fails before anything is written. Reorders apply to the surviving entries.
pub fn modify_pages_in_archive(
    path: impl AsRef<Path>,
    ops: &[PageOperation],
) -> Result<PageMutationResult, ArchiveError> {
    if ops.is_empty() {
        return Ok(PageMutationResult::failed("No changes specified"));
    }

    run_mutation(path.as_ref(), ops)
}

/// What a rewrite will do, computed before any write
#[derive(Debug, Default)]
struct RewritePlan {
    deletes: HashSet<String>,
    renames: HashMap<String, String>,
    new_total_pages: usize,
}

impl RewritePlan {
    fn is_noop(&self) -> bool {
        self.deletes.is_empty() && self.renames.iter().all(|(old, new)| old == new)
    }
}

fn plan_rewrite(entries: &[ArchiveEntry], ops: &[PageOperation]) -> Result<RewritePlan, String> {
    let by_name: HashMap<&str, &ArchiveEntry> =
        entries.iter().map(|e| (e.path.as_str(), e)).collect();
    let lookup = |path: &str| {
        by_name
            .get(path)
            .copied()
            .ok_or_else(|| format!("Page not found in archive: {}", path))
    };

    let mut plan = RewritePlan::default();

    // Deletes first: they decide whether the call is allowed at all
    for op in ops {
        if let PageOperation::Delete { path } = op {
            let entry = lookup(path)?;
            if !entry.is_image {
                debug!(entry = %path, "Ignoring delete of non-image entry");
                continue;
            }
            plan.deletes.insert(path.clone());
        }
    }

    let image_count = entries.iter().filter(|e| e.is_image).count();
    plan.new_total_pages = image_count - plan.deletes.len();
    if plan.new_total_pages == 0 {
        return Err("Cannot delete all pages: at least one page must remain".to_string());
    }

    for op in ops {
        if let PageOperation::Reorder { path, new_index } = op {
            let entry = lookup(path)?;
            if entry.is_directory {
                return Err(format!("Cannot reorder directory entry: {}", path));
            }
            if !entry.is_image {
                debug!(entry = %path, "Ignoring reorder of non-image entry");
                continue;
            }
            if plan.deletes.contains(path) {
                return Err(format!("Page {} cannot be both deleted and reordered", path));
            }
            plan.renames
                .insert(path.clone(), apply_order_prefix(path, *new_index));
        }
    }

    {
        let mut seen = HashSet::new();
        for entry in entries.iter().filter(|e| !plan.deletes.contains(&e.path)) {
            let name = plan.renames.get(&entry.path).unwrap_or(&entry.path);
            if !seen.insert(name.as_str()) {
                return Err(format!("Resulting archive would contain duplicate entry: {}", name));
            }
        }
    }

    Ok(plan)
}

fn run_mutation(path: &Path, ops: &[PageOperation]) -> Result<PageMutationResult, ArchiveError> {
    let check = check_archive_modifiable(path);
    if !check.is_modifiable {
        let reason = check
            .reason
            .unwrap_or_else(|| "Archive cannot be modified".to_string());
        return Ok(PageMutationResult::failed(reason));
    }

    let entries = match read_entries(path) {
        Ok(entries) => entries,
        Err(e) => return Ok(PageMutationResult::failed(format!("Unable to read archive: {}", e))),
    };

    let plan = match plan_rewrite(&entries, ops) {
        Ok(plan) => plan,
        Err(reason) => {
            info!(path = %path.display(), %reason, "Rejected page mutation");
            return Ok(PageMutationResult::failed(reason));
        }
    };

    let deleted_count = plan.deletes.len();
    let reordered_count = plan.renames.len();
    let new_total_pages = plan.new_total_pages;

    if !plan.is_noop() {
        let outcome = mutate_with_backup(path, |source, target| rewrite_zip(source, target, &plan));
        ListingCache::global().invalidate(path);

        match outcome {
            Ok(()) => {}
            Err(e @ ArchiveError::RestoreFailed { .. }) | Err(e @ ArchiveError::BackupCleanup { .. }) => {
                return Err(e);
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Page mutation failed, archive restored");
                return Ok(PageMutationResult::failed(e.to_string()));
            }
        }
    }

    info!(
        path = %path.display(),
        deleted_count,
        reordered_count,
        new_total_pages,
        "Archive pages updated"
    );

    Ok(PageMutationResult {
        success: true,
        deleted_count,
        reordered_count,
        new_total_pages,
        error: None,
    })
}

/// Stream entries from `source` into a new zip at `target`.
///
/// Entries are raw-copied so page data is never recompressed.
fn rewrite_zip(source: &Path, target: &Path, plan: &RewritePlan) -> Result<(), ArchiveError> {
    let mut archive = ZipArchive::new(BufReader::new(File::open(source)?))?;
    let mut writer = ZipWriter::new(BufWriter::new(File::create(target)?));

    for i in 0..archive.len() {
        let entry = archive.by_index_raw(i)?;
        let name = entry.name().to_string();

        if plan.deletes.contains(&name) {
            continue;
        }

        match plan.renames.get(&name) {
            Some(new_name) if *new_name != name => {
                writer.raw_copy_file_rename(entry, new_name.as_str())?
            }
            _ => writer.raw_copy_file(entry)?,
        }
    }

    let mut out = writer.finish()?;
    out.flush()?;
    out.get_ref().sync_all()?;

    Ok(())
}

const BACKUP_REMOVE_ATTEMPTS: u32 = 3;
const BACKUP_REMOVE_DELAY: Duration = Duration::from_millis(50);

/// Remove a backup, retrying briefly. A backup that is already gone counts
/// as removed.
fn remove_backup(backup: &Path) -> std::io::Result<()> {
    let mut attempt = 1;
    loop {
        match fs::remove_file(backup) {
            Ok(()) => return Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(e) if attempt >= BACKUP_REMOVE_ATTEMPTS => return Err(e),
            Err(e) => {
                debug!(backup = %backup.display(), attempt, error = %e, "Retrying backup removal");
                attempt += 1;
                std::thread::sleep(BACKUP_REMOVE_DELAY);
            }
        }
    }
}

/// Run `mutate(backup, path)` inside the backup/restore window.
///
/// The closure reads from the backup and writes the archive path. On failure
/// the original bytes are copied back before the error is returned.
pub(crate) fn mutate_with_backup<F>(path: &Path, mutate: F) -> Result<(), ArchiveError>
where
    F: FnOnce(&Path, &Path) -> Result<(), ArchiveError>,
{
    let backup = backup_path(path);

    if let Err(source) = fs::copy(path, &backup) {
        let _ = fs::remove_file(&backup);
        return Err(ArchiveError::Backup { backup, source });
    }

    match mutate(&backup, path) {
        Ok(()) => {
            if let Err(source) = remove_backup(&backup) {
                error!(
                    path = %path.display(),
                    backup = %backup.display(),
                    error = %source,
                    "Archive rewritten but backup could not be removed"
                );
                return Err(ArchiveError::BackupCleanup { backup, source });
            }
            Ok(())
        }
        Err(mutation_error) => {
            if let Err(source) = fs::copy(&backup, path) {
                error!(
                    path = %path.display(),
                    backup = %backup.display(),
                    mutation_error = %mutation_error,
                    restore_error = %source,
                    "Restore from backup failed; backup left in place"
                );
                return Err(ArchiveError::RestoreFailed {
                    path: path.to_path_buf(),
                    backup,
                    mutation_error: mutation_error.to_string(),
                    source,
                });
            }

            if let Err(e) = remove_backup(&backup) {
                error!(
                    backup = %backup.display(),
                    error = %e,
                    "Archive restored but backup could not be removed"
                );
            }

            Err(mutation_error)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;
    use zip::write::SimpleFileOptions;

    fn entries(names: &[&str]) -> Vec<ArchiveEntry> {
        names
            .iter()
            .map(|n| ArchiveEntry::new(*n, 1, n.ends_with('/')))
            .collect()
    }

    fn write_zip(path: &Path, names: &[&str]) {
        let mut writer = ZipWriter::new(File::create(path).unwrap());
        for name in names {
            writer.start_file(*name, SimpleFileOptions::default()).unwrap();
            writer.write_all(name.as_bytes()).unwrap();
        }
        writer.finish().unwrap();
    }

    #[test]
    fn test_backup_path_appends_suffix() {
        assert_eq!(
            backup_path(Path::new("/comics/Saga 001.cbz")),
            PathBuf::from("/comics/Saga 001.cbz.bak")
        );
    }

    #[test]
    fn test_plan_rejects_deleting_every_page() {
        let list = entries(&["a.jpg", "b.jpg", "ComicInfo.xml"]);
        let ops = vec![
            PageOperation::Delete { path: "a.jpg".into() },
            PageOperation::Delete { path: "b.jpg".into() },
        ];
        let err = plan_rewrite(&list, &ops).unwrap_err();
        assert!(err.contains("at least one page"));
    }

    #[test]
    fn test_plan_ignores_non_image_deletes() {
        let list = entries(&["a.jpg", "ComicInfo.xml"]);
        let ops = vec![PageOperation::Delete { path: "ComicInfo.xml".into() }];
        let plan = plan_rewrite(&list, &ops).unwrap();
        assert!(plan.deletes.is_empty());
        assert!(plan.is_noop());
        assert_eq!(plan.new_total_pages, 1);
    }

    #[test]
    fn test_plan_ignores_non_image_reorders() {
        let list = entries(&["a.jpg", "b.jpg", "ComicInfo.xml"]);
        let ops = vec![
            PageOperation::Reorder { path: "ComicInfo.xml".into(), new_index: 0 },
            PageOperation::Reorder { path: "b.jpg".into(), new_index: 0 },
        ];
        let plan = plan_rewrite(&list, &ops).unwrap();
        assert_eq!(plan.renames.len(), 1);
        assert_eq!(plan.renames.get("b.jpg").map(String::as_str), Some("0000_b.jpg"));
        assert!(!plan.renames.contains_key("ComicInfo.xml"));
    }

    #[test]
    fn test_remove_backup_treats_missing_as_removed() {
        let temp = TempDir::new().unwrap();
        let backup = temp.path().join("book.cbz.bak");
        std::fs::write(&backup, b"old").unwrap();

        remove_backup(&backup).unwrap();
        assert!(!backup.exists());
        remove_backup(&backup).unwrap();
    }

    #[test]
    fn test_remove_backup_gives_up_after_retries() {
        let temp = TempDir::new().unwrap();
        let backup = temp.path().join("stuck.cbz.bak");
        std::fs::create_dir(&backup).unwrap();

        assert!(remove_backup(&backup).is_err());
        assert!(backup.exists());
    }

    #[test]
    fn test_plan_rejects_unknown_entry() {
        let list = entries(&["a.jpg"]);
        let ops = vec![PageOperation::Reorder { path: "zzz.jpg".into(), new_index: 0 }];
        assert!(plan_rewrite(&list, &ops).unwrap_err().contains("zzz.jpg"));
    }

    #[test]
    fn test_plan_rejects_duplicate_names() {
        let list = entries(&["0000_a.jpg", "a.jpg"]);
        let ops = vec![PageOperation::Reorder { path: "a.jpg".into(), new_index: 0 }];
        assert!(plan_rewrite(&list, &ops).unwrap_err().contains("duplicate"));
    }

    #[test]
    fn test_plan_rejects_delete_and_reorder_of_same_page() {
        let list = entries(&["a.jpg", "b.jpg"]);
        let ops = vec![
            PageOperation::Delete { path: "a.jpg".into() },
            PageOperation::Reorder { path: "a.jpg".into(), new_index: 1 },
        ];
        assert!(plan_rewrite(&list, &ops).is_err());
    }

    #[test]
    fn test_failed_mutation_restores_original() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("book.cbz");
        write_zip(&path, &["a.jpg", "b.jpg"]);
        let original = fs::read(&path).unwrap();

        let result = mutate_with_backup(&path, |_backup, target| {
            fs::write(target, b"half-written garbage")?;
            Err(ArchiveError::Io(std::io::Error::new(
                std::io::ErrorKind::Other,
                "disk full",
            )))
        });

        assert!(matches!(result, Err(ArchiveError::Io(_))));
        assert_eq!(fs::read(&path).unwrap(), original);
        assert!(!backup_path(&path).exists());
    }

    #[test]
    fn test_restore_failure_is_distinct() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("book.cbz");
        write_zip(&path, &["a.jpg"]);

        let result = mutate_with_backup(&path, |backup, _target| {
            fs::remove_file(backup)?;
            Err(ArchiveError::Io(std::io::Error::new(
                std::io::ErrorKind::Other,
                "writer crashed",
            )))
        });

        let err = result.unwrap_err();
        assert!(err.is_restore_failure());
        assert!(err.to_string().contains("writer crashed"));
    }

    #[test]
    fn test_successful_mutation_removes_backup() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("book.cbz");
        write_zip(&path, &["a.jpg"]);

        mutate_with_backup(&path, |backup, target| {
            assert!(backup.exists());
            fs::copy(backup, target)?;
            Ok(())
        })
        .unwrap();

        assert!(!backup_path(&path).exists());
    }
}
