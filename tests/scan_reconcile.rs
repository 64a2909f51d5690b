//! Scan Reconciliation Integration Tests
//!
//! Discovery + diff + apply against a real directory tree and an in-memory
//! SQLite store, including the preview/confirm flow.

use std::path::Path;
use std::sync::Arc;

use longbox::config::ResolvedConfig;
use longbox::core::ScanService;
use longbox::domain::{ComicFile, FileStatus};
use longbox::scanner::{DiscoverOptions, DiscoveredFile, Scanner};
use longbox::store::{LibraryStore, SqliteStore};
use tempfile::TempDir;
use uuid::Uuid;

struct Fixture {
    _temp: TempDir,
    root: std::path::PathBuf,
    store: Arc<SqliteStore>,
    library_id: Uuid,
}

impl Fixture {
    async fn new() -> Self {
        let temp = TempDir::new().unwrap();
        let root = temp.path().join("comics");
        std::fs::create_dir_all(&root).unwrap();
        let store = Arc::new(SqliteStore::open_in_memory().unwrap());
        let library = store.create_library("Comics", &root).await.unwrap();
        Self {
            _temp: temp,
            root,
            store,
            library_id: library.id,
        }
    }

    fn write(&self, rel: &str, contents: &[u8]) {
        let path = self.root.join(rel);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, contents).unwrap();
    }

    fn scanner(&self) -> Scanner {
        Scanner::new(self.store.clone(), DiscoverOptions::default())
    }

    fn service(&self, ttl_minutes: i64) -> ScanService {
        let mut config = ResolvedConfig::with_home(self.root.parent().unwrap().join("state"));
        config.scan.pending_ttl_minutes = ttl_minutes;
        ScanService::from_config(self.store.clone(), &config)
    }

    /// Insert a record that a previous scan orphaned
    async fn orphaned_record(&self, rel: &str) -> ComicFile {
        let discovered = DiscoveredFile {
            path: self.root.join(rel),
            relative_path: rel.to_string(),
            filename: Path::new(rel).file_name().unwrap().to_string_lossy().to_string(),
            size: 99,
            modified: None,
            content_hash: Some(format!("{:064}", 7)),
        };
        let mut file = ComicFile::from_discovered(self.library_id, &discovered);
        file.status = FileStatus::Orphaned;
        self.store.insert_file(&file).await.unwrap();
        file
    }
}

#[tokio::test]
async fn test_new_files_and_confirmed_orphan() {
    let fx = Fixture::new().await;
    fx.write("Saga/Saga 001.cbz", b"one");
    fx.write("Saga/Saga 002.cbz", b"two");
    fx.write("Loose.cbr", b"three");
    fx.write("Saga/notes.txt", b"not a comic");
    let orphan = fx.orphaned_record("Gone/Gone 001.cbz").await;

    let scanner = fx.scanner();
    let result = scanner.scan_library(fx.library_id).await.unwrap();
    assert_eq!(result.new_files.len(), 3);
    assert_eq!(result.existing_orphaned_count, 1);
    assert!(result.moved_files.is_empty());

    let outcome = scanner.apply(&result).await.unwrap();
    assert_eq!(outcome.added, 3);
    assert_eq!(outcome.moved, 0);
    assert!(outcome.orphaned <= 1);
    assert_eq!(outcome.removed, 1);
    assert!(fx.store.get_file(orphan.id).await.unwrap_err().is_not_found());

    let files = fx.store.list_files(fx.library_id).await.unwrap();
    assert_eq!(files.len(), 3);
    assert!(files.iter().all(|f| f.status == FileStatus::Pending));

    let rescan = scanner.scan_library(fx.library_id).await.unwrap();
    assert!(!rescan.has_changes());
    assert_eq!(rescan.unchanged_files, 3);
}

#[tokio::test]
async fn test_rename_is_a_move_not_new_plus_orphan() {
    let fx = Fixture::new().await;
    fx.write("a/Book.cbz", b"same bytes");
    let scanner = fx.scanner();
    scanner.apply(&scanner.scan_library(fx.library_id).await.unwrap()).await.unwrap();
    let original = fx.store.list_files(fx.library_id).await.unwrap().remove(0);

    std::fs::create_dir_all(fx.root.join("b")).unwrap();
    std::fs::rename(fx.root.join("a/Book.cbz"), fx.root.join("b/Book Renamed.cbz")).unwrap();

    let result = scanner.scan_library(fx.library_id).await.unwrap();
    assert_eq!(result.moved_files.len(), 1);
    assert!(result.new_files.is_empty());
    assert!(result.orphaned_files.is_empty());

    scanner.apply(&result).await.unwrap();
    let moved = fx.store.get_file(original.id).await.unwrap();
    assert_eq!(moved.relative_path, "b/Book Renamed.cbz");
    assert_eq!(moved.filename, "Book Renamed.cbz");
}

#[tokio::test]
async fn test_orphan_comes_back() {
    let fx = Fixture::new().await;
    fx.write("Book.cbz", b"bytes");
    let scanner = fx.scanner();
    scanner.apply(&scanner.scan_library(fx.library_id).await.unwrap()).await.unwrap();

    let mut file = fx.store.list_files(fx.library_id).await.unwrap().remove(0);
    file.status = FileStatus::Indexed;
    file.metadata_at = Some(chrono::Utc::now());
    fx.store.update_file(&file).await.unwrap();

    let stash = fx.root.parent().unwrap().join("stash.cbz");
    std::fs::rename(fx.root.join("Book.cbz"), &stash).unwrap();
    let outcome = scanner.apply(&scanner.scan_library(fx.library_id).await.unwrap()).await.unwrap();
    assert_eq!(outcome.orphaned, 1);

    std::fs::rename(&stash, fx.root.join("Book.cbz")).unwrap();
    let result = scanner.scan_library(fx.library_id).await.unwrap();
    assert_eq!(result.moved_files.len(), 1);
    assert!(result.moved_files[0].restored);

    scanner.apply(&result).await.unwrap();
    assert_eq!(fx.store.get_file(file.id).await.unwrap().status, FileStatus::Indexed);
}

#[tokio::test]
async fn test_preview_then_apply() {
    let fx = Fixture::new().await;
    fx.write("One.cbz", b"1");
    fx.write("Two.cbz", b"2");
    let service = fx.service(30);

    let started = service.start_scan(fx.library_id).await.unwrap();
    assert_eq!(started.summary.new_files, 2);
    assert!(fx.store.list_files(fx.library_id).await.unwrap().is_empty());

    let outcome = service.apply_pending(started.scan_id).await.unwrap();
    assert_eq!(outcome.added, 2);
    assert_eq!(fx.store.list_files(fx.library_id).await.unwrap().len(), 2);

    // A pending scan applies at most once
    assert!(service.apply_pending(started.scan_id).await.is_err());
}

#[tokio::test]
async fn test_discarded_and_expired_scans_cannot_apply() {
    let fx = Fixture::new().await;
    fx.write("One.cbz", b"1");

    let service = fx.service(30);
    let started = service.start_scan(fx.library_id).await.unwrap();
    assert!(service.discard_pending(started.scan_id).await);
    assert!(!service.discard_pending(started.scan_id).await);
    assert!(service.apply_pending(started.scan_id).await.is_err());

    let expiring = fx.service(0);
    let started = expiring.start_scan(fx.library_id).await.unwrap();
    assert!(expiring.apply_pending(started.scan_id).await.is_err());
    assert!(fx.store.list_files(fx.library_id).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_missing_root_fails_scan() {
    let fx = Fixture::new().await;
    std::fs::remove_dir_all(&fx.root).unwrap();

    let err = fx.scanner().scan_library(fx.library_id).await.unwrap_err();
    assert!(matches!(err, longbox::ScanError::RootNotFound { .. }));
}
