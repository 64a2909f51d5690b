//! Archive Mutation Integration Tests
//!
//! Reorder/delete against real zip files on disk: validation failures leave
//! the archive untouched, successful rewrites keep page bytes intact, and no
//! backup survives a call.

use std::fs::File;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use longbox::archive::{
    backup_path, check_archive_modifiable, list_entries, modify_pages_in_archive,
    reorder_pages_in_archive, ArchiveFormat, PageOperation, PageReorder,
};
use tempfile::TempDir;
use zip::write::SimpleFileOptions;
use zip::{ZipArchive, ZipWriter};

fn make_cbz(dir: &TempDir, name: &str, entries: &[&str]) -> PathBuf {
    let path = dir.path().join(name);
    let mut writer = ZipWriter::new(File::create(&path).unwrap());
    for entry in entries {
        writer.start_file(*entry, SimpleFileOptions::default()).unwrap();
        writer.write_all(format!("data:{}", entry).as_bytes()).unwrap();
    }
    writer.finish().unwrap();
    path
}

fn names(path: &Path) -> Vec<String> {
    let archive = ZipArchive::new(File::open(path).unwrap()).unwrap();
    let mut names: Vec<String> = archive.file_names().map(String::from).collect();
    names.sort();
    names
}

fn contents(path: &Path, entry: &str) -> String {
    let mut archive = ZipArchive::new(File::open(path).unwrap()).unwrap();
    let mut file = archive.by_name(entry).unwrap();
    let mut out = String::new();
    file.read_to_string(&mut out).unwrap();
    out
}

fn reorder(path: &str, new_index: usize) -> PageReorder {
    PageReorder {
        original_path: path.to_string(),
        new_index,
    }
}

#[test]
fn test_reverse_order_renames_every_page() {
    let temp = TempDir::new().unwrap();
    let path = make_cbz(&temp, "book.cbz", &["a.jpg", "b.jpg", "c.jpg", "d.jpg"]);

    let result = reorder_pages_in_archive(
        &path,
        &[reorder("d.jpg", 0), reorder("c.jpg", 1), reorder("b.jpg", 2), reorder("a.jpg", 3)],
    )
    .unwrap();

    assert!(result.success, "{:?}", result.error);
    assert_eq!(result.reordered_count, 4);
    assert_eq!(result.new_total_pages, 4);
    assert_eq!(
        names(&path),
        vec!["0000_d.jpg", "0001_c.jpg", "0002_b.jpg", "0003_a.jpg"]
    );
    assert_eq!(contents(&path, "0000_d.jpg"), "data:d.jpg");
    assert!(!backup_path(&path).exists());
}

#[test]
fn test_reorder_is_idempotent_on_prefixed_pages() {
    let temp = TempDir::new().unwrap();
    let path = make_cbz(&temp, "book.cbz", &["0001_a.jpg", "b.jpg"]);

    let result = reorder_pages_in_archive(&path, &[reorder("0001_a.jpg", 1)]).unwrap();
    assert!(result.success);
    assert_eq!(names(&path), vec!["0001_a.jpg", "b.jpg"]);
}

#[test]
fn test_empty_reorder_does_not_write() {
    let temp = TempDir::new().unwrap();
    let path = make_cbz(&temp, "book.cbz", &["a.jpg", "b.jpg"]);
    let before = std::fs::read(&path).unwrap();

    let result = reorder_pages_in_archive(&path, &[]).unwrap();

    assert!(!result.success);
    assert_eq!(result.error.as_deref(), Some("No pages specified for reordering"));
    assert_eq!(std::fs::read(&path).unwrap(), before);
    assert!(!backup_path(&path).exists());
}

#[test]
fn test_deleting_every_page_is_rejected() {
    let temp = TempDir::new().unwrap();
    let path = make_cbz(&temp, "book.cbz", &["a.jpg", "b.jpg", "ComicInfo.xml"]);
    let before = std::fs::read(&path).unwrap();

    let result = modify_pages_in_archive(
        &path,
        &[
            PageOperation::Delete { path: "a.jpg".into() },
            PageOperation::Delete { path: "b.jpg".into() },
        ],
    )
    .unwrap();

    assert!(!result.success);
    assert!(result.error.unwrap().contains("at least one page"));
    assert_eq!(std::fs::read(&path).unwrap(), before);
    assert_eq!(check_archive_modifiable(&path).page_count, 2);
    assert!(!backup_path(&path).exists());
}

#[test]
fn test_mixed_delete_and_reorder() {
    let temp = TempDir::new().unwrap();
    let path = make_cbz(
        &temp,
        "book.cbz",
        &["ComicInfo.xml", "pages/a.jpg", "pages/b.jpg", "pages/c.jpg"],
    );

    let result = modify_pages_in_archive(
        &path,
        &[
            PageOperation::Delete { path: "pages/b.jpg".into() },
            PageOperation::Reorder { path: "pages/c.jpg".into(), new_index: 0 },
            PageOperation::Reorder { path: "pages/a.jpg".into(), new_index: 1 },
        ],
    )
    .unwrap();

    assert!(result.success, "{:?}", result.error);
    assert_eq!(result.deleted_count, 1);
    assert_eq!(result.reordered_count, 2);
    assert_eq!(result.new_total_pages, 2);
    assert_eq!(
        names(&path),
        vec!["ComicInfo.xml", "pages/0000_c.jpg", "pages/0001_a.jpg"]
    );
    assert_eq!(contents(&path, "ComicInfo.xml"), "data:ComicInfo.xml");
    assert!(!backup_path(&path).exists());
}

#[test]
fn test_unknown_page_leaves_archive_untouched() {
    let temp = TempDir::new().unwrap();
    let path = make_cbz(&temp, "book.cbz", &["a.jpg", "b.jpg"]);
    let before = std::fs::read(&path).unwrap();

    let result = modify_pages_in_archive(
        &path,
        &[PageOperation::Delete { path: "missing.jpg".into() }],
    )
    .unwrap();

    assert!(!result.success);
    assert_eq!(std::fs::read(&path).unwrap(), before);
}

#[test]
fn test_listing_reflects_mutation() {
    let temp = TempDir::new().unwrap();
    let path = make_cbz(&temp, "book.cbz", &["a.jpg", "b.jpg", "c.jpg"]);

    assert_eq!(list_entries(&path).unwrap().page_count(), 3);

    let result = modify_pages_in_archive(
        &path,
        &[PageOperation::Delete { path: "a.jpg".into() }],
    )
    .unwrap();
    assert!(result.success);

    let listing = list_entries(&path).unwrap();
    assert_eq!(listing.page_count(), 2);
    assert_eq!(listing.cover_path.as_deref(), Some("b.jpg"));
}

#[test]
fn test_modifiability() {
    let temp = TempDir::new().unwrap();
    let path = make_cbz(
        &temp,
        "book.cbz",
        &["1.jpg", "2.jpg", "3.jpg", "4.jpg", "5.jpg", "ComicInfo.xml"],
    );

    let check = check_archive_modifiable(&path);
    assert!(check.is_modifiable);
    assert_eq!(check.format, ArchiveFormat::Zip);
    assert_eq!(check.page_count, 5);

    let rar = temp.path().join("book.cbr");
    std::fs::write(&rar, b"Rar!").unwrap();
    let check = check_archive_modifiable(&rar);
    assert!(!check.is_modifiable);
    assert_eq!(check.format, ArchiveFormat::Rar);

    let missing = check_archive_modifiable(temp.path().join("nope.cbz"));
    assert!(!missing.is_modifiable);
    assert_eq!(missing.format, ArchiveFormat::Unknown);
}

#[test]
fn test_rar_mutation_is_refused_without_writing() {
    let temp = TempDir::new().unwrap();
    let rar = temp.path().join("book.cbr");
    std::fs::write(&rar, b"Rar!not really").unwrap();

    let result = reorder_pages_in_archive(&rar, &[reorder("a.jpg", 0)]).unwrap();
    assert!(!result.success);
    assert_eq!(std::fs::read(&rar).unwrap(), b"Rar!not really");
    assert!(!backup_path(&rar).exists());
}

#[test]
fn test_reorder_never_renames_comic_info() {
    let temp = TempDir::new().unwrap();
    let path = make_cbz(&temp, "book.cbz", &["a.jpg", "b.jpg", "ComicInfo.xml"]);

    let result = reorder_pages_in_archive(
        &path,
        &[reorder("ComicInfo.xml", 0), reorder("b.jpg", 0), reorder("a.jpg", 1)],
    )
    .unwrap();

    assert!(result.success, "{:?}", result.error);
    assert_eq!(result.reordered_count, 2);
    assert_eq!(names(&path), vec!["0000_b.jpg", "0001_a.jpg", "ComicInfo.xml"]);
    assert!(list_entries(&path).unwrap().has_comic_info);
    assert!(!backup_path(&path).exists());
}

#[test]
fn test_reorder_of_only_comic_info_writes_nothing() {
    let temp = TempDir::new().unwrap();
    let path = make_cbz(&temp, "book.cbz", &["a.jpg", "ComicInfo.xml"]);
    let before = std::fs::read(&path).unwrap();

    let result = reorder_pages_in_archive(&path, &[reorder("ComicInfo.xml", 0)]).unwrap();

    assert!(result.success);
    assert_eq!(result.reordered_count, 0);
    assert_eq!(std::fs::read(&path).unwrap(), before);
}
