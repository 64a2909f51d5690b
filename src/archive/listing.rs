//! Entry listing and the process-wide listing cache.

use std::collections::HashMap;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};
use std::time::SystemTime;

use parking_lot::Mutex;
use serde::Serialize;
use tracing::debug;
use zip::ZipArchive;

use super::format::{entry_file_name, get_archive_format, is_comic_info, is_image_name, ArchiveFormat};
use super::ArchiveError;

/// A single entry inside a container
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ArchiveEntry {
    /// In-container path (always `/`-separated)
    pub path: String,

    /// Uncompressed size in bytes
    pub size: u64,

    pub is_directory: bool,

    /// Derived from the extension
    pub is_image: bool,
}

impl ArchiveEntry {
    pub fn new(path: impl Into<String>, size: u64, is_directory: bool) -> Self {
        let path = path.into();
        let is_image = !is_directory && is_image_name(&path);
        Self {
            path,
            size,
            is_directory,
            is_image,
        }
    }
}

/// Summary of a container's contents
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ArchiveListing {
    pub entries: Vec<ArchiveEntry>,

    /// Non-directory entries
    pub file_count: usize,

    /// Whether a ComicInfo.xml exists anywhere in the container
    pub has_comic_info: bool,

    /// Preferred cover: an entry named `cover.<image ext>`, else the first
    /// image in lexicographic order
    pub cover_path: Option<String>,

    /// Sum of non-directory entry sizes
    pub total_size: u64,
}

impl ArchiveListing {
    /// Image entries in lexicographic order
    pub fn images(&self) -> Vec<&ArchiveEntry> {
        let mut images: Vec<&ArchiveEntry> = self.entries.iter().filter(|e| e.is_image).collect();
        images.sort_by(|a, b| a.path.cmp(&b.path));
        images
    }

    /// Number of image pages (ComicInfo.xml and other files excluded)
    pub fn page_count(&self) -> usize {
        self.entries.iter().filter(|e| e.is_image).count()
    }
}

/// Build a listing summary from raw entries
pub fn summarize_entries(entries: Vec<ArchiveEntry>) -> ArchiveListing {
    let files = entries.iter().filter(|e| !e.is_directory);

    let file_count = files.clone().count();
    let total_size = files.clone().map(|e| e.size).sum();
    let has_comic_info = files.clone().any(|e| is_comic_info(&e.path));

    let images = entries.iter().filter(|e| e.is_image);
    let named_cover = images
        .clone()
        .filter(|e| {
            let name = entry_file_name(&e.path).to_ascii_lowercase();
            name.starts_with("cover.")
        })
        .map(|e| &e.path)
        .min();
    let cover_path = named_cover
        .or_else(|| images.map(|e| &e.path).min())
        .cloned();

    ArchiveListing {
        entries,
        file_count,
        has_comic_info,
        cover_path,
        total_size,
    }
}

/// Read raw entries from a container without touching page bytes
pub fn read_entries(path: &Path) -> Result<Vec<ArchiveEntry>, ArchiveError> {
    match get_archive_format(path) {
        ArchiveFormat::Zip => read_zip_entries(path),
        ArchiveFormat::Tar => read_tar_entries(path),
        format => Err(ArchiveError::UnsupportedFormat {
            path: path.to_path_buf(),
            format,
        }),
    }
}

fn read_zip_entries(path: &Path) -> Result<Vec<ArchiveEntry>, ArchiveError> {
    let file = File::open(path)?;
    let mut archive = ZipArchive::new(BufReader::new(file))?;
    let mut entries = Vec::with_capacity(archive.len());

    for i in 0..archive.len() {
        let entry = archive.by_index_raw(i)?;
        entries.push(ArchiveEntry::new(entry.name(), entry.size(), entry.is_dir()));
    }

    Ok(entries)
}

fn read_tar_entries(path: &Path) -> Result<Vec<ArchiveEntry>, ArchiveError> {
    let file = File::open(path)?;
    let mut archive = tar::Archive::new(BufReader::new(file));
    let mut entries = Vec::new();

    for entry in archive.entries()? {
        let entry = entry?;
        let name = entry.path()?.to_string_lossy().replace('\\', "/");
        let is_dir = entry.header().entry_type().is_dir();
        entries.push(ArchiveEntry::new(name, entry.size(), is_dir));
    }

    Ok(entries)
}

/// Read the bytes of a single entry
pub fn read_entry(path: &Path, entry_name: &str) -> Result<Vec<u8>, ArchiveError> {
    let not_found = || ArchiveError::EntryNotFound {
        path: path.to_path_buf(),
        entry: entry_name.to_string(),
    };

    match get_archive_format(path) {
        ArchiveFormat::Zip => {
            let mut archive = ZipArchive::new(BufReader::new(File::open(path)?))?;
            let mut entry = match archive.by_name(entry_name) {
                Ok(entry) => entry,
                Err(zip::result::ZipError::FileNotFound) => return Err(not_found()),
                Err(e) => return Err(e.into()),
            };
            let mut bytes = Vec::with_capacity(entry.size() as usize);
            entry.read_to_end(&mut bytes)?;
            Ok(bytes)
        }
        ArchiveFormat::Tar => {
            let mut archive = tar::Archive::new(BufReader::new(File::open(path)?));
            for entry in archive.entries()? {
                let mut entry = entry?;
                if entry.path()?.to_string_lossy().replace('\\', "/") == entry_name {
                    let mut bytes = Vec::with_capacity(entry.size() as usize);
                    entry.read_to_end(&mut bytes)?;
                    return Ok(bytes);
                }
            }
            Err(not_found())
        }
        format => Err(ArchiveError::UnsupportedFormat {
            path: path.to_path_buf(),
            format,
        }),
    }
}

/// File identity used to decide whether a cached listing is still valid
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct ModSignature {
    modified: Option<SystemTime>,
    len: u64,
}

impl ModSignature {
    fn of(path: &Path) -> Result<Self, ArchiveError> {
        let metadata = std::fs::metadata(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                ArchiveError::NotFound(path.to_path_buf())
            } else {
                ArchiveError::Io(e)
            }
        })?;
        Ok(Self {
            modified: metadata.modified().ok(),
            len: metadata.len(),
        })
    }
}

/// In-memory cache of listings keyed by path and modification signature
#[derive(Debug, Default)]
pub struct ListingCache {
    entries: Mutex<HashMap<PathBuf, (ModSignature, Arc<ArchiveListing>)>>,
}

impl ListingCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// The process-wide cache used by [`list_entries`]
    pub fn global() -> &'static ListingCache {
        static CACHE: OnceLock<ListingCache> = OnceLock::new();
        CACHE.get_or_init(ListingCache::new)
    }

    /// List a container, serving from cache when the file is unchanged
    pub fn list(&self, path: &Path) -> Result<Arc<ArchiveListing>, ArchiveError> {
        let signature = ModSignature::of(path)?;

        if let Some((cached_sig, listing)) = self.entries.lock().get(path) {
            if *cached_sig == signature {
                debug!(path = %path.display(), "Listing cache hit");
                return Ok(Arc::clone(listing));
            }
        }

        let listing = Arc::new(summarize_entries(read_entries(path)?));
        self.entries
            .lock()
            .insert(path.to_path_buf(), (signature, Arc::clone(&listing)));

        Ok(listing)
    }

    /// Drop the cached listing for a path
    pub fn invalidate(&self, path: &Path) {
        self.entries.lock().remove(path);
    }

    /// Drop every cached listing
    pub fn clear(&self) {
        self.entries.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// List a container's entries through the process-wide cache
pub fn list_entries(path: impl AsRef<Path>) -> Result<Arc<ArchiveListing>, ArchiveError> {
    ListingCache::global().list(path.as_ref())
}

/// Clear the process-wide listing cache
pub fn clear_listing_cache() {
    ListingCache::global().clear();
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;
    use zip::write::SimpleFileOptions;
    use zip::ZipWriter;

    fn entry(path: &str) -> ArchiveEntry {
        ArchiveEntry::new(path, 10, path.ends_with('/'))
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
    fn test_summary_of_pages_and_comic_info() {
        let mut entries: Vec<ArchiveEntry> = (1..=10).map(|i| entry(&format!("{:03}.jpg", i))).collect();
        entries.push(entry("ComicInfo.xml"));

        let listing = summarize_entries(entries);
        assert_eq!(listing.file_count, 11);
        assert!(listing.has_comic_info);
        assert_eq!(listing.cover_path.as_deref(), Some("001.jpg"));
        assert_eq!(listing.page_count(), 10);
        assert_eq!(listing.total_size, 110);
    }

    #[test]
    fn test_summary_of_empty_listing() {
        let listing = summarize_entries(Vec::new());
        assert_eq!(listing.file_count, 0);
        assert!(!listing.has_comic_info);
        assert_eq!(listing.cover_path, None);
    }

    #[test]
    fn test_named_cover_is_preferred() {
        let listing = summarize_entries(vec![
            entry("001.jpg"),
            entry("extras/Cover.PNG"),
            entry("002.jpg"),
        ]);
        assert_eq!(listing.cover_path.as_deref(), Some("extras/Cover.PNG"));
    }

    #[test]
    fn test_directories_are_not_counted() {
        let listing = summarize_entries(vec![
            entry("pages/"),
            entry("pages/b.jpg"),
            entry("pages/a.jpg"),
            entry("notes.txt"),
        ]);
        assert_eq!(listing.file_count, 3);
        assert_eq!(listing.page_count(), 2);
        assert_eq!(listing.cover_path.as_deref(), Some("pages/a.jpg"));
        assert!(!listing.has_comic_info);
    }

    #[test]
    fn test_no_images_means_no_cover() {
        let listing = summarize_entries(vec![entry("ComicInfo.xml"), entry("readme.txt")]);
        assert_eq!(listing.cover_path, None);
        assert!(listing.has_comic_info);
    }

    #[test]
    fn test_cache_serves_and_invalidates() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("book.cbz");
        write_zip(&path, &["a.jpg", "b.jpg"]);

        let cache = ListingCache::new();
        let first = cache.list(&path).unwrap();
        let second = cache.list(&path).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(cache.len(), 1);

        cache.invalidate(&path);
        assert!(cache.is_empty());
        let third = cache.list(&path).unwrap();
        assert!(!Arc::ptr_eq(&first, &third));
        assert_eq!(third.file_count, 2);
    }

    #[test]
    fn test_cache_detects_changed_file() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("book.cbz");
        write_zip(&path, &["a.jpg"]);

        let cache = ListingCache::new();
        assert_eq!(cache.list(&path).unwrap().file_count, 1);

        write_zip(&path, &["a.jpg", "b.jpg", "c.jpg"]);
        let bumped = filetime::FileTime::from_unix_time(2_000_000_000, 0);
        filetime::set_file_mtime(&path, bumped).unwrap();

        assert_eq!(cache.list(&path).unwrap().file_count, 3);
    }

    #[test]
    fn test_missing_file_is_not_found() {
        let cache = ListingCache::new();
        let err = cache.list(Path::new("/definitely/not/here.cbz")).unwrap_err();
        assert!(matches!(err, ArchiveError::NotFound(_)));
    }

    #[test]
    fn test_read_entry_from_zip() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("book.cbz");
        write_zip(&path, &["a.jpg", "ComicInfo.xml"]);

        assert_eq!(read_entry(&path, "a.jpg").unwrap(), b"a.jpg");
        assert!(matches!(
            read_entry(&path, "missing.jpg"),
            Err(ArchiveError::EntryNotFound { .. })
        ));
    }

    #[test]
    fn test_tar_listing() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("book.cbt");
        let mut builder = tar::Builder::new(File::create(&path).unwrap());
        for name in ["002.png", "001.png"] {
            let data = b"png!";
            let mut header = tar::Header::new_gnu();
            header.set_size(data.len() as u64);
            header.set_mode(0o644);
            header.set_cksum();
            builder.append_data(&mut header, name, &data[..]).unwrap();
        }
        builder.finish().unwrap();
        drop(builder);

        let listing = summarize_entries(read_entries(&path).unwrap());
        assert_eq!(listing.file_count, 2);
        assert_eq!(listing.cover_path.as_deref(), Some("001.png"));
        assert_eq!(read_entry(&path, "002.png").unwrap(), b"png!");
    }
}
