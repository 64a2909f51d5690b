//! Recursive discovery of comic archives under a root folder.

use std::fs::File;
use std::io::{self, BufReader};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use glob::Pattern;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::archive::is_comic_archive;

use super::ScanError;

/// A comic archive found on disk
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoveredFile {
    /// Absolute path
    pub path: PathBuf,

    /// Path relative to the walked root, `/`-separated
    pub relative_path: String,

    /// File name only
    pub filename: String,

    /// Size in bytes
    pub size: u64,

    /// Last modification time, when the platform reports one
    pub modified: Option<DateTime<Utc>>,

    /// SHA-256 of the contents (hex), when hashing was requested
    pub content_hash: Option<String>,
}

/// A non-fatal problem hit while walking
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoveryError {
    pub path: PathBuf,
    pub message: String,
}

/// Everything found by one walk
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DiscoveryResult {
    pub files: Vec<DiscoveredFile>,
    pub errors: Vec<DiscoveryError>,
}

/// Options for a discovery walk
#[derive(Debug, Clone)]
pub struct DiscoverOptions {
    /// Hash every discovered file (needed for move detection)
    pub include_hash: bool,

    /// Glob patterns (matched against the relative path) to skip
    pub ignore_patterns: Vec<String>,
}

impl Default for DiscoverOptions {
    fn default() -> Self {
        Self {
            include_hash: true,
            ignore_patterns: default_ignore_patterns(),
        }
    }
}

/// macOS resource forks and similar junk that carry comic extensions
pub fn default_ignore_patterns() -> Vec<String> {
    vec!["**/._*".to_string(), "._*".to_string()]
}

/// Walk `root` and collect every comic archive beneath it.
///
/// Per-entry failures (permission denied, unreadable files) are collected in
/// `errors`; only an unusable root is fatal. Files are sorted by relative
/// path.
pub fn discover_files(root: &Path, options: &DiscoverOptions) -> Result<DiscoveryResult, ScanError> {
    let root_meta = std::fs::metadata(root).map_err(|source| ScanError::RootNotFound {
        path: root.to_path_buf(),
        source,
    })?;
    if !root_meta.is_dir() {
        return Err(ScanError::RootNotADirectory(root.to_path_buf()));
    }

    let ignore: Vec<Pattern> = options
        .ignore_patterns
        .iter()
        .filter_map(|p| match Pattern::new(p) {
            Ok(pattern) => Some(pattern),
            Err(e) => {
                warn!(pattern = %p, error = %e, "Ignoring invalid ignore pattern");
                None
            }
        })
        .collect();

    let mut result = DiscoveryResult::default();

    for entry in WalkDir::new(root).follow_links(false) {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                let path = e.path().map(Path::to_path_buf).unwrap_or_else(|| root.to_path_buf());
                warn!(path = %path.display(), error = %e, "Walk error");
                result.errors.push(DiscoveryError {
                    path,
                    message: e.to_string(),
                });
                continue;
            }
        };

        if !entry.file_type().is_file() || !is_comic_archive(entry.path()) {
            continue;
        }

        let relative_path = relative_path(root, entry.path());
        if ignore.iter().any(|p| p.matches(&relative_path)) {
            debug!(path = %relative_path, "Skipping ignored file");
            continue;
        }

        match describe_file(entry.path(), relative_path, options.include_hash) {
            Ok(file) => result.files.push(file),
            Err(e) => {
                warn!(path = %entry.path().display(), error = %e, "Failed to read file");
                result.errors.push(DiscoveryError {
                    path: entry.path().to_path_buf(),
                    message: e.to_string(),
                });
            }
        }
    }

    result.files.sort_by(|a, b| a.relative_path.cmp(&b.relative_path));
    Ok(result)
}

fn describe_file(path: &Path, relative_path: String, include_hash: bool) -> io::Result<DiscoveredFile> {
    let metadata = std::fs::metadata(path)?;
    let content_hash = if include_hash {
        Some(hash_file(path)?)
    } else {
        None
    };

    Ok(DiscoveredFile {
        path: path.to_path_buf(),
        filename: path
            .file_name()
            .unwrap_or_default()
            .to_string_lossy()
            .to_string(),
        relative_path,
        size: metadata.len(),
        modified: metadata.modified().ok().map(DateTime::<Utc>::from),
        content_hash,
    })
}

/// `/`-separated path of `path` relative to `root`
fn relative_path(root: &Path, path: &Path) -> String {
    let rel = path.strip_prefix(root).unwrap_or(path);
    rel.components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

/// SHA-256 of a file's contents, hex encoded
pub fn hash_file(path: &Path) -> io::Result<String> {
    let mut reader = BufReader::new(File::open(path)?);
    let mut hasher = Sha256::new();
    io::copy(&mut reader, &mut hasher)?;
    Ok(hex::encode(hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn touch(root: &Path, rel: &str, contents: &[u8]) {
        let path = root.join(rel);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, contents).unwrap();
    }

    #[test]
    fn test_discovers_only_comic_archives() {
        let temp = TempDir::new().unwrap();
        touch(temp.path(), "Saga/Saga 001.cbz", b"one");
        touch(temp.path(), "Saga/Saga 002.CBR", b"two");
        touch(temp.path(), "Saga/notes.txt", b"nope");
        touch(temp.path(), "generic.zip", b"nope");
        touch(temp.path(), "loose.cb7", b"three");

        let result = discover_files(temp.path(), &DiscoverOptions::default()).unwrap();
        let paths: Vec<&str> = result.files.iter().map(|f| f.relative_path.as_str()).collect();

        assert_eq!(paths, vec!["Saga/Saga 001.cbz", "Saga/Saga 002.CBR", "loose.cb7"]);
        assert!(result.errors.is_empty());

        let first = &result.files[0];
        assert_eq!(first.filename, "Saga 001.cbz");
        assert_eq!(first.size, 3);
        assert!(first.path.is_absolute());
    }

    #[test]
    fn test_hash_is_optional() {
        let temp = TempDir::new().unwrap();
        touch(temp.path(), "a.cbz", b"same");
        touch(temp.path(), "b.cbz", b"same");

        let hashed = discover_files(temp.path(), &DiscoverOptions::default()).unwrap();
        assert_eq!(hashed.files[0].content_hash, hashed.files[1].content_hash);
        assert_eq!(hashed.files[0].content_hash.as_ref().unwrap().len(), 64);

        let options = DiscoverOptions {
            include_hash: false,
            ..Default::default()
        };
        let unhashed = discover_files(temp.path(), &options).unwrap();
        assert!(unhashed.files.iter().all(|f| f.content_hash.is_none()));
    }

    #[test]
    fn test_resource_forks_are_ignored() {
        let temp = TempDir::new().unwrap();
        touch(temp.path(), "._a.cbz", b"fork");
        touch(temp.path(), "x/._b.cbz", b"fork");
        touch(temp.path(), "x/b.cbz", b"real");

        let result = discover_files(temp.path(), &DiscoverOptions::default()).unwrap();
        assert_eq!(result.files.len(), 1);
        assert_eq!(result.files[0].relative_path, "x/b.cbz");
    }

    #[test]
    fn test_missing_root_is_fatal() {
        let err = discover_files(Path::new("/no/such/library"), &DiscoverOptions::default()).unwrap_err();
        assert!(matches!(err, ScanError::RootNotFound { .. }));
    }

    #[test]
    fn test_file_root_is_rejected() {
        let temp = TempDir::new().unwrap();
        touch(temp.path(), "a.cbz", b"x");
        let err = discover_files(&temp.path().join("a.cbz"), &DiscoverOptions::default()).unwrap_err();
        assert!(matches!(err, ScanError::RootNotADirectory(_)));
    }
}
