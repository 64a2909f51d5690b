//! Container format detection by file extension.

use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};

/// Extensions classified as comic archives
pub const COMIC_EXTENSIONS: &[&str] = &["cbz", "cbr", "cb7", "cbt"];

/// Extensions treated as page images
pub const IMAGE_EXTENSIONS: &[&str] = &[
    "jpg", "jpeg", "png", "gif", "webp", "bmp", "avif", "jxl", "tif", "tiff",
];

/// Name of the metadata sidecar stored inside archives
pub const COMIC_INFO_NAME: &str = "ComicInfo.xml";

/// Underlying container format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ArchiveFormat {
    #[serde(rename = "zip")]
    Zip,
    #[serde(rename = "rar")]
    Rar,
    #[serde(rename = "7z")]
    SevenZip,
    #[serde(rename = "tar")]
    Tar,
    #[serde(rename = "unknown")]
    Unknown,
}

impl ArchiveFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            ArchiveFormat::Zip => "zip",
            ArchiveFormat::Rar => "rar",
            ArchiveFormat::SevenZip => "7z",
            ArchiveFormat::Tar => "tar",
            ArchiveFormat::Unknown => "unknown",
        }
    }
}

impl fmt::Display for ArchiveFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lowercased extension of a path, if any
fn extension_lower(path: &Path) -> Option<String> {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_ascii_lowercase())
}

/// Detect the container format from the extension (case-insensitive)
pub fn get_archive_format(path: impl AsRef<Path>) -> ArchiveFormat {
    match extension_lower(path.as_ref()).as_deref() {
        Some("cbz") | Some("zip") => ArchiveFormat::Zip,
        Some("cbr") | Some("rar") => ArchiveFormat::Rar,
        Some("cb7") | Some("7z") => ArchiveFormat::SevenZip,
        Some("cbt") | Some("tar") => ArchiveFormat::Tar,
        _ => ArchiveFormat::Unknown,
    }
}

/// True only for the comic-specific extensions (cbz, cbr, cb7, cbt)
pub fn is_comic_archive(path: impl AsRef<Path>) -> bool {
    extension_lower(path.as_ref())
        .map(|ext| COMIC_EXTENSIONS.contains(&ext.as_str()))
        .unwrap_or(false)
}

/// True if an in-archive entry name has an image extension
pub fn is_image_name(name: &str) -> bool {
    extension_lower(Path::new(name))
        .map(|ext| IMAGE_EXTENSIONS.contains(&ext.as_str()))
        .unwrap_or(false)
}

/// Final component of an in-archive path (entries always use `/`)
pub fn entry_file_name(name: &str) -> &str {
    let trimmed = name.trim_end_matches('/');
    match trimmed.rfind('/') {
        Some(idx) => &trimmed[idx + 1..],
        None => trimmed,
    }
}

/// True if the entry is the ComicInfo.xml sidecar, in any folder and any case
pub fn is_comic_info(name: &str) -> bool {
    entry_file_name(name).eq_ignore_ascii_case(COMIC_INFO_NAME)
}
