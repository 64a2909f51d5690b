//! Metadata read straight from the archive listing.

use anyhow::{Context, Result};
use async_trait::async_trait;

use crate::archive::list_entries;
use crate::domain::ComicFile;

use super::{ExtractedMetadata, MetadataExtractor};

/// Records page count and ComicInfo.xml presence
#[derive(Debug, Clone, Copy, Default)]
pub struct ArchiveMetadataExtractor;

impl ArchiveMetadataExtractor {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl MetadataExtractor for ArchiveMetadataExtractor {
    fn name(&self) -> &str {
        "archive"
    }

    async fn extract(&self, file: &ComicFile) -> Result<ExtractedMetadata> {
        let path = file.path.clone();
        let listing = tokio::task::spawn_blocking(move || list_entries(&path))
            .await
            .context("Metadata task panicked")?
            .with_context(|| format!("Failed to list {}", file.path.display()))?;

        Ok(ExtractedMetadata {
            page_count: u32::try_from(listing.page_count()).unwrap_or(u32::MAX),
            has_comic_info: listing.has_comic_info,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scanner::DiscoveredFile;
    use std::io::Write;
    use tempfile::TempDir;
    use uuid::Uuid;
    use zip::write::SimpleFileOptions;

    #[tokio::test]
    async fn test_extracts_page_count_and_comic_info() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("book.cbz");
        let mut zip = zip::ZipWriter::new(std::fs::File::create(&path).unwrap());
        for name in ["01.jpg", "02.png", "ComicInfo.xml"] {
            zip.start_file(name, SimpleFileOptions::default()).unwrap();
            zip.write_all(b"x").unwrap();
        }
        zip.finish().unwrap();

        let discovered = DiscoveredFile {
            path: path.clone(),
            relative_path: "book.cbz".to_string(),
            filename: "book.cbz".to_string(),
            size: 0,
            modified: None,
            content_hash: None,
        };
        let file = ComicFile::from_discovered(Uuid::new_v4(), &discovered);

        let meta = ArchiveMetadataExtractor::new().extract(&file).await.unwrap();
        assert_eq!(meta.page_count, 2);
        assert!(meta.has_comic_info);
    }

    #[tokio::test]
    async fn test_unreadable_archive_is_an_error() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("broken.cbz");
        std::fs::write(&path, b"not a zip").unwrap();

        let discovered = DiscoveredFile {
            path,
            relative_path: "broken.cbz".to_string(),
            filename: "broken.cbz".to_string(),
            size: 9,
            modified: None,
            content_hash: None,
        };
        let file = ComicFile::from_discovered(Uuid::new_v4(), &discovered);
        assert!(ArchiveMetadataExtractor::new().extract(&file).await.is_err());
    }
}
