//! Folder-based series grouping.

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use tracing::debug;

use crate::domain::{ComicFile, Series};
use crate::store::LibraryStore;

use super::{LinkOutcome, SeriesLinker};

/// Groups files into one series per parent folder.
///
/// Files at the library root have no folder to group by and stay unlinked.
pub struct FolderSeriesLinker {
    store: Arc<dyn LibraryStore>,
}

impl FolderSeriesLinker {
    pub fn new(store: Arc<dyn LibraryStore>) -> Self {
        Self { store }
    }
}

/// Display name for a folder key: its last component
fn series_name(folder_key: &str) -> &str {
    folder_key.rsplit('/').next().unwrap_or(folder_key)
}

#[async_trait]
impl SeriesLinker for FolderSeriesLinker {
    async fn link_by_folder(&self, file: &ComicFile) -> Result<LinkOutcome> {
        let folder_key = file.folder_key();
        if folder_key.is_empty() {
            return Ok(LinkOutcome::not_linked());
        }

        let (series, created) = match self
            .store
            .find_series_by_folder(file.library_id, folder_key)
            .await?
        {
            Some(series) => (series, false),
            None => {
                let series = Series::new(
                    file.library_id,
                    series_name(folder_key),
                    Some(folder_key.to_string()),
                );
                self.store.insert_series(&series).await?;
                debug!(series = %series.name, folder = folder_key, "Created series");
                (series, true)
            }
        };

        let mut linked = file.clone();
        linked.series_id = Some(series.id);
        linked.touch();
        self.store.update_file(&linked).await?;

        Ok(LinkOutcome {
            linked: true,
            series_id: Some(series.id),
            created_series: created,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::FileStatus;
    use crate::scanner::DiscoveredFile;
    use crate::store::SqliteStore;
    use std::path::{Path, PathBuf};

    async fn indexed(store: &SqliteStore, library_id: uuid::Uuid, rel: &str) -> ComicFile {
        let discovered = DiscoveredFile {
            path: PathBuf::from("/comics").join(rel),
            relative_path: rel.to_string(),
            filename: rel.rsplit('/').next().unwrap().to_string(),
            size: 1,
            modified: None,
            content_hash: None,
        };
        let mut file = ComicFile::from_discovered(library_id, &discovered);
        file.status = FileStatus::Indexed;
        store.insert_file(&file).await.unwrap();
        file
    }

    #[tokio::test]
    async fn test_files_in_same_folder_share_a_series() {
        let store = Arc::new(SqliteStore::open_in_memory().unwrap());
        let library = store.create_library("Main", Path::new("/comics")).await.unwrap();
        let linker = FolderSeriesLinker::new(store.clone());

        let a = indexed(&store, library.id, "Marvel/Saga/Saga 001.cbz").await;
        let b = indexed(&store, library.id, "Marvel/Saga/Saga 002.cbz").await;

        let first = linker.link_by_folder(&a).await.unwrap();
        let second = linker.link_by_folder(&b).await.unwrap();
        assert!(first.created_series);
        assert!(!second.created_series);
        assert_eq!(first.series_id, second.series_id);

        let series = store.get_series(first.series_id.unwrap()).await.unwrap();
        assert_eq!(series.name, "Saga");
        assert_eq!(series.folder_key.as_deref(), Some("Marvel/Saga"));
        assert_eq!(store.get_file(a.id).await.unwrap().series_id, first.series_id);
    }

    #[tokio::test]
    async fn test_root_files_stay_unlinked() {
        let store = Arc::new(SqliteStore::open_in_memory().unwrap());
        let library = store.create_library("Main", Path::new("/comics")).await.unwrap();
        let linker = FolderSeriesLinker::new(store.clone());

        let loose = indexed(&store, library.id, "loose.cbz").await;
        let outcome = linker.link_by_folder(&loose).await.unwrap();
        assert!(!outcome.linked);
        assert!(linker.link_by_metadata(&loose).await.unwrap() == LinkOutcome::not_linked());
    }
}
