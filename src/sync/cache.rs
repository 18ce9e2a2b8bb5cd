//! Blob directory holding downloaded playables
//!
//! Finished blobs are named `<handle>.<ext>`. Downloads in progress are
//! written to `<handle>.part` and renamed once complete, so a `.part` file is
//! never referenced by the library.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::debug;

use crate::library::PlayableId;
use crate::utils::audio::extension_for;

const PART_EXTENSION: &str = "part";

#[derive(Debug, Clone)]
pub struct CacheDir {
    root: PathBuf,
}

impl CacheDir {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub async fn init(&self) -> std::io::Result<()> {
        fs::create_dir_all(&self.root).await?;
        debug!("Initialized cache directory at {}", self.root.display());
        Ok(())
    }

    /// Blob file name for `playable` with the given content type
    pub fn file_name(&self, playable: PlayableId, content_type: Option<&str>) -> String {
        format!("{}.{}", playable.raw(), extension_for(content_type))
    }

    pub fn blob_path(&self, file_name: &str) -> PathBuf {
        self.root.join(file_name)
    }

    pub fn part_path(&self, playable: PlayableId) -> PathBuf {
        self.root
            .join(format!("{}.{}", playable.raw(), PART_EXTENSION))
    }

    /// Remove one blob; a missing file is not an error
    pub async fn remove(&self, file_name: &str) -> std::io::Result<()> {
        remove_if_exists(&self.blob_path(file_name)).await
    }

    /// Remove every leftover partial download. Returns how many were removed.
    pub async fn remove_partials(&self) -> std::io::Result<usize> {
        self.remove_matching(|path| {
            path.extension().and_then(|e| e.to_str()) == Some(PART_EXTENSION)
        })
        .await
    }

    /// Remove every file in the cache directory
    pub async fn clear(&self) -> std::io::Result<usize> {
        self.remove_matching(|_| true).await
    }

    pub async fn partial_count(&self) -> std::io::Result<usize> {
        Ok(self
            .files()
            .await?
            .iter()
            .filter(|path| path.extension().and_then(|e| e.to_str()) == Some(PART_EXTENSION))
            .count())
    }

    async fn files(&self) -> std::io::Result<Vec<PathBuf>> {
        let mut entries = match fs::read_dir(&self.root).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };
        let mut files = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            if entry.file_type().await?.is_file() {
                files.push(entry.path());
            }
        }
        Ok(files)
    }

    async fn remove_matching(&self, selected: impl Fn(&Path) -> bool) -> std::io::Result<usize> {
        let mut removed = 0;
        for path in self.files().await? {
            if selected(&path) {
                remove_if_exists(&path).await?;
                removed += 1;
            }
        }
        Ok(removed)
    }
}

pub(crate) async fn remove_if_exists(path: &Path) -> std::io::Result<()> {
    match fs::remove_file(path).await {
        Ok(()) => {
            debug!("Removed {}", path.display());
            Ok(())
        }
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::library::Handle;

    #[tokio::test]
    async fn test_partials_are_removed_and_blobs_kept() {
        let dir = tempfile::tempdir().unwrap();
        let cache = CacheDir::new(dir.path().join("cache"));
        cache.init().await.unwrap();

        let playable: PlayableId = Handle::from_raw(7);
        let name = cache.file_name(playable, Some("audio/mpeg"));
        assert_eq!(name, "7.mp3");
        fs::write(cache.blob_path(&name), b"done").await.unwrap();
        fs::write(cache.part_path(playable), b"half").await.unwrap();

        assert_eq!(cache.partial_count().await.unwrap(), 1);
        assert_eq!(cache.remove_partials().await.unwrap(), 1);
        assert_eq!(cache.partial_count().await.unwrap(), 0);
        assert!(cache.blob_path(&name).exists());

        cache.remove(&name).await.unwrap();
        cache.remove(&name).await.unwrap();
        assert!(!cache.blob_path(&name).exists());
    }

    #[tokio::test]
    async fn test_missing_directory_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let cache = CacheDir::new(dir.path().join("absent"));
        assert_eq!(cache.clear().await.unwrap(), 0);
    }
}
