//! Filesystem store for large (video) payloads.

use crate::error::{PublishError, Result};
use bytes::Bytes;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, instrument};

/// Permission bits for written payload files
#[cfg(unix)]
const FILE_MODE: u32 = 0o644;

/// Writes payloads as whole files under a caller-supplied directory
#[derive(Debug, Clone, Copy, Default)]
pub struct FilesystemStore;

impl FilesystemStore {
    pub fn new() -> Self {
        Self
    }

    /// Write `payload` to `directory/filename` and return the full path
    ///
    /// Missing directory segments are created. An existing file with the same
    /// name is truncated and overwritten.
    #[instrument(skip(self, payload), fields(size_bytes = payload.len()))]
    pub async fn write_file(
        &self,
        directory: &Path,
        filename: &str,
        payload: &[u8],
    ) -> Result<PathBuf> {
        fs::create_dir_all(directory)
            .await
            .map_err(|e| PublishError::write(directory.display().to_string(), e))?;

        let full_path = directory.join(filename);
        let target = full_path.display().to_string();

        let mut options = fs::OpenOptions::new();
        options.write(true).create(true).truncate(true);
        #[cfg(unix)]
        options.mode(FILE_MODE);

        let mut file = options
            .open(&full_path)
            .await
            .map_err(|e| PublishError::write(target.clone(), e))?;

        file.write_all(payload)
            .await
            .map_err(|e| PublishError::write(target.clone(), e))?;
        file.flush()
            .await
            .map_err(|e| PublishError::write(target.clone(), e))?;

        debug!(path = %target, "Payload written to filesystem");

        Ok(full_path)
    }

    /// Read a previously written payload back
    #[instrument(skip(self))]
    pub async fn read_file(&self, path: &Path) -> Result<Bytes> {
        fs::read(path)
            .await
            .map(Bytes::from)
            .map_err(|e| PublishError::read(path.display().to_string(), e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_write_file_creates_directories() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join("videos").join("camera-1");

        let path = FilesystemStore::new()
            .write_file(&dir, "clip-001", b"frame data")
            .await
            .unwrap();

        assert_eq!(path, dir.join("clip-001"));
        assert_eq!(std::fs::read(&path).unwrap(), b"frame data");
    }

    #[tokio::test]
    async fn test_write_file_truncates_existing() {
        let tmp = tempfile::tempdir().unwrap();
        let store = FilesystemStore::new();

        store
            .write_file(tmp.path(), "clip", b"a much longer first payload")
            .await
            .unwrap();
        let path = store.write_file(tmp.path(), "clip", b"short").await.unwrap();

        assert_eq!(std::fs::read(&path).unwrap(), b"short");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_write_file_permissions() {
        use std::os::unix::fs::PermissionsExt;

        let tmp = tempfile::tempdir().unwrap();
        let path = FilesystemStore::new()
            .write_file(tmp.path(), "clip", b"data")
            .await
            .unwrap();

        // umask may clear bits but never adds any
        let mode = std::fs::metadata(&path).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode & !FILE_MODE, 0);
        assert_ne!(mode & 0o600, 0);
    }

    #[tokio::test]
    async fn test_read_file_missing() {
        let tmp = tempfile::tempdir().unwrap();
        let result = FilesystemStore::new()
            .read_file(&tmp.path().join("missing"))
            .await;

        assert!(matches!(result, Err(PublishError::StorageRead { .. })));
    }

    #[tokio::test]
    async fn test_write_file_into_file_path_fails() {
        let tmp = tempfile::tempdir().unwrap();
        let blocker = tmp.path().join("blocker");
        std::fs::write(&blocker, b"not a directory").unwrap();

        let result = FilesystemStore::new()
            .write_file(&blocker.join("nested"), "clip", b"data")
            .await;

        assert!(matches!(result, Err(PublishError::StorageWrite { .. })));
    }
}
