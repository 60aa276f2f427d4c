//! [`FileSystem`] backed by `tokio::fs`.

use super::tree::{self, EntryKind};
use super::{CopyOptions, FileSystem, MkdirOptions, RemoveOptions};
use crate::errors::{classify_io, ErrorCode, OpError};
use async_trait::async_trait;
use std::path::Path;
use tracing::debug;

/// The local disk.
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalFileSystem;

impl LocalFileSystem {
    /// Creates the local filesystem.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

async fn kind_at(operation: &'static str, path: &Path) -> Result<Option<EntryKind>, OpError> {
    let owned = path.to_path_buf();
    tree::run_blocking(operation, path, move || tree::entry_kind(&owned)).await
}

#[async_trait]
impl FileSystem for LocalFileSystem {
    async fn copy(&self, src: &Path, dst: &Path, options: &CopyOptions) -> Result<(), OpError> {
        let kind = kind_at("copy", src).await?.ok_or_else(|| {
            OpError::new(ErrorCode::NotFound, "copy", "source does not exist").with_path(src)
        })?;
        if kind == EntryKind::Directory && !options.recursive {
            return Err(OpError::new(
                ErrorCode::IsADirectory,
                "copy",
                "source is a directory and recursive copy is disabled",
            )
            .with_path(src));
        }
        if kind_at("copy", dst).await?.is_some() {
            if !options.overwrite {
                return Err(
                    OpError::new(ErrorCode::AlreadyExists, "copy", "destination exists").with_path(dst),
                );
            }
            let existing = dst.to_path_buf();
            tree::run_blocking("copy", dst, move || tree::remove_tree(&existing)).await?;
        }

        debug!(src = %src.display(), dst = %dst.display(), ?kind, "copy");
        let (from, to) = (src.to_path_buf(), dst.to_path_buf());
        tree::run_blocking("copy", dst, move || tree::copy_tree(&from, &to)).await
    }

    async fn rename(&self, src: &Path, dst: &Path) -> Result<(), OpError> {
        debug!(src = %src.display(), dst = %dst.display(), "rename");
        match tokio::fs::rename(src, dst).await {
            Ok(()) => Ok(()),
            Err(err) => {
                let classified = classify_io(&err, "move", Some(src));
                if classified.code != ErrorCode::CrossDevice {
                    return Err(classified);
                }
                debug!(src = %src.display(), "rename crossed devices, copying instead");
                self.copy(src, dst, &CopyOptions::default()).await?;
                self.remove(src, &RemoveOptions::default()).await
            }
        }
    }

    async fn create_dir(&self, path: &Path, options: &MkdirOptions) -> Result<(), OpError> {
        debug!(path = %path.display(), recursive = options.recursive, "mkdir");
        let result = if options.recursive {
            tokio::fs::create_dir_all(path).await
        } else {
            tokio::fs::create_dir(path).await
        };
        result.map_err(|err| classify_io(&err, "mkdir", Some(path)))
    }

    async fn remove(&self, path: &Path, options: &RemoveOptions) -> Result<(), OpError> {
        debug!(path = %path.display(), recursive = options.recursive, force = options.force, "remove");
        let result = match kind_at("remove", path).await? {
            None if options.force => return Ok(()),
            None => {
                return Err(OpError::new(ErrorCode::NotFound, "remove", "path does not exist")
                    .with_path(path))
            }
            Some(EntryKind::Directory) if options.recursive => tokio::fs::remove_dir_all(path).await,
            Some(EntryKind::Directory) => tokio::fs::remove_dir(path).await,
            Some(_) => tokio::fs::remove_file(path).await,
        };
        result.map_err(|err| classify_io(&err, "remove", Some(path)))
    }

    async fn write_file(&self, path: &Path, content: &[u8]) -> Result<(), OpError> {
        debug!(path = %path.display(), bytes = content.len(), "write_file");
        tokio::fs::write(path, content)
            .await
            .map_err(|err| classify_io(&err, "write_file", Some(path)))
    }

    async fn read_file(&self, path: &Path) -> Result<Vec<u8>, OpError> {
        tokio::fs::read(path)
            .await
            .map_err(|err| classify_io(&err, "read_file", Some(path)))
    }

    async fn exists(&self, path: &Path) -> bool {
        tokio::fs::symlink_metadata(path).await.is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_write_read_exists() {
        let tmp = TempDir::new().unwrap();
        let fs = LocalFileSystem::new();
        let file = tmp.path().join("a.txt");

        assert!(!fs.exists(&file).await);
        fs.write_file(&file, b"hello").await.unwrap();
        assert!(fs.exists(&file).await);
        assert_eq!(fs.read_file(&file).await.unwrap(), b"hello");
    }

    #[tokio::test]
    async fn test_copy_without_overwrite_rejects_existing() {
        let tmp = TempDir::new().unwrap();
        let fs = LocalFileSystem::new();
        let (a, b) = (tmp.path().join("a"), tmp.path().join("b"));
        fs.write_file(&a, b"1").await.unwrap();
        fs.write_file(&b, b"2").await.unwrap();

        let err = fs
            .copy(&a, &b, &CopyOptions { overwrite: false, recursive: true })
            .await
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::AlreadyExists);

        fs.copy(&a, &b, &CopyOptions::default()).await.unwrap();
        assert_eq!(fs.read_file(&b).await.unwrap(), b"1");
    }

    #[tokio::test]
    async fn test_copy_missing_source() {
        let tmp = TempDir::new().unwrap();
        let err = LocalFileSystem
            .copy(&tmp.path().join("nope"), &tmp.path().join("b"), &CopyOptions::default())
            .await
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::NotFound);
        assert!(!err.recoverable);
    }

    #[tokio::test]
    async fn test_remove_force_and_non_recursive() {
        let tmp = TempDir::new().unwrap();
        let fs = LocalFileSystem::new();
        let dir = tmp.path().join("d");
        fs.create_dir(&dir.join("inner"), &MkdirOptions::default()).await.unwrap();

        let err = fs
            .remove(&dir, &RemoveOptions { recursive: false, force: false })
            .await
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::DirectoryNotEmpty);

        fs.remove(&dir, &RemoveOptions::default()).await.unwrap();
        fs.remove(&dir, &RemoveOptions { recursive: true, force: true }).await.unwrap();
        let err = fs.remove(&dir, &RemoveOptions::default()).await.unwrap_err();
        assert_eq!(err.code, ErrorCode::NotFound);
    }

    #[tokio::test]
    async fn test_rename_moves_directory() {
        let tmp = TempDir::new().unwrap();
        let fs = LocalFileSystem::new();
        let (src, dst) = (tmp.path().join("src"), tmp.path().join("dst"));
        fs.create_dir(&src, &MkdirOptions::default()).await.unwrap();
        fs.write_file(&src.join("f"), b"x").await.unwrap();

        fs.rename(&src, &dst).await.unwrap();
        assert!(!fs.exists(&src).await);
        assert_eq!(fs.read_file(&dst.join("f")).await.unwrap(), b"x");
    }
}
