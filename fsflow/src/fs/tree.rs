//! Blocking helpers for whole-tree copy, removal, and hashing.
//!
//! These run on the blocking pool via [`run_blocking`]. Symlinks are never
//! followed: they are copied, removed, and hashed as links.

use crate::errors::{classify_io, ErrorCode, OpError};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Kind of filesystem entry at a path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryKind {
    /// A regular file.
    File,
    /// A directory (captured recursively).
    Directory,
    /// A symbolic link (captured as a link, never followed).
    Symlink,
}

/// Returns the kind of entry at `path`, or `None` if nothing is there.
pub fn entry_kind(path: &Path) -> io::Result<Option<EntryKind>> {
    match fs::symlink_metadata(path) {
        Ok(meta) => Ok(Some(kind_of(&meta.file_type()))),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(err) => Err(err),
    }
}

fn kind_of(file_type: &fs::FileType) -> EntryKind {
    if file_type.is_symlink() {
        EntryKind::Symlink
    } else if file_type.is_dir() {
        EntryKind::Directory
    } else {
        EntryKind::File
    }
}

/// Copies a file, symlink, or directory tree from `src` to `dst`.
///
/// `dst` must not exist; its parent must.
pub fn copy_tree(src: &Path, dst: &Path) -> io::Result<()> {
    let meta = fs::symlink_metadata(src)?;
    match kind_of(&meta.file_type()) {
        EntryKind::Symlink => copy_link(src, dst),
        EntryKind::File => fs::copy(src, dst).map(|_| ()),
        EntryKind::Directory => {
            for entry in WalkDir::new(src).follow_links(false) {
                let entry = entry.map_err(io::Error::from)?;
                let relative = entry
                    .path()
                    .strip_prefix(src)
                    .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;
                let target = dst.join(relative);
                match kind_of(&entry.file_type()) {
                    EntryKind::Directory => fs::create_dir_all(&target)?,
                    EntryKind::Symlink => copy_link(entry.path(), &target)?,
                    EntryKind::File => {
                        fs::copy(entry.path(), &target)?;
                    }
                }
            }
            Ok(())
        }
    }
}

fn copy_link(src: &Path, dst: &Path) -> io::Result<()> {
    let target = fs::read_link(src)?;
    make_symlink(&target, dst)
}

#[cfg(unix)]
fn make_symlink(target: &Path, link: &Path) -> io::Result<()> {
    std::os::unix::fs::symlink(target, link)
}

#[cfg(windows)]
fn make_symlink(target: &Path, link: &Path) -> io::Result<()> {
    if target.is_dir() {
        std::os::windows::fs::symlink_dir(target, link)
    } else {
        std::os::windows::fs::symlink_file(target, link)
    }
}

/// Removes whatever is at `path`: a file, a link, or a whole tree.
///
/// A missing path is not an error.
pub fn remove_tree(path: &Path) -> io::Result<()> {
    match entry_kind(path)? {
        None => Ok(()),
        Some(EntryKind::Directory) => fs::remove_dir_all(path),
        Some(_) => fs::remove_file(path),
    }
}

/// SHA-256 digest over a file, link, or directory tree.
///
/// Directory digests cover relative names, entry kinds, file contents and
/// link targets, visited in sorted order.
pub fn tree_digest(path: &Path) -> io::Result<String> {
    let mut hasher = Sha256::new();
    for entry in WalkDir::new(path).follow_links(false).sort_by_file_name() {
        let entry = entry.map_err(io::Error::from)?;
        let relative = entry.path().strip_prefix(path).unwrap_or(entry.path());
        hasher.update(relative.to_string_lossy().as_bytes());
        hasher.update([0]);
        match kind_of(&entry.file_type()) {
            EntryKind::Directory => hasher.update(b"d"),
            EntryKind::Symlink => {
                hasher.update(b"l");
                hasher.update(fs::read_link(entry.path())?.to_string_lossy().as_bytes());
            }
            EntryKind::File => {
                hasher.update(b"f");
                let mut file = fs::File::open(entry.path())?;
                io::copy(&mut file, &mut hasher)?;
            }
        }
        hasher.update([0]);
    }
    Ok(hex::encode(hasher.finalize()))
}

/// Runs blocking filesystem work on the blocking pool, classifying failures.
pub async fn run_blocking<T, F>(operation: &'static str, path: &Path, work: F) -> Result<T, OpError>
where
    F: FnOnce() -> io::Result<T> + Send + 'static,
    T: Send + 'static,
{
    let owned: PathBuf = path.to_path_buf();
    match tokio::task::spawn_blocking(work).await {
        Ok(result) => result.map_err(|err| classify_io(&err, operation, Some(&owned))),
        Err(join) => Err(OpError::new(ErrorCode::Unknown, operation, join.to_string()).with_path(owned)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    fn sample_tree(root: &Path) -> PathBuf {
        let dir = root.join("tree");
        fs::create_dir_all(dir.join("nested")).unwrap();
        fs::write(dir.join("a.txt"), "alpha").unwrap();
        fs::write(dir.join("nested/b.txt"), "beta").unwrap();
        dir
    }

    #[test]
    fn test_copy_tree_directory() {
        let tmp = TempDir::new().unwrap();
        let src = sample_tree(tmp.path());
        let dst = tmp.path().join("copy");

        copy_tree(&src, &dst).unwrap();

        assert_eq!(fs::read_to_string(dst.join("a.txt")).unwrap(), "alpha");
        assert_eq!(fs::read_to_string(dst.join("nested/b.txt")).unwrap(), "beta");
        assert_eq!(tree_digest(&src).unwrap(), tree_digest(&dst).unwrap());
    }

    #[test]
    fn test_digest_detects_content_change() {
        let tmp = TempDir::new().unwrap();
        let src = sample_tree(tmp.path());
        let before = tree_digest(&src).unwrap();
        fs::write(src.join("nested/b.txt"), "BETA").unwrap();
        assert_ne!(before, tree_digest(&src).unwrap());
    }

    #[cfg(unix)]
    #[test]
    fn test_symlink_copied_as_link() {
        let tmp = TempDir::new().unwrap();
        let link = tmp.path().join("link");
        std::os::unix::fs::symlink("does-not-exist", &link).unwrap();

        assert_eq!(entry_kind(&link).unwrap(), Some(EntryKind::Symlink));
        let copy = tmp.path().join("link-copy");
        copy_tree(&link, &copy).unwrap();
        assert_eq!(fs::read_link(&copy).unwrap(), PathBuf::from("does-not-exist"));
    }

    #[test]
    fn test_remove_tree_missing_is_ok() {
        let tmp = TempDir::new().unwrap();
        remove_tree(&tmp.path().join("nothing")).unwrap();

        let src = sample_tree(tmp.path());
        remove_tree(&src).unwrap();
        assert_eq!(entry_kind(&src).unwrap(), None);
    }

    #[tokio::test]
    async fn test_run_blocking_classifies() {
        let missing = PathBuf::from("/definitely/not/here");
        let probe = missing.clone();
        let err = run_blocking("read", &missing, move || fs::read(&probe))
            .await
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::NotFound);
        assert_eq!(err.path, Some(missing));
    }
}
