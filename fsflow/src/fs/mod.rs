//! Primitive filesystem and process operations.
//!
//! [`FileSystem`] and [`CommandRunner`] are the seams the transaction
//! manager delegates to; [`LocalFileSystem`] and [`ShellRunner`] are the
//! default implementations. [`MutatingOps`] is the scripting surface shared by
//! transaction handles and the non-journaled [`DirectOps`].

mod command;
mod local;
pub(crate) mod ops;
pub(crate) mod tree;

pub use command::{CommandOutput, CommandRunner, ExecOptions, ShellRunner};
pub use local::LocalFileSystem;
pub use ops::{DirectOps, MutatingOps};
pub use tree::EntryKind;

#[cfg(test)]
pub use command::MockCommandRunner;

use crate::errors::OpError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Options for [`FileSystem::copy`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CopyOptions {
    /// Replace an existing destination. When false an existing destination
    /// is `ALREADY_EXISTS`.
    #[serde(default = "default_true")]
    pub overwrite: bool,
    /// Allow copying directories.
    #[serde(default = "default_true")]
    pub recursive: bool,
}

impl Default for CopyOptions {
    fn default() -> Self {
        Self {
            overwrite: true,
            recursive: true,
        }
    }
}

/// Options for [`FileSystem::create_dir`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MkdirOptions {
    /// Create missing parents; an existing directory is then not an error.
    #[serde(default = "default_true")]
    pub recursive: bool,
}

impl Default for MkdirOptions {
    fn default() -> Self {
        Self { recursive: true }
    }
}

/// Options for [`FileSystem::remove`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoveOptions {
    /// Remove non-empty directories.
    #[serde(default = "default_true")]
    pub recursive: bool,
    /// Treat a missing path as success.
    #[serde(default)]
    pub force: bool,
}

impl Default for RemoveOptions {
    fn default() -> Self {
        Self {
            recursive: true,
            force: false,
        }
    }
}

const fn default_true() -> bool {
    true
}

/// Primitive filesystem operations. Every failure is a classified [`OpError`].
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait FileSystem: Send + Sync {
    /// Copies a file, symlink, or directory tree.
    async fn copy(&self, src: &Path, dst: &Path, options: &CopyOptions) -> Result<(), OpError>;

    /// Moves `src` to `dst`, falling back to copy and remove across devices.
    async fn rename(&self, src: &Path, dst: &Path) -> Result<(), OpError>;

    /// Creates a directory.
    async fn create_dir(&self, path: &Path, options: &MkdirOptions) -> Result<(), OpError>;

    /// Removes a file, symlink, or directory.
    async fn remove(&self, path: &Path, options: &RemoveOptions) -> Result<(), OpError>;

    /// Writes `content`, replacing any existing file.
    async fn write_file(&self, path: &Path, content: &[u8]) -> Result<(), OpError>;

    /// Reads a whole file.
    async fn read_file(&self, path: &Path) -> Result<Vec<u8>, OpError>;

    /// Whether anything (dangling symlinks included) exists at `path`.
    async fn exists(&self, path: &Path) -> bool;
}
