//! Per-transaction pre-image storage.
//!
//! A [`BackupStore`] owns one private directory, `<base>/tx-<uuid>`, created
//! on first capture. Entries are stored as `<sequence>-<txid prefix>-<name>`
//! so captures of the same file name never collide.

use crate::errors::{ErrorCode, OpError};
use crate::fs::tree::{self, run_blocking, EntryKind};
use crate::paths::normalize;
use crate::utils::{now, short_id, Timestamp};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::debug;
use uuid::Uuid;

/// One captured pre-image.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupRecord {
    /// The path that was captured.
    pub source: PathBuf,
    /// Where the copy lives inside the backup directory.
    pub backup_path: PathBuf,
    /// What was captured.
    pub kind: EntryKind,
    /// SHA-256 digest of the captured content.
    pub checksum: String,
    /// When the capture happened.
    pub created_at: Timestamp,
}

/// Captures, restores, and discards backups for one transaction.
#[derive(Debug, Clone)]
pub struct BackupStore {
    transaction_id: Uuid,
    root: PathBuf,
}

impl BackupStore {
    /// Creates a store under `base`. Nothing touches disk until a capture.
    ///
    /// A relative `base` is resolved against the working directory.
    #[must_use]
    pub fn new(base: &Path, transaction_id: Uuid) -> Self {
        Self {
            transaction_id,
            root: absolute(base).join(format!("tx-{transaction_id}")),
        }
    }

    /// The transaction's private backup directory.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Copies whatever is at `path` into the store.
    ///
    /// Returns `None` when nothing exists at `path`.
    ///
    /// # Errors
    ///
    /// `INVALID_PATH` if the store's own directory lies at or below `path`,
    /// otherwise the classified I/O error if the copy or digest fails.
    pub async fn capture(&self, path: &Path, sequence: usize) -> Result<Option<BackupRecord>, OpError> {
        if self.root.starts_with(absolute(path)) {
            return Err(OpError::new(
                ErrorCode::InvalidPath,
                "backup",
                format!("backup directory {} is inside the captured path", self.root.display()),
            )
            .with_path(path));
        }
        let name = path
            .file_name()
            .map_or_else(|| "root".to_string(), |n| n.to_string_lossy().into_owned());
        let backup_path = self
            .root
            .join(format!("{sequence}-{}-{name}", short_id(&self.transaction_id)));

        let (source, root, dest) = (path.to_path_buf(), self.root.clone(), backup_path.clone());
        let captured = run_blocking("backup", path, move || {
            let Some(kind) = tree::entry_kind(&source)? else {
                return Ok(None);
            };
            std::fs::create_dir_all(&root)?;
            tree::remove_tree(&dest)?;
            tree::copy_tree(&source, &dest)?;
            let checksum = tree::tree_digest(&dest)?;
            Ok(Some((kind, checksum)))
        })
        .await?;

        Ok(captured.map(|(kind, checksum)| {
            debug!(
                transaction_id = %self.transaction_id,
                source = %path.display(),
                backup = %backup_path.display(),
                ?kind,
                "Captured backup"
            );
            BackupRecord {
                source: path.to_path_buf(),
                backup_path,
                kind,
                checksum,
                created_at: now(),
            }
        }))
    }

    /// Puts a captured pre-image back at its original path.
    ///
    /// # Errors
    ///
    /// `BACKUP_MISSING` if the backup is gone, `BACKUP_CORRUPT` if its digest
    /// changed, or the classified I/O error of the restore itself.
    pub async fn restore(&self, record: &BackupRecord) -> Result<(), OpError> {
        let (backup, source) = (record.backup_path.clone(), record.source.clone());
        let present = {
            let backup = backup.clone();
            run_blocking("restore", &record.backup_path, move || tree::entry_kind(&backup)).await?
        };
        if present.is_none() {
            return Err(OpError::new(ErrorCode::BackupMissing, "restore", "backup no longer exists")
                .with_path(&record.source)
                .with_details(serde_json::json!({ "backup_path": record.backup_path })));
        }

        let digest = {
            let backup = backup.clone();
            run_blocking("restore", &record.backup_path, move || tree::tree_digest(&backup)).await?
        };
        if digest != record.checksum {
            return Err(OpError::new(ErrorCode::BackupCorrupt, "restore", "backup checksum mismatch")
                .with_path(&record.source)
                .with_details(serde_json::json!({
                    "backup_path": record.backup_path,
                    "expected": record.checksum,
                    "actual": digest,
                })));
        }

        run_blocking("restore", &record.source, move || {
            tree::remove_tree(&source)?;
            if let Some(parent) = source.parent() {
                std::fs::create_dir_all(parent)?;
            }
            tree::copy_tree(&backup, &source)
        })
        .await?;
        debug!(transaction_id = %self.transaction_id, path = %record.source.display(), "Restored backup");
        Ok(())
    }

    /// Deletes one backup entry.
    ///
    /// # Errors
    ///
    /// Returns the classified I/O error if deletion fails.
    pub async fn discard(&self, record: &BackupRecord) -> Result<(), OpError> {
        let backup = record.backup_path.clone();
        run_blocking("discard", &record.backup_path, move || tree::remove_tree(&backup)).await
    }

    /// Deletes the whole backup directory. A missing directory is fine.
    ///
    /// # Errors
    ///
    /// Returns the classified I/O error if deletion fails.
    pub async fn discard_all(&self) -> Result<(), OpError> {
        let root = self.root.clone();
        run_blocking("discard", &self.root, move || tree::remove_tree(&root)).await
    }
}

fn absolute(path: &Path) -> PathBuf {
    if path.is_absolute() {
        return normalize(path);
    }
    std::env::current_dir().map_or_else(|_| normalize(path), |cwd| normalize(&cwd.join(path)))
}
