//! Stable error codes and the typed operation error.

use crate::utils::Timestamp;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Stable, platform-independent error codes.
///
/// The string form (see [`ErrorCode::as_str`]) is part of the public contract
/// and never changes between releases.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    /// The path does not exist.
    NotFound,
    /// The caller lacks permission for the operation.
    PermissionDenied,
    /// The destination already exists.
    AlreadyExists,
    /// A path component is not a directory.
    NotADirectory,
    /// A directory was found where a file was expected.
    IsADirectory,
    /// The directory still has entries.
    DirectoryNotEmpty,
    /// The path or one of its components is too long.
    NameTooLong,
    /// No space left on the device.
    NoSpace,
    /// The filesystem is mounted read-only.
    ReadOnlyFilesystem,
    /// A rename crossed a device boundary.
    CrossDevice,
    /// The resource is busy or locked.
    Busy,
    /// The process or system ran out of file handles.
    TooManyOpenFiles,
    /// A network filesystem or socket failed.
    NetworkError,
    /// The operation did not finish in time.
    Timeout,
    /// The operation was interrupted.
    Interrupted,
    /// The path was rejected before any I/O.
    InvalidPath,
    /// A command exited unsuccessfully.
    CommandFailed,
    /// A backup needed for restoration is gone.
    BackupMissing,
    /// A backup no longer matches its recorded digest.
    BackupCorrupt,
    /// The owning transaction already finished.
    TransactionClosed,
    /// Anything that could not be classified.
    Unknown,
}

impl ErrorCode {
    /// Returns the stable string form of the code.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::NotFound => "NOT_FOUND",
            Self::PermissionDenied => "PERMISSION_DENIED",
            Self::AlreadyExists => "ALREADY_EXISTS",
            Self::NotADirectory => "NOT_A_DIRECTORY",
            Self::IsADirectory => "IS_A_DIRECTORY",
            Self::DirectoryNotEmpty => "DIRECTORY_NOT_EMPTY",
            Self::NameTooLong => "NAME_TOO_LONG",
            Self::NoSpace => "NO_SPACE",
            Self::ReadOnlyFilesystem => "READ_ONLY_FILESYSTEM",
            Self::CrossDevice => "CROSS_DEVICE",
            Self::Busy => "BUSY",
            Self::TooManyOpenFiles => "TOO_MANY_OPEN_FILES",
            Self::NetworkError => "NETWORK_ERROR",
            Self::Timeout => "TIMEOUT",
            Self::Interrupted => "INTERRUPTED",
            Self::InvalidPath => "INVALID_PATH",
            Self::CommandFailed => "COMMAND_FAILED",
            Self::BackupMissing => "BACKUP_MISSING",
            Self::BackupCorrupt => "BACKUP_CORRUPT",
            Self::TransactionClosed => "TRANSACTION_CLOSED",
            Self::Unknown => "UNKNOWN",
        }
    }

    /// Whether errors with this code are transient and worth retrying.
    ///
    /// Contention and transport failures are recoverable; everything else,
    /// permission and not-found included, is not.
    #[must_use]
    pub const fn is_recoverable(self) -> bool {
        matches!(
            self,
            Self::Busy
                | Self::TooManyOpenFiles
                | Self::NetworkError
                | Self::Timeout
                | Self::Interrupted
        )
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A classified failure of a single operation.
#[derive(Debug, Clone, Error, Serialize, Deserialize)]
#[error("[{code}] {operation}{}: {message}", describe_path(.path.as_deref()))]
pub struct OpError {
    /// Stable error code.
    pub code: ErrorCode,
    /// The operation that failed (e.g. `copy`).
    pub operation: String,
    /// The path the operation was acting on, if any.
    pub path: Option<PathBuf>,
    /// Whether the failure is transient.
    pub recoverable: bool,
    /// Human readable description.
    pub message: String,
    /// Structured details (raw error kind, exit code, ...).
    pub details: Option<serde_json::Value>,
    /// When the error was created.
    pub timestamp: Timestamp,
}

fn describe_path(path: Option<&Path>) -> String {
    path.map(|p| format!(" '{}'", p.display())).unwrap_or_default()
}

impl OpError {
    /// Creates an error whose recoverability follows the code table.
    #[must_use]
    pub fn new(code: ErrorCode, operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code,
            operation: operation.into(),
            path: None,
            recoverable: code.is_recoverable(),
            message: message.into(),
            details: None,
            timestamp: crate::utils::now(),
        }
    }

    /// Sets the path.
    #[must_use]
    pub fn with_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.path = Some(path.into());
        self
    }

    /// Sets structured details.
    #[must_use]
    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    /// Overrides the recoverable flag.
    #[must_use]
    pub fn with_recoverable(mut self, recoverable: bool) -> Self {
        self.recoverable = recoverable;
        self
    }

    /// A timeout synthesized after `millis` milliseconds.
    #[must_use]
    pub fn timeout(operation: impl Into<String>, millis: u128) -> Self {
        Self::new(
            ErrorCode::Timeout,
            operation,
            format!("timed out after {millis}ms"),
        )
        .with_details(serde_json::json!({ "timeout_ms": millis }))
    }

    /// Rejection of a call made after the owning transaction finished.
    #[must_use]
    pub fn closed(operation: impl Into<String>, reason: &str) -> Self {
        Self::new(
            ErrorCode::TransactionClosed,
            operation,
            format!("transaction is closed ({reason})"),
        )
    }

    /// Converts to a JSON object for event payloads.
    #[must_use]
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or_else(|_| {
            serde_json::json!({ "code": self.code.as_str(), "message": self.message })
        })
    }
}
