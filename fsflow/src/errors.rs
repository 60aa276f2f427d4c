//! Error types for fsflow.
//!
//! Every failure surfaced by the library is a [`FlowError`]. Primitive
//! filesystem and process failures are classified into an [`OpError`] with a
//! stable [`ErrorCode`] and a recoverable flag; see [`classify`].

mod classify;
mod codes;

pub use classify::{classify, classify_io};
pub use codes::{ErrorCode, OpError};

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;
use uuid::Uuid;

/// The main error type for fsflow operations.
#[derive(Debug, Error)]
pub enum FlowError {
    /// A classified primitive failure, timeout, or closed-transaction rejection.
    #[error(transparent)]
    Operation(#[from] OpError),

    /// A path or argument was rejected before any I/O.
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// A transaction failed and could not be fully rolled back.
    #[error(transparent)]
    Rollback(Box<RollbackError>),

    /// A plugin could not be registered or invoked.
    #[error(transparent)]
    Plugin(#[from] PluginError),

    /// Configuration could not be loaded.
    #[error("Configuration error: {0}")]
    Config(String),

    /// A caller-supplied error.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl FlowError {
    /// Returns the stable code for this error.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::Operation(op) => op.code.as_str(),
            Self::Validation(v) if v.subject == "path" => ErrorCode::InvalidPath.as_str(),
            Self::Validation(_) => "INVALID_ARGUMENT",
            Self::Rollback(_) => "ROLLBACK_FAILED",
            Self::Plugin(_) => "PLUGIN_ERROR",
            Self::Config(_) => "CONFIG_ERROR",
            Self::Other(_) => ErrorCode::Unknown.as_str(),
        }
    }

    /// Whether the error is transient and eligible for retry.
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::Operation(op) => op.recoverable,
            _ => false,
        }
    }

    /// Returns the classified operation error, if this is one.
    #[must_use]
    pub fn as_op_error(&self) -> Option<&OpError> {
        match self {
            Self::Operation(op) => Some(op),
            _ => None,
        }
    }

    /// Classifies caller errors into [`FlowError::Operation`].
    ///
    /// Already-typed variants are returned unchanged.
    #[must_use]
    pub fn classified(self, operation: &str) -> Self {
        match self {
            Self::Other(err) => Self::Operation(classify(&*err, operation, None)),
            other => other,
        }
    }

    /// Shorthand for a validation error.
    pub fn invalid_path(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::Validation(ValidationError::new(path, reason))
    }

    /// Validation error for a malformed regular expression.
    pub fn invalid_pattern(pattern: &str, reason: impl Into<String>) -> Self {
        Self::Validation(ValidationError::argument("pattern", pattern, reason))
    }
}

impl From<RollbackError> for FlowError {
    fn from(err: RollbackError) -> Self {
        Self::Rollback(Box::new(err))
    }
}

/// Input rejected before any I/O happened.
#[derive(Debug, Clone, Error, Serialize, Deserialize)]
#[error("Invalid {subject} '{}': {reason}", path.display())]
pub struct ValidationError {
    /// What was rejected, `path` unless an argument.
    #[serde(default = "default_subject")]
    pub subject: String,
    /// The offending path, or the argument value.
    pub path: PathBuf,
    /// Why it was rejected.
    pub reason: String,
}

fn default_subject() -> String {
    "path".to_string()
}

impl ValidationError {
    /// Creates a new path validation error.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self {
            subject: default_subject(),
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Creates a validation error for a non-path argument.
    #[must_use]
    pub fn argument(subject: impl Into<String>, value: &str, reason: impl Into<String>) -> Self {
        Self {
            subject: subject.into(),
            path: PathBuf::from(value),
            reason: reason.into(),
        }
    }
}

/// One restoration step that failed during rollback.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RestoreFailure {
    /// Sequence index of the operation record being undone.
    pub sequence: usize,
    /// The path that could not be restored.
    pub path: PathBuf,
    /// The classified failure.
    pub error: OpError,
}

/// A rollback that could not restore every journaled mutation.
///
/// The filesystem is inconsistent when this is returned: the original
/// failure happened, and recovery of at least one path failed as well.
#[derive(Debug, Error)]
#[error(
    "transaction {transaction_id} failed and {} of {attempted} restorations failed: {original}",
    failures.len()
)]
pub struct RollbackError {
    /// The transaction that failed.
    pub transaction_id: Uuid,
    /// The error that triggered the rollback.
    #[source]
    pub original: FlowError,
    /// Every restoration step that failed, in replay order.
    pub failures: Vec<RestoreFailure>,
    /// How many restoration steps were attempted.
    pub attempted: usize,
}

/// Errors related to plugin registration.
#[derive(Debug, Clone, Error)]
pub enum PluginError {
    /// The install hook failed; nothing stays registered.
    #[error("Plugin '{name}' failed to install: {reason}")]
    InstallFailed {
        /// The plugin name.
        name: String,
        /// The reason for failure.
        reason: String,
    },

    /// The uninstall hook failed; entries were still removed.
    #[error("Plugin '{name}' failed to uninstall: {reason}")]
    UninstallFailed {
        /// The plugin name.
        name: String,
        /// The reason for failure.
        reason: String,
    },

    /// No plugin with this name is installed.
    #[error("Plugin not installed: {name}")]
    NotInstalled {
        /// The plugin name.
        name: String,
    },

    /// No command, filter, or transformer with this name is registered.
    #[error("No {kind} registered under '{name}'")]
    NotRegistered {
        /// Which table was searched.
        kind: &'static str,
        /// The requested name.
        name: String,
    },

    /// A registered command failed.
    #[error("Command '{name}' failed: {reason}")]
    CommandFailed {
        /// The command name.
        name: String,
        /// The reason for failure.
        reason: String,
    },
}

impl PluginError {
    /// Creates an install failure.
    #[must_use]
    pub fn install_failed(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InstallFailed {
            name: name.into(),
            reason: reason.into(),
        }
    }

    /// Creates a not-registered error.
    #[must_use]
    pub fn not_registered(kind: &'static str, name: impl Into<String>) -> Self {
        Self::NotRegistered {
            kind,
            name: name.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flow_error_codes() {
        let op: FlowError = OpError::new(ErrorCode::Busy, "copy", "busy").into();
        assert_eq!(op.code(), "BUSY");
        assert!(op.is_recoverable());

        let invalid = FlowError::invalid_path("", "empty path");
        assert_eq!(invalid.code(), "INVALID_PATH");
        assert!(!invalid.is_recoverable());
    }

    #[test]
    fn test_classified_converts_other() {
        let err = FlowError::Other(anyhow::Error::new(std::io::Error::from(
            std::io::ErrorKind::NotFound,
        )));
        let classified = err.classified("read");
        let op = classified.as_op_error().unwrap();
        assert_eq!(op.code, ErrorCode::NotFound);
        assert_eq!(op.operation, "read");
    }

    #[test]
    fn test_classified_keeps_typed() {
        let err = FlowError::invalid_path("/x", "bad");
        assert!(matches!(err.classified("read"), FlowError::Validation(_)));
    }

    #[test]
    fn test_rollback_error_message() {
        let original: FlowError = OpError::new(ErrorCode::NotFound, "copy", "missing").into();
        let err = RollbackError {
            transaction_id: Uuid::nil(),
            original,
            failures: vec![RestoreFailure {
                sequence: 0,
                path: PathBuf::from("/a"),
                error: OpError::new(ErrorCode::BackupMissing, "restore", "gone"),
            }],
            attempted: 2,
        };
        let flow: FlowError = err.into();
        assert_eq!(flow.code(), "ROLLBACK_FAILED");
        assert!(flow.to_string().contains("1 of 2 restorations failed"));
    }

    #[test]
    fn test_plugin_error_display() {
        let err = PluginError::not_registered("filter", "upper");
        assert_eq!(err.to_string(), "No filter registered under 'upper'");
    }
}
