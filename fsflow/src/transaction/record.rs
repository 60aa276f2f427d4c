//! Undo log entries.

use crate::backup::BackupRecord;
use crate::utils::Timestamp;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Kind of mutating call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    /// `copy(src, dst)`
    Copy,
    /// `move_path(src, dst)`
    Move,
    /// `mkdir(path)`
    Mkdir,
    /// `remove(path)`
    Remove,
    /// `write_file(path, content)`
    WriteFile,
    /// `exec(command)`
    Exec,
}

impl OperationKind {
    /// Returns the operation name used in errors and events.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Copy => "copy",
            Self::Move => "move",
            Self::Mkdir => "mkdir",
            Self::Remove => "remove",
            Self::WriteFile => "write_file",
            Self::Exec => "exec",
        }
    }
}

/// A path mutated by an operation and how to undo it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetRecord {
    /// The mutated path.
    pub path: PathBuf,
    /// Whether something existed at `path` before the operation.
    pub pre_existed: bool,
    /// The captured pre-image. `None` with `pre_existed == false` means the
    /// path is deleted on rollback.
    pub backup: Option<BackupRecord>,
}

/// One journaled mutating call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationRecord {
    /// Position in the undo log.
    pub sequence: usize,
    /// What was called.
    pub kind: OperationKind,
    /// Paths the call mutates, in capture order.
    pub targets: Vec<TargetRecord>,
    /// The command line, for `exec`.
    pub command: Option<String>,
    /// False under dry run.
    pub executed: bool,
    /// When the record was appended.
    pub created_at: Timestamp,
}

impl OperationRecord {
    /// Whether rollback can do anything for this record.
    #[must_use]
    pub fn is_reversible(&self) -> bool {
        !(self.kind == OperationKind::Exec && self.targets.is_empty())
    }
}
