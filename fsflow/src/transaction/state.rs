//! Transaction lifecycle states.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle of a transaction.
///
/// `Pending -> Running -> Committed | RolledBack`, and `RolledBack -> Failed`
/// when restoration could not complete.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionState {
    /// Created, callback not started.
    Pending,
    /// Callback running; the undo log is growing.
    Running,
    /// Callback succeeded; backups discarded.
    Committed,
    /// Callback failed; every journaled mutation was undone.
    RolledBack,
    /// Callback failed and at least one restoration failed too.
    Failed,
}

impl TransactionState {
    /// Returns the state name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Committed => "committed",
            Self::RolledBack => "rolled_back",
            Self::Failed => "failed",
        }
    }

    /// Whether no further transition is possible.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Committed | Self::Failed)
    }

    /// Whether moving to `next` is a legal transition.
    #[must_use]
    pub const fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Running)
                | (Self::Running, Self::Committed | Self::RolledBack)
                | (Self::RolledBack, Self::Failed)
        )
    }
}

impl fmt::Display for TransactionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
