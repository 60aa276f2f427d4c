//! The scoped operation proxy handed to a transaction callback.

use super::record::{OperationKind, OperationRecord, TargetRecord};
use super::state::TransactionState;
use crate::backup::{BackupRecord, BackupStore};
use crate::cancellation::CancellationToken;
use crate::errors::{ErrorCode, FlowError, OpError};
use crate::events::{ProgressEvent, ProgressReporter, ProgressStep};
use crate::fs::ops::run_primitive;
use crate::fs::{
    CommandOutput, CommandRunner, CopyOptions, ExecOptions, FileSystem, MkdirOptions,
    MutatingOps, RemoveOptions,
};
use crate::paths::PathValidator;
use crate::retry::RetryOptions;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::fmt;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

/// Which paths a call mutates.
enum Targets {
    Paths(Vec<PathBuf>),
    /// The highest ancestor of this path that does not exist yet.
    HighestMissing(PathBuf),
}

#[derive(Default)]
struct Journal {
    records: Vec<OperationRecord>,
    /// The first primitive that failed, even if the callback ignored it.
    failure: Option<OpError>,
    /// Set once the manager has finished with the backup directory.
    backups_released: bool,
}

/// The undo log and first primitive failure, as of closing.
pub(super) struct Closed {
    pub records: Vec<OperationRecord>,
    pub failure: Option<OpError>,
}

pub(super) struct HandleParts {
    pub id: Uuid,
    pub fs: Arc<dyn FileSystem>,
    pub runner: Arc<dyn CommandRunner>,
    pub validator: PathValidator,
    pub backups: BackupStore,
    pub dry_run: bool,
    pub retry: Option<RetryOptions>,
    pub progress: ProgressReporter,
}

struct Inner {
    parts: HandleParts,
    /// Held for the whole of every call, so calls run in program order.
    gate: tokio::sync::Mutex<()>,
    journal: Mutex<Journal>,
    state: Mutex<TransactionState>,
    closed: CancellationToken,
}

/// Journaling proxy over the primitive operations.
///
/// Every mutating call validates its paths, captures a pre-image of each
/// target, appends an [`OperationRecord`], and only then runs the primitive.
/// Once the transaction finishes the handle is closed and further calls fail
/// with `TRANSACTION_CLOSED`.
#[derive(Clone)]
pub struct TransactionHandle {
    inner: Arc<Inner>,
}

impl fmt::Debug for TransactionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransactionHandle")
            .field("id", &self.inner.parts.id)
            .field("dry_run", &self.inner.parts.dry_run)
            .field("state", &*self.inner.state.lock())
            .field("closed", &self.inner.closed)
            .field("operations", &self.inner.journal.lock().records.len())
            .finish()
    }
}

impl TransactionHandle {
    pub(super) fn new(parts: HandleParts) -> Self {
        Self {
            inner: Arc::new(Inner {
                parts,
                gate: tokio::sync::Mutex::new(()),
                journal: Mutex::new(Journal::default()),
                state: Mutex::new(TransactionState::Pending),
                closed: CancellationToken::new(),
            }),
        }
    }

    /// The transaction id.
    #[must_use]
    pub fn id(&self) -> Uuid {
        self.inner.parts.id
    }

    /// Whether calls are journaled without touching the filesystem.
    #[must_use]
    pub fn is_dry_run(&self) -> bool {
        self.inner.parts.dry_run
    }

    /// Whether the transaction has finished.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.closed.is_cancelled()
    }

    /// Current lifecycle state.
    ///
    /// Terminal once the manager returns: [`TransactionState::Committed`],
    /// [`TransactionState::RolledBack`] or [`TransactionState::Failed`].
    #[must_use]
    pub fn state(&self) -> TransactionState {
        *self.inner.state.lock()
    }

    /// Snapshot of the undo log.
    #[must_use]
    pub fn records(&self) -> Vec<OperationRecord> {
        self.inner.journal.lock().records.clone()
    }

    /// The first primitive failure seen so far.
    #[must_use]
    pub fn first_failure(&self) -> Option<OpError> {
        self.inner.journal.lock().failure.clone()
    }

    /// Moves to `next`.
    ///
    /// # Errors
    ///
    /// When `next` is not reachable from the current state. The state is
    /// left unchanged.
    pub(super) fn advance(&self, next: TransactionState) -> Result<(), FlowError> {
        let mut state = self.inner.state.lock();
        if !state.can_transition_to(next) {
            return Err(FlowError::Other(anyhow::anyhow!(
                "illegal transaction state transition {} -> {next}",
                *state
            )));
        }
        debug!(transaction_id = %self.id(), from = %*state, to = %next, "State transition");
        *state = next;
        Ok(())
    }

    /// Closes the handle and returns the final undo log.
    ///
    /// No record can be appended and no failure recorded after this returns.
    pub(super) fn close(&self, reason: &str) -> Closed {
        let journal = self.inner.journal.lock();
        self.inner.closed.cancel(reason);
        Closed {
            records: journal.records.clone(),
            failure: journal.failure.clone(),
        }
    }

    /// Marks the backup directory as no longer in use by the manager.
    pub(super) fn release_backups(&self) {
        self.inner.journal.lock().backups_released = true;
    }

    pub(super) fn backups(&self) -> &BackupStore {
        &self.inner.parts.backups
    }

    fn ensure_open(&self, kind: OperationKind) -> Result<(), FlowError> {
        if self.inner.closed.is_cancelled() {
            let reason = self.inner.closed.reason().unwrap_or_default();
            return Err(OpError::closed(kind.as_str(), &reason).into());
        }
        Ok(())
    }

    async fn resolve(&self, targets: Targets) -> Vec<PathBuf> {
        match targets {
            Targets::Paths(paths) => paths,
            Targets::HighestMissing(path) => {
                let fs = &self.inner.parts.fs;
                let mut highest = None;
                let mut current = Some(path.as_path());
                while let Some(candidate) = current {
                    if fs.exists(candidate).await {
                        break;
                    }
                    highest = Some(candidate.to_path_buf());
                    current = candidate.parent();
                }
                highest.into_iter().collect()
            }
        }
    }

    async fn capture_all(&self, paths: &[PathBuf], sequence: usize) -> Result<Vec<TargetRecord>, FlowError> {
        let mut targets = Vec::with_capacity(paths.len());
        for path in paths {
            match self.inner.parts.backups.capture(path, sequence).await {
                Ok(backup) => targets.push(TargetRecord {
                    path: path.clone(),
                    pre_existed: backup.is_some(),
                    backup,
                }),
                Err(err) => {
                    self.discard_captured(&targets).await;
                    return Err(err.into());
                }
            }
        }
        Ok(targets)
    }

    async fn discard_captured(&self, targets: &[TargetRecord]) {
        let backups: Vec<&BackupRecord> = targets.iter().filter_map(|t| t.backup.as_ref()).collect();
        for backup in backups {
            if let Err(err) = self.inner.parts.backups.discard(backup).await {
                warn!(transaction_id = %self.id(), error = %err, "Failed to discard backup");
            }
        }
    }

    /// Appends a record unless the handle closed in the meantime.
    ///
    /// Returns the log length after the append.
    async fn append(&self, record: OperationRecord) -> Result<usize, FlowError> {
        let released = {
            let mut journal = self.inner.journal.lock();
            if !self.inner.closed.is_cancelled() {
                journal.records.push(record);
                return Ok(journal.records.len());
            }
            journal.backups_released
        };

        debug!(
            transaction_id = %self.id(),
            operation = record.kind.as_str(),
            "Transaction closed during capture, dropping backups"
        );
        self.discard_captured(&record.targets).await;
        if released {
            if let Err(err) = self.inner.parts.backups.discard_all().await {
                warn!(transaction_id = %self.id(), error = %err, "Failed to remove backup directory");
            }
        }
        let reason = self.inner.closed.reason().unwrap_or_default();
        Err(OpError::closed(record.kind.as_str(), &reason).into())
    }

    fn record_failure(&self, kind: OperationKind, err: &FlowError) {
        let mut journal = self.inner.journal.lock();
        if journal.failure.is_some() || self.inner.closed.is_cancelled() {
            return;
        }
        journal.failure = Some(
            err.as_op_error()
                .cloned()
                .unwrap_or_else(|| OpError::new(ErrorCode::Unknown, kind.as_str(), err.to_string())),
        );
    }

    fn report(&self, record: OperationRecord, total: usize) {
        let current = record.sequence;
        self.inner.parts.progress.report(&ProgressEvent {
            step: ProgressStep::Operation(record),
            total,
            current,
        });
    }

    async fn journaled<T, F, Fut>(
        &self,
        kind: OperationKind,
        targets: Targets,
        command: Option<String>,
        synthetic: T,
        primitive: F,
    ) -> Result<T, FlowError>
    where
        T: Send,
        F: FnMut() -> Fut + Send,
        Fut: Future<Output = Result<T, OpError>> + Send,
    {
        self.ensure_open(kind)?;
        let _gate = self.inner.gate.lock().await;
        self.ensure_open(kind)?;

        let paths = self.resolve(targets).await;
        let sequence = self.inner.journal.lock().records.len();
        let parts = &self.inner.parts;

        if parts.dry_run {
            let mut targets = Vec::with_capacity(paths.len());
            for path in paths {
                let pre_existed = parts.fs.exists(&path).await;
                targets.push(TargetRecord {
                    path,
                    pre_existed,
                    backup: None,
                });
            }
            let record = new_record(sequence, kind, targets, command, false);
            let total = self.append(record.clone()).await?;
            debug!(transaction_id = %parts.id, sequence, operation = kind.as_str(), "Dry run");
            self.report(record, total);
            return Ok(synthetic);
        }

        let targets = self.capture_all(&paths, sequence).await?;
        let record = new_record(sequence, kind, targets, command, true);
        let total = self.append(record.clone()).await?;

        debug!(transaction_id = %parts.id, sequence, operation = kind.as_str(), "Executing");
        let result = run_primitive(parts.retry.as_ref(), kind.as_str(), primitive).await;
        if let Err(err) = &result {
            debug!(transaction_id = %parts.id, sequence, error = %err, "Operation failed");
            self.record_failure(kind, err);
        }
        self.report(record, total);
        result
    }
}

fn new_record(
    sequence: usize,
    kind: OperationKind,
    targets: Vec<TargetRecord>,
    command: Option<String>,
    executed: bool,
) -> OperationRecord {
    OperationRecord {
        sequence,
        kind,
        targets,
        command,
        executed,
        created_at: crate::utils::now(),
    }
}

#[async_trait]
impl MutatingOps for TransactionHandle {
    async fn copy(&self, src: &Path, dst: &Path, options: CopyOptions) -> Result<(), FlowError> {
        let validator = &self.inner.parts.validator;
        let (src, dst) = (validator.validate(src)?, validator.validate(dst)?);
        let fs = &self.inner.parts.fs;
        self.journaled(OperationKind::Copy, Targets::Paths(vec![dst.clone()]), None, (), || {
            fs.copy(&src, &dst, &options)
        })
        .await
    }

    async fn move_path(&self, src: &Path, dst: &Path) -> Result<(), FlowError> {
        let validator = &self.inner.parts.validator;
        let (src, dst) = (validator.validate(src)?, validator.validate(dst)?);
        let fs = &self.inner.parts.fs;
        let targets = Targets::Paths(vec![src.clone(), dst.clone()]);
        self.journaled(OperationKind::Move, targets, None, (), || fs.rename(&src, &dst))
            .await
    }

    async fn mkdir(&self, path: &Path, options: MkdirOptions) -> Result<(), FlowError> {
        let path = self.inner.parts.validator.validate(path)?;
        let fs = &self.inner.parts.fs;
        let targets = if options.recursive {
            Targets::HighestMissing(path.clone())
        } else {
            Targets::Paths(vec![path.clone()])
        };
        self.journaled(OperationKind::Mkdir, targets, None, (), || fs.create_dir(&path, &options))
            .await
    }

    async fn remove(&self, path: &Path, options: RemoveOptions) -> Result<(), FlowError> {
        let path = self.inner.parts.validator.validate(path)?;
        let fs = &self.inner.parts.fs;
        self.journaled(OperationKind::Remove, Targets::Paths(vec![path.clone()]), None, (), || {
            fs.remove(&path, &options)
        })
        .await
    }

    async fn write_file(&self, path: &Path, content: &[u8]) -> Result<(), FlowError> {
        let path = self.inner.parts.validator.validate(path)?;
        let fs = &self.inner.parts.fs;
        self.journaled(OperationKind::WriteFile, Targets::Paths(vec![path.clone()]), None, (), || {
            fs.write_file(&path, content)
        })
        .await
    }

    async fn exec(&self, command: &str, options: ExecOptions) -> Result<CommandOutput, FlowError> {
        let mut options = options;
        if let Some(creates) = options.creates.take() {
            options.creates = Some(self.inner.parts.validator.validate(&creates)?);
        }
        let targets = Targets::Paths(options.creates.iter().cloned().collect());
        let runner = &self.inner.parts.runner;
        self.journaled(
            OperationKind::Exec,
            targets,
            Some(command.to_string()),
            CommandOutput::default(),
            || runner.run(command, &options),
        )
        .await
    }
}
