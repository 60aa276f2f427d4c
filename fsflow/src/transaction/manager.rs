//! Transaction execution, commit, and rollback.

use super::handle::{HandleParts, TransactionHandle};
use super::record::OperationRecord;
use super::state::TransactionState;
use crate::backup::BackupStore;
use crate::config::FlowConfig;
use crate::errors::{FlowError, OpError, RestoreFailure, RollbackError};
use crate::events::{EventSink, NoOpEventSink, ProgressCallback, ProgressReporter};
use crate::fs::{CommandRunner, FileSystem, LocalFileSystem, RemoveOptions, ShellRunner};
use crate::paths::{PathCache, PathValidator};
use crate::retry::RetryOptions;
use crate::utils::generate_uuid;
use std::fmt;
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinError;
use tracing::{debug, info, warn};

/// Per-transaction options.
#[derive(Clone, Default)]
pub struct TransactionOptions {
    /// Journal calls without touching the filesystem.
    pub dry_run: bool,
    /// Roll back if the callback has not finished in time.
    pub timeout: Option<Duration>,
    /// Parent directory for this transaction's backup directory.
    pub backup_dir: Option<PathBuf>,
    /// Called once per logged operation.
    pub on_progress: Option<ProgressCallback>,
    /// Retry policy applied to every primitive.
    pub retry: Option<RetryOptions>,
}

impl fmt::Debug for TransactionOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransactionOptions")
            .field("dry_run", &self.dry_run)
            .field("timeout", &self.timeout)
            .field("backup_dir", &self.backup_dir)
            .field("on_progress", &self.on_progress.is_some())
            .field("retry", &self.retry)
            .finish()
    }
}

impl TransactionOptions {
    /// Creates default options.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Enables dry run.
    #[must_use]
    pub const fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    /// Sets the timeout.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Sets the backup base directory.
    #[must_use]
    pub fn with_backup_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.backup_dir = Some(dir.into());
        self
    }

    /// Sets the progress callback.
    #[must_use]
    pub fn with_progress<F>(mut self, callback: F) -> Self
    where
        F: Fn(&crate::events::ProgressEvent) + Send + Sync + 'static,
    {
        self.on_progress = Some(Arc::new(callback));
        self
    }

    /// Retries every primitive under `options`.
    #[must_use]
    pub fn with_retry(mut self, options: RetryOptions) -> Self {
        self.retry = Some(options);
        self
    }
}

/// Runs callbacks as transactions over a set of primitives.
#[derive(Clone)]
pub struct TransactionManager {
    fs: Arc<dyn FileSystem>,
    runner: Arc<dyn CommandRunner>,
    validator: PathValidator,
    backup_root: PathBuf,
    default_timeout: Option<Duration>,
    sink: Arc<dyn EventSink>,
}

impl Default for TransactionManager {
    fn default() -> Self {
        Self::from_config(&FlowConfig::default())
    }
}

impl fmt::Debug for TransactionManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransactionManager")
            .field("backup_root", &self.backup_root)
            .field("default_timeout", &self.default_timeout)
            .field("validator", &self.validator)
            .finish_non_exhaustive()
    }
}

impl TransactionManager {
    /// Creates a manager over local primitives.
    #[must_use]
    pub fn new(backup_root: impl Into<PathBuf>) -> Self {
        Self {
            fs: Arc::new(LocalFileSystem),
            runner: Arc::new(ShellRunner),
            validator: PathValidator::new(),
            backup_root: backup_root.into(),
            default_timeout: None,
            sink: Arc::new(NoOpEventSink),
        }
    }

    /// Creates a manager from configuration.
    #[must_use]
    pub fn from_config(config: &FlowConfig) -> Self {
        let cache = Arc::new(PathCache::new(config.path_cache));
        let mut manager = Self::new(config.backup_root.clone())
            .with_validator(PathValidator::new().with_cache(cache));
        manager.default_timeout = config.default_timeout();
        manager
    }

    /// Replaces the filesystem primitives.
    #[must_use]
    pub fn with_file_system(mut self, fs: Arc<dyn FileSystem>) -> Self {
        self.fs = fs;
        self
    }

    /// Replaces the command runner.
    #[must_use]
    pub fn with_runner(mut self, runner: Arc<dyn CommandRunner>) -> Self {
        self.runner = runner;
        self
    }

    /// Replaces the path validator.
    #[must_use]
    pub fn with_validator(mut self, validator: PathValidator) -> Self {
        self.validator = validator;
        self
    }

    /// Timeout used when the options do not set one.
    #[must_use]
    pub const fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = Some(timeout);
        self
    }

    /// Sets the event sink.
    #[must_use]
    pub fn with_event_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sink = sink;
        self
    }

    /// Runs `callback` as a transaction.
    ///
    /// The callback receives a [`TransactionHandle`]; every mutation made
    /// through it is undone if the callback fails, panics, or times out. A
    /// failed primitive rolls the transaction back even when the callback
    /// ignores the error and returns `Ok`.
    ///
    /// # Errors
    ///
    /// The callback's error (or `TIMEOUT`) when rollback succeeded, or
    /// [`FlowError::Rollback`] when some restoration failed as well.
    pub async fn run<T, F, Fut>(&self, options: TransactionOptions, callback: F) -> Result<T, FlowError>
    where
        F: FnOnce(TransactionHandle) -> Fut,
        Fut: Future<Output = Result<T, FlowError>> + Send + 'static,
        T: Send + 'static,
    {
        let id = generate_uuid();
        let base = options.backup_dir.clone().unwrap_or_else(|| self.backup_root.clone());
        let handle = TransactionHandle::new(HandleParts {
            id,
            fs: self.fs.clone(),
            runner: self.runner.clone(),
            validator: self.validator.clone(),
            backups: BackupStore::new(&base, id),
            dry_run: options.dry_run,
            retry: options.retry.clone(),
            progress: ProgressReporter::new(options.on_progress.clone(), self.sink.clone()),
        });

        handle.advance(TransactionState::Running)?;
        info!(transaction_id = %id, dry_run = options.dry_run, "Transaction started");
        self.sink
            .emit(
                "transaction.started",
                Some(serde_json::json!({ "transaction_id": id, "dry_run": options.dry_run })),
            )
            .await;

        let timeout = options.timeout.or(self.default_timeout);
        let mut task = tokio::spawn(callback(handle.clone()));
        let outcome = match timeout {
            Some(limit) => match tokio::time::timeout(limit, &mut task).await {
                Ok(joined) => flatten(joined),
                Err(_) => {
                    warn!(transaction_id = %id, timeout = ?limit, "Transaction timed out");
                    Err(OpError::timeout("transaction", limit.as_millis()).into())
                }
            },
            None => flatten(task.await),
        };

        match outcome {
            Ok(value) => {
                let closed = handle.close("finished");
                if let Some(failure) = closed.failure {
                    warn!(
                        transaction_id = %id,
                        error = %failure,
                        "Callback returned success after a failed operation"
                    );
                    return Err(self.rollback(&handle, &closed.records, failure.into()).await);
                }
                self.commit(&handle, &closed.records).await?;
                Ok(value)
            }
            Err(error) => {
                let closed = handle.close("rolled back");
                Err(self.rollback(&handle, &closed.records, error).await)
            }
        }
    }

    async fn commit(&self, handle: &TransactionHandle, records: &[OperationRecord]) -> Result<(), FlowError> {
        let id = handle.id();
        handle.advance(TransactionState::Committed)?;
        handle.release_backups();
        if let Err(err) = handle.backups().discard_all().await {
            warn!(transaction_id = %id, error = %err, "Failed to remove backups after commit");
        }
        info!(transaction_id = %id, operations = records.len(), "Transaction committed");
        self.sink
            .emit(
                "transaction.committed",
                Some(serde_json::json!({ "transaction_id": id, "operations": records.len() })),
            )
            .await;
        Ok(())
    }

    async fn rollback(
        &self,
        handle: &TransactionHandle,
        records: &[OperationRecord],
        original: FlowError,
    ) -> FlowError {
        let id = handle.id();
        if let Err(err) = handle.advance(TransactionState::RolledBack) {
            warn!(transaction_id = %id, error = %err, "Rolling back from an unexpected state");
        }
        info!(transaction_id = %id, error = %original, operations = records.len(), "Rolling back");

        let mut failures = Vec::new();
        let mut attempted = 0;
        for record in records.iter().rev().filter(|r| r.executed) {
            if !record.is_reversible() {
                warn!(
                    transaction_id = %id,
                    sequence = record.sequence,
                    command = record.command.as_deref().unwrap_or_default(),
                    "exec without a declared target cannot be undone"
                );
                continue;
            }
            attempted += self.undo(handle, record, &mut failures).await;
        }

        handle.release_backups();
        if let Err(err) = handle.backups().discard_all().await {
            warn!(transaction_id = %id, error = %err, "Failed to remove backups after rollback");
        }

        if failures.is_empty() {
            info!(transaction_id = %id, restored = attempted, "Transaction rolled back");
            self.sink
                .emit(
                    "transaction.rolled_back",
                    Some(serde_json::json!({
                        "transaction_id": id,
                        "restored": attempted,
                        "error": original.to_string(),
                    })),
                )
                .await;
            return original;
        }

        if let Err(err) = handle.advance(TransactionState::Failed) {
            warn!(transaction_id = %id, error = %err, "Could not mark transaction failed");
        }
        warn!(
            transaction_id = %id,
            failed = failures.len(),
            attempted,
            "Rollback incomplete"
        );
        self.sink
            .emit(
                "transaction.failed",
                Some(serde_json::json!({
                    "transaction_id": id,
                    "failures": failures.len(),
                    "attempted": attempted,
                    "error": original.to_string(),
                })),
            )
            .await;
        RollbackError {
            transaction_id: id,
            original,
            failures,
            attempted,
        }
        .into()
    }

    /// Undoes one record's targets in reverse. Returns the number of steps tried.
    async fn undo(
        &self,
        handle: &TransactionHandle,
        record: &OperationRecord,
        failures: &mut Vec<RestoreFailure>,
    ) -> usize {
        let mut attempted = 0;
        for target in record.targets.iter().rev() {
            let result = match (&target.backup, target.pre_existed) {
                (Some(backup), _) => {
                    attempted += 1;
                    let restored = handle.backups().restore(backup).await;
                    if restored.is_ok() {
                        if let Err(err) = handle.backups().discard(backup).await {
                            warn!(transaction_id = %handle.id(), error = %err, "Failed to discard restored backup");
                        }
                    }
                    restored
                }
                (None, false) => {
                    attempted += 1;
                    self.fs
                        .remove(&target.path, &RemoveOptions { recursive: true, force: true })
                        .await
                }
                (None, true) => Ok(()),
            };

            match result {
                Ok(()) => debug!(
                    transaction_id = %handle.id(),
                    sequence = record.sequence,
                    path = %target.path.display(),
                    "Undid operation"
                ),
                Err(error) => {
                    warn!(
                        transaction_id = %handle.id(),
                        sequence = record.sequence,
                        path = %target.path.display(),
                        error = %error,
                        "Restoration failed"
                    );
                    failures.push(RestoreFailure {
                        sequence: record.sequence,
                        path: target.path.clone(),
                        error,
                    });
                }
            }
        }
        attempted
    }
}

fn flatten<T>(joined: Result<Result<T, FlowError>, JoinError>) -> Result<T, FlowError> {
    match joined {
        Ok(result) => result,
        Err(err) if err.is_panic() => {
            let panic = err.into_panic();
            let message = panic
                .downcast_ref::<&str>()
                .map(|s| (*s).to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            Err(FlowError::Other(anyhow::anyhow!("transaction callback panicked: {message}")))
        }
        Err(err) => Err(FlowError::Other(anyhow::anyhow!("transaction callback was cancelled: {err}"))),
    }
}

/// Runs `callback` as a transaction over the local filesystem.
///
/// Shorthand for [`TransactionManager::default`] followed by
/// [`TransactionManager::run`].
///
/// # Errors
///
/// See [`TransactionManager::run`].
pub async fn transaction<T, F, Fut>(options: TransactionOptions, callback: F) -> Result<T, FlowError>
where
    F: FnOnce(TransactionHandle) -> Fut,
    Fut: Future<Output = Result<T, FlowError>> + Send + 'static,
    T: Send + 'static,
{
    TransactionManager::default().run(options, callback).await
}
