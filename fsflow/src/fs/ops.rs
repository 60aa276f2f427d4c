//! The mutating operation surface used by scripts.

use super::{
    CommandOutput, CommandRunner, CopyOptions, ExecOptions, FileSystem, LocalFileSystem,
    MkdirOptions, RemoveOptions, ShellRunner,
};
use crate::errors::FlowError;
use crate::paths::PathValidator;
use crate::retry::{with_retry, RetryOptions};
use async_trait::async_trait;
use std::fmt;
use std::future::Future;
use std::path::Path;
use std::sync::Arc;

/// Mutating filesystem and process operations.
///
/// Implemented by [`TransactionHandle`](crate::transaction::TransactionHandle)
/// (journaled, undone on failure) and by [`DirectOps`] (applied as-is), so a
/// script written against this trait runs either way.
#[async_trait]
pub trait MutatingOps: Send + Sync {
    /// Copies `src` to `dst`.
    async fn copy(&self, src: &Path, dst: &Path, options: CopyOptions) -> Result<(), FlowError>;

    /// Moves `src` to `dst`.
    async fn move_path(&self, src: &Path, dst: &Path) -> Result<(), FlowError>;

    /// Creates a directory.
    async fn mkdir(&self, path: &Path, options: MkdirOptions) -> Result<(), FlowError>;

    /// Removes a path.
    async fn remove(&self, path: &Path, options: RemoveOptions) -> Result<(), FlowError>;

    /// Writes a file.
    async fn write_file(&self, path: &Path, content: &[u8]) -> Result<(), FlowError>;

    /// Runs a shell command.
    async fn exec(&self, command: &str, options: ExecOptions) -> Result<CommandOutput, FlowError>;
}

/// Runs a primitive once, or under a retry policy when one is configured.
pub(crate) async fn run_primitive<T, F, Fut>(
    retry: Option<&RetryOptions>,
    label: &str,
    mut primitive: F,
) -> Result<T, FlowError>
where
    F: FnMut() -> Fut + Send,
    Fut: Future<Output = Result<T, crate::errors::OpError>> + Send,
{
    match retry {
        None => primitive().await.map_err(FlowError::from),
        Some(options) => {
            let options = options.clone().with_label(label);
            with_retry(&options, || {
                let attempt = primitive();
                async move { attempt.await.map_err(FlowError::from) }
            })
            .await
        }
    }
}

/// Applies operations directly, without journaling or rollback.
#[derive(Clone)]
pub struct DirectOps {
    fs: Arc<dyn FileSystem>,
    runner: Arc<dyn CommandRunner>,
    validator: PathValidator,
    retry: Option<RetryOptions>,
}

impl Default for DirectOps {
    fn default() -> Self {
        Self::new(Arc::new(LocalFileSystem), Arc::new(ShellRunner))
    }
}

impl fmt::Debug for DirectOps {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DirectOps")
            .field("validator", &self.validator)
            .field("retry", &self.retry)
            .finish_non_exhaustive()
    }
}

impl DirectOps {
    /// Creates direct operations over the given primitives.
    #[must_use]
    pub fn new(fs: Arc<dyn FileSystem>, runner: Arc<dyn CommandRunner>) -> Self {
        Self {
            fs,
            runner,
            validator: PathValidator::new(),
            retry: None,
        }
    }

    /// Sets the path validator.
    #[must_use]
    pub fn with_validator(mut self, validator: PathValidator) -> Self {
        self.validator = validator;
        self
    }

    /// Retries every primitive under `options`.
    #[must_use]
    pub fn with_retry(mut self, options: RetryOptions) -> Self {
        self.retry = Some(options);
        self
    }
}

#[async_trait]
impl MutatingOps for DirectOps {
    async fn copy(&self, src: &Path, dst: &Path, options: CopyOptions) -> Result<(), FlowError> {
        let (src, dst) = (self.validator.validate(src)?, self.validator.validate(dst)?);
        run_primitive(self.retry.as_ref(), "copy", || self.fs.copy(&src, &dst, &options)).await
    }

    async fn move_path(&self, src: &Path, dst: &Path) -> Result<(), FlowError> {
        let (src, dst) = (self.validator.validate(src)?, self.validator.validate(dst)?);
        run_primitive(self.retry.as_ref(), "move", || self.fs.rename(&src, &dst)).await
    }

    async fn mkdir(&self, path: &Path, options: MkdirOptions) -> Result<(), FlowError> {
        let path = self.validator.validate(path)?;
        run_primitive(self.retry.as_ref(), "mkdir", || self.fs.create_dir(&path, &options)).await
    }

    async fn remove(&self, path: &Path, options: RemoveOptions) -> Result<(), FlowError> {
        let path = self.validator.validate(path)?;
        run_primitive(self.retry.as_ref(), "remove", || self.fs.remove(&path, &options)).await
    }

    async fn write_file(&self, path: &Path, content: &[u8]) -> Result<(), FlowError> {
        let path = self.validator.validate(path)?;
        run_primitive(self.retry.as_ref(), "write_file", || self.fs.write_file(&path, content)).await
    }

    async fn exec(&self, command: &str, options: ExecOptions) -> Result<CommandOutput, FlowError> {
        run_primitive(self.retry.as_ref(), "exec", || self.runner.run(command, &options)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::{ErrorCode, OpError};
    use crate::fs::{MockCommandRunner, MockFileSystem};
    use std::sync::atomic::{AtomicU32, Ordering};
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_direct_ops_apply_immediately() {
        let tmp = TempDir::new().unwrap();
        let ops = DirectOps::default();
        let dir = tmp.path().join("out");

        ops.mkdir(&dir, MkdirOptions::default()).await.unwrap();
        ops.write_file(&dir.join("a.txt"), b"hi").await.unwrap();
        ops.copy(&dir.join("a.txt"), &dir.join("b.txt"), CopyOptions::default())
            .await
            .unwrap();
        ops.move_path(&dir.join("b.txt"), &dir.join("c.txt")).await.unwrap();

        assert_eq!(std::fs::read(dir.join("c.txt")).unwrap(), b"hi");
        assert!(!dir.join("b.txt").exists());
    }

    #[tokio::test]
    async fn test_direct_ops_validate_before_io() {
        let mut fs = MockFileSystem::new();
        fs.expect_write_file().never();
        let ops = DirectOps::new(Arc::new(fs), Arc::new(MockCommandRunner::new()));

        let err = ops.write_file(Path::new(""), b"x").await.unwrap_err();
        assert!(matches!(err, FlowError::Validation(_)));
    }

    #[tokio::test]
    async fn test_direct_ops_retry_primitive() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let mut fs = MockFileSystem::new();
        fs.expect_write_file().times(2).returning(move |path, _| {
            if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                Err(OpError::new(ErrorCode::Busy, "write_file", "locked").with_path(path))
            } else {
                Ok(())
            }
        });

        let ops = DirectOps::new(Arc::new(fs), Arc::new(MockCommandRunner::new()))
            .with_retry(RetryOptions::new().with_attempts(3).with_delay_ms(1));
        ops.write_file(Path::new("/tmp/locked"), b"x").await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
