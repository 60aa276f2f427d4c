//! Fault-injecting filesystem wrapper.

use crate::errors::{ErrorCode, OpError};
use crate::fs::{CopyOptions, FileSystem, LocalFileSystem, MkdirOptions, RemoveOptions};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

/// Primitive selector for fault rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FaultOp {
    /// [`FileSystem::copy`]
    Copy,
    /// [`FileSystem::rename`]
    Rename,
    /// [`FileSystem::create_dir`]
    CreateDir,
    /// [`FileSystem::remove`]
    Remove,
    /// [`FileSystem::write_file`]
    WriteFile,
    /// [`FileSystem::read_file`]
    ReadFile,
    /// Every primitive above.
    Any,
}

impl FaultOp {
    const fn name(self) -> &'static str {
        match self {
            Self::Copy => "copy",
            Self::Rename => "move",
            Self::CreateDir => "mkdir",
            Self::Remove => "remove",
            Self::WriteFile => "write_file",
            Self::ReadFile => "read_file",
            Self::Any => "any",
        }
    }
}

#[derive(Debug, Clone)]
enum Effect {
    Fail(ErrorCode),
    Delay(Duration),
}

#[derive(Debug, Clone)]
struct Rule {
    op: FaultOp,
    path: PathBuf,
    effect: Effect,
    remaining: Option<usize>,
}

/// Wraps a [`FileSystem`] and injects failures or delays.
///
/// A rule matches when its operation matches and any path involved in the
/// call equals or lies under the rule's path. Failures are returned without
/// calling the inner filesystem.
#[derive(Clone)]
pub struct FaultyFileSystem {
    inner: Arc<dyn FileSystem>,
    rules: Arc<Mutex<Vec<Rule>>>,
    calls: Arc<Mutex<HashMap<FaultOp, usize>>>,
}

impl std::fmt::Debug for FaultyFileSystem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FaultyFileSystem")
            .field("rules", &self.rules.lock().len())
            .finish_non_exhaustive()
    }
}

impl Default for FaultyFileSystem {
    fn default() -> Self {
        Self::new(Arc::new(LocalFileSystem))
    }
}

impl FaultyFileSystem {
    /// Wraps `inner`.
    #[must_use]
    pub fn new(inner: Arc<dyn FileSystem>) -> Self {
        Self {
            inner,
            rules: Arc::new(Mutex::new(Vec::new())),
            calls: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Fails every matching call with `code`.
    pub fn fail_on(&self, op: FaultOp, path: impl Into<PathBuf>, code: ErrorCode) -> &Self {
        self.push(op, path.into(), Effect::Fail(code), None)
    }

    /// Fails the next `times` matching calls with `code`.
    pub fn fail_times(&self, op: FaultOp, path: impl Into<PathBuf>, code: ErrorCode, times: usize) -> &Self {
        self.push(op, path.into(), Effect::Fail(code), Some(times))
    }

    /// Delays every matching call.
    pub fn delay_on(&self, op: FaultOp, path: impl Into<PathBuf>, delay: Duration) -> &Self {
        self.push(op, path.into(), Effect::Delay(delay), None)
    }

    /// Removes all rules.
    pub fn clear(&self) {
        self.rules.lock().clear();
    }

    /// How many times `op` was invoked (`Any` sums everything).
    #[must_use]
    pub fn calls(&self, op: FaultOp) -> usize {
        let calls = self.calls.lock();
        if op == FaultOp::Any {
            calls.values().sum()
        } else {
            calls.get(&op).copied().unwrap_or(0)
        }
    }

    fn push(&self, op: FaultOp, path: PathBuf, effect: Effect, remaining: Option<usize>) -> &Self {
        self.rules.lock().push(Rule {
            op,
            path,
            effect,
            remaining,
        });
        self
    }

    async fn intercept(&self, op: FaultOp, paths: &[&Path]) -> Result<(), OpError> {
        *self.calls.lock().entry(op).or_insert(0) += 1;

        let mut delay = Duration::ZERO;
        let mut failure = None;
        {
            let mut rules = self.rules.lock();
            for rule in rules.iter_mut() {
                let op_matches = rule.op == FaultOp::Any || rule.op == op;
                let path_matches = paths.iter().any(|p| p.starts_with(&rule.path));
                if !op_matches || !path_matches || rule.remaining == Some(0) {
                    continue;
                }
                if let Some(left) = rule.remaining.as_mut() {
                    *left -= 1;
                }
                match rule.effect {
                    Effect::Delay(d) => delay += d,
                    Effect::Fail(code) if failure.is_none() => {
                        failure = Some(
                            OpError::new(code, op.name(), "injected failure").with_path(paths[0]),
                        );
                    }
                    Effect::Fail(_) => {}
                }
            }
        }

        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        failure.map_or(Ok(()), Err)
    }
}

#[async_trait]
impl FileSystem for FaultyFileSystem {
    async fn copy(&self, src: &Path, dst: &Path, options: &CopyOptions) -> Result<(), OpError> {
        self.intercept(FaultOp::Copy, &[dst, src]).await?;
        self.inner.copy(src, dst, options).await
    }

    async fn rename(&self, src: &Path, dst: &Path) -> Result<(), OpError> {
        self.intercept(FaultOp::Rename, &[src, dst]).await?;
        self.inner.rename(src, dst).await
    }

    async fn create_dir(&self, path: &Path, options: &MkdirOptions) -> Result<(), OpError> {
        self.intercept(FaultOp::CreateDir, &[path]).await?;
        self.inner.create_dir(path, options).await
    }

    async fn remove(&self, path: &Path, options: &RemoveOptions) -> Result<(), OpError> {
        self.intercept(FaultOp::Remove, &[path]).await?;
        self.inner.remove(path, options).await
    }

    async fn write_file(&self, path: &Path, content: &[u8]) -> Result<(), OpError> {
        self.intercept(FaultOp::WriteFile, &[path]).await?;
        self.inner.write_file(path, content).await
    }

    async fn read_file(&self, path: &Path) -> Result<Vec<u8>, OpError> {
        self.intercept(FaultOp::ReadFile, &[path]).await?;
        self.inner.read_file(path).await
    }

    async fn exists(&self, path: &Path) -> bool {
        self.inner.exists(path).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_fail_times_then_pass_through() {
        let tmp = TempDir::new().unwrap();
        let fs = FaultyFileSystem::default();
        let file = tmp.path().join("f");
        fs.fail_times(FaultOp::WriteFile, &file, ErrorCode::Busy, 1);

        let err = fs.write_file(&file, b"x").await.unwrap_err();
        assert_eq!(err.code, ErrorCode::Busy);
        assert!(err.recoverable);

        fs.write_file(&file, b"x").await.unwrap();
        assert_eq!(fs.calls(FaultOp::WriteFile), 2);
        assert!(file.exists());
    }

    #[tokio::test]
    async fn test_rule_matches_subtree_and_any() {
        let tmp = TempDir::new().unwrap();
        let fs = FaultyFileSystem::default();
        fs.fail_on(FaultOp::Any, tmp.path().join("locked"), ErrorCode::PermissionDenied);

        let err = fs
            .create_dir(&tmp.path().join("locked/inner"), &MkdirOptions::default())
            .await
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::PermissionDenied);
        fs.create_dir(&tmp.path().join("open"), &MkdirOptions::default())
            .await
            .unwrap();
    }
}
