//! Path validation and normalization.
//!
//! Every path handed to a transaction or [`DirectOps`](crate::fs::DirectOps)
//! passes through a [`PathValidator`] before any I/O happens.

mod cache;

pub use cache::{CacheConfig, PathCache};

use crate::errors::FlowError;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

/// Longest accepted path, in bytes.
pub const MAX_PATH_BYTES: usize = 4096;

/// Longest accepted single component, in bytes.
pub const MAX_COMPONENT_BYTES: usize = 255;

/// Validates paths and resolves them to absolute, lexically normal form.
#[derive(Debug, Clone, Default)]
pub struct PathValidator {
    base: Option<PathBuf>,
    cache: Option<Arc<PathCache>>,
}

impl PathValidator {
    /// Resolves relative paths against the process working directory.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolves relative paths against `base` instead of the working directory.
    #[must_use]
    pub fn with_base(mut self, base: impl Into<PathBuf>) -> Self {
        self.base = Some(base.into());
        self
    }

    /// Memoizes results in a shared cache.
    #[must_use]
    pub fn with_cache(mut self, cache: Arc<PathCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Validates `path` and returns its absolute normalized form.
    ///
    /// # Errors
    ///
    /// Returns a validation error for empty paths, NUL bytes, over-long
    /// components or paths, or when the working directory is unavailable.
    pub fn validate(&self, path: &Path) -> Result<PathBuf, FlowError> {
        if let Some(hit) = self.cache.as_ref().and_then(|c| c.get(path)) {
            return Ok(hit);
        }

        check_shape(path)?;
        let absolute = if path.is_absolute() {
            path.to_path_buf()
        } else {
            let base = match &self.base {
                Some(base) => base.clone(),
                None => std::env::current_dir().map_err(|err| {
                    FlowError::invalid_path(path, format!("cannot resolve working directory: {err}"))
                })?,
            };
            base.join(path)
        };
        let normalized = normalize(&absolute);
        if normalized.as_os_str().len() > MAX_PATH_BYTES {
            return Err(FlowError::invalid_path(path, "path exceeds maximum length"));
        }

        if let Some(cache) = &self.cache {
            cache.insert(path.to_path_buf(), normalized.clone());
        }
        Ok(normalized)
    }
}

fn check_shape(path: &Path) -> Result<(), FlowError> {
    let raw = path.as_os_str();
    if raw.is_empty() {
        return Err(FlowError::invalid_path(path, "path is empty"));
    }
    if raw.len() > MAX_PATH_BYTES {
        return Err(FlowError::invalid_path(path, "path exceeds maximum length"));
    }
    if raw.to_string_lossy().contains('\0') {
        return Err(FlowError::invalid_path(path, "path contains a NUL byte"));
    }
    if path
        .components()
        .any(|c| matches!(c, Component::Normal(name) if name.len() > MAX_COMPONENT_BYTES))
    {
        return Err(FlowError::invalid_path(path, "path component exceeds maximum length"));
    }
    Ok(())
}

/// Removes `.` components and resolves `..` lexically, without touching disk.
#[must_use]
pub fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() {
                    out.push(component);
                }
            }
            other => out.push(other),
        }
    }
    out
}
