//! Library configuration.
//!
//! [`FlowConfig`] collects the knobs shared by transactions, pipelines,
//! retries, the path cache, and logging. Every field has a serde default, so
//! partial JSON documents load, and [`FlowConfig::from_env`] layers
//! `FSFLOW_*` environment variables over the defaults.

use crate::errors::FlowError;
use crate::paths::CacheConfig;
use crate::pipeline::PipelineConfig;
use crate::retry::{JitterStrategy, RetryOptions};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Top-level configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlowConfig {
    /// Parent directory for per-transaction backup directories.
    #[serde(default = "default_backup_root")]
    pub backup_root: PathBuf,
    /// Timeout applied to transactions that do not set their own.
    #[serde(default)]
    pub default_timeout_ms: Option<u64>,
    /// Default pipeline settings.
    #[serde(default)]
    pub pipeline: PipelineConfig,
    /// Default retry policy.
    #[serde(default)]
    pub retry: RetrySettings,
    /// Path cache sizing.
    #[serde(default)]
    pub path_cache: CacheConfig,
    /// Logging setup.
    #[serde(default)]
    pub log: LogConfig,
}

fn default_backup_root() -> PathBuf {
    std::env::temp_dir().join("fsflow-backups")
}

impl Default for FlowConfig {
    fn default() -> Self {
        Self {
            backup_root: default_backup_root(),
            default_timeout_ms: None,
            pipeline: PipelineConfig::default(),
            retry: RetrySettings::default(),
            path_cache: CacheConfig::default(),
            log: LogConfig::default(),
        }
    }
}

/// Serializable subset of [`RetryOptions`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrySettings {
    /// Maximum attempts.
    #[serde(default = "default_attempts")]
    pub attempts: u32,
    /// Base delay in milliseconds.
    #[serde(default = "default_delay_ms")]
    pub delay_ms: u64,
    /// Delay multiplier.
    #[serde(default = "default_backoff_factor")]
    pub backoff_factor: f64,
    /// Cap on a single delay.
    #[serde(default)]
    pub max_delay_ms: Option<u64>,
    /// Jitter strategy.
    #[serde(default)]
    pub jitter: JitterStrategy,
}

fn default_attempts() -> u32 {
    3
}

fn default_delay_ms() -> u64 {
    1000
}

fn default_backoff_factor() -> f64 {
    2.0
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            attempts: default_attempts(),
            delay_ms: default_delay_ms(),
            backoff_factor: default_backoff_factor(),
            max_delay_ms: None,
            jitter: JitterStrategy::default(),
        }
    }
}

impl RetrySettings {
    /// Builds retry options from these settings.
    #[must_use]
    pub fn to_options(&self) -> RetryOptions {
        let options = RetryOptions::new()
            .with_attempts(self.attempts)
            .with_delay_ms(self.delay_ms)
            .with_backoff_factor(self.backoff_factor)
            .with_jitter(self.jitter);
        match self.max_delay_ms {
            Some(cap) => options.with_max_delay_ms(cap),
            None => options,
        }
    }
}

/// Logging setup consumed by [`init_logging`](crate::observability::init_logging).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogConfig {
    /// `EnvFilter` directive, e.g. `fsflow=debug`.
    #[serde(default = "default_filter")]
    pub filter: String,
    /// Emit JSON lines instead of human readable output.
    #[serde(default)]
    pub json: bool,
}

fn default_filter() -> String {
    "info".to_string()
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            filter: default_filter(),
            json: false,
        }
    }
}

impl FlowConfig {
    /// Creates the default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the backup root.
    #[must_use]
    pub fn with_backup_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.backup_root = root.into();
        self
    }

    /// Sets the default transaction timeout.
    #[must_use]
    pub fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout_ms = Some(u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX));
        self
    }

    /// Sets the pipeline defaults.
    #[must_use]
    pub fn with_pipeline(mut self, pipeline: PipelineConfig) -> Self {
        self.pipeline = pipeline;
        self
    }

    /// Default transaction timeout, if any.
    #[must_use]
    pub fn default_timeout(&self) -> Option<Duration> {
        self.default_timeout_ms.map(Duration::from_millis)
    }

    /// Parses a JSON document; missing fields take their defaults.
    ///
    /// # Errors
    ///
    /// Returns [`FlowError::Config`] for malformed JSON or invalid values.
    pub fn from_json_str(json: &str) -> Result<Self, FlowError> {
        let config: Self =
            serde_json::from_str(json).map_err(|e| FlowError::Config(format!("invalid JSON: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Defaults overridden by `FSFLOW_*` environment variables.
    ///
    /// # Errors
    ///
    /// Returns [`FlowError::Config`] when a variable cannot be parsed.
    pub fn from_env() -> Result<Self, FlowError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Like [`from_env`](Self::from_env) with a custom variable source.
    ///
    /// # Errors
    ///
    /// Returns [`FlowError::Config`] when a variable cannot be parsed.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, FlowError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        if let Some(root) = lookup("FSFLOW_BACKUP_ROOT") {
            config.backup_root = PathBuf::from(root);
        }
        if let Some(ms) = parse_var(&lookup, "FSFLOW_TIMEOUT_MS")? {
            config.default_timeout_ms = Some(ms);
        }
        if let Some(parallel) = parse_var(&lookup, "FSFLOW_PARALLEL")? {
            config.pipeline.parallel = parallel;
        }
        if let Some(attempts) = parse_var(&lookup, "FSFLOW_RETRY_ATTEMPTS")? {
            config.retry.attempts = attempts;
        }
        if let Some(delay) = parse_var(&lookup, "FSFLOW_RETRY_DELAY_MS")? {
            config.retry.delay_ms = delay;
        }
        if let Some(filter) = lookup("FSFLOW_LOG") {
            config.log.filter = filter;
        }
        if let Some(json) = parse_var(&lookup, "FSFLOW_LOG_JSON")? {
            config.log.json = json;
        }
        config.validate()?;
        Ok(config)
    }

    /// Checks cross-field constraints.
    ///
    /// # Errors
    ///
    /// Returns [`FlowError::Config`] describing the first violation.
    pub fn validate(&self) -> Result<(), FlowError> {
        if self.pipeline.parallel == 0 {
            return Err(FlowError::Config("pipeline.parallel must be at least 1".into()));
        }
        if !(self.retry.backoff_factor.is_finite() && self.retry.backoff_factor >= 0.0) {
            return Err(FlowError::Config("retry.backoff_factor must be a non-negative number".into()));
        }
        if self.backup_root.as_os_str().is_empty() {
            return Err(FlowError::Config("backup_root must not be empty".into()));
        }
        Ok(())
    }
}

fn parse_var<T, F>(lookup: &F, key: &str) -> Result<Option<T>, FlowError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    lookup(key)
        .map(|raw| {
            raw.trim()
                .parse::<T>()
                .map_err(|e| FlowError::Config(format!("{key}={raw:?}: {e}")))
        })
        .transpose()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::collections::HashMap;

    #[test]
    fn test_defaults() {
        let config = FlowConfig::default();
        assert_eq!(config.pipeline.parallel, 1);
        assert!(!config.pipeline.continue_on_error);
        assert_eq!(config.retry.attempts, 3);
        assert_eq!(config.retry.delay_ms, 1000);
        assert_eq!(config.default_timeout(), None);
        assert_eq!(config.log.filter, "info");
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config = FlowConfig::from_json_str(
            r#"{"default_timeout_ms": 250, "pipeline": {"parallel": 4}, "log": {"json": true}}"#,
        )
        .unwrap();
        assert_eq!(config.default_timeout(), Some(Duration::from_millis(250)));
        assert_eq!(config.pipeline.parallel, 4);
        assert!(config.log.json);
        assert_eq!(config.retry, RetrySettings::default());
    }

    #[test]
    fn test_invalid_json_and_values() {
        assert!(matches!(FlowConfig::from_json_str("{"), Err(FlowError::Config(_))));
        let err = FlowConfig::from_json_str(r#"{"pipeline": {"parallel": 0}}"#).unwrap_err();
        assert_eq!(err.code(), "CONFIG_ERROR");
    }

    #[test]
    fn test_env_overrides() {
        let vars: HashMap<&str, &str> = [
            ("FSFLOW_BACKUP_ROOT", "/var/tmp/fsflow"),
            ("FSFLOW_TIMEOUT_MS", "500"),
            ("FSFLOW_PARALLEL", "8"),
            ("FSFLOW_RETRY_ATTEMPTS", "5"),
            ("FSFLOW_LOG_JSON", "true"),
        ]
        .into_iter()
        .collect();
        let config = FlowConfig::from_lookup(|k| vars.get(k).map(ToString::to_string)).unwrap();

        assert_eq!(config.backup_root, PathBuf::from("/var/tmp/fsflow"));
        assert_eq!(config.default_timeout_ms, Some(500));
        assert_eq!(config.pipeline.parallel, 8);
        assert_eq!(config.retry.attempts, 5);
        assert!(config.log.json);
    }

    #[test]
    fn test_env_bad_value() {
        let err = FlowConfig::from_lookup(|k| (k == "FSFLOW_PARALLEL").then(|| "many".to_string()))
            .unwrap_err();
        assert!(err.to_string().contains("FSFLOW_PARALLEL"));
    }

    #[test]
    fn test_retry_settings_to_options() {
        let settings = RetrySettings {
            max_delay_ms: Some(50),
            ..RetrySettings::default()
        };
        let options = settings.to_options();
        assert_eq!(options.attempts, 3);
        assert_eq!(options.delay_for(5), Duration::from_millis(50));
    }
}
