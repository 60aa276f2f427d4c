//! Logging setup.
//!
//! The library only emits `tracing` events. Binaries and tests that want to
//! see them call [`init_logging`] once at startup.

use crate::config::LogConfig;
use crate::errors::FlowError;
use tracing_subscriber::EnvFilter;

/// Installs a global `tracing` subscriber.
///
/// `RUST_LOG`, when set, overrides `config.filter`. Returns `Ok(false)` if a
/// subscriber was already installed, so repeated calls are harmless.
///
/// # Errors
///
/// Returns [`FlowError::Config`] when the filter directive does not parse.
pub fn init_logging(config: &LogConfig) -> Result<bool, FlowError> {
    let filter = match std::env::var(EnvFilter::DEFAULT_ENV) {
        Ok(from_env) if !from_env.trim().is_empty() => EnvFilter::try_new(from_env),
        _ => EnvFilter::try_new(&config.filter),
    }
    .map_err(|e| FlowError::Config(format!("invalid log filter: {e}")))?;

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true);
    let installed = if config.json {
        builder.json().with_current_span(false).try_init()
    } else {
        builder.try_init()
    };
    Ok(installed.is_ok())
}
