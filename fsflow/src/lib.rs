//! # fsflow
//!
//! Transactional filesystem scripting and bounded-concurrency pipelines.
//!
//! fsflow provides:
//!
//! - **Transactions**: run a callback against a journaling proxy; every
//!   mutation captures a backup first, and any failure or timeout rolls the
//!   filesystem back in reverse order
//! - **Pipelines**: filter/transform chains over items with at most N in
//!   flight and results kept in input order
//! - **Retries**: exponential backoff with jitter, driven by a classified
//!   error taxonomy
//! - **Plugins**: named commands, filters, and transformers, with built-in
//!   text primitives
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use fsflow::prelude::*;
//! use std::path::Path;
//!
//! # async fn demo() -> Result<(), FlowError> {
//! transaction(TransactionOptions::default(), |tx| async move {
//!     tx.mkdir(Path::new("out/logs"), MkdirOptions::default()).await?;
//!     tx.copy(Path::new("app.conf"), Path::new("out/app.conf"), CopyOptions::default())
//!         .await?;
//!     Ok(())
//! })
//! .await?;
//!
//! let sizes = Pipeline::<String>::new(PipelineConfig::new(4))
//!     .filter(|line| !line.is_empty())
//!     .map(|line| line.len())
//!     .execute(vec!["a".to_string(), String::new(), "abc".to_string()])
//!     .await?
//!     .into_values()?;
//! assert_eq!(sizes, vec![1, 3]);
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(
    clippy::all,
    clippy::pedantic,
    missing_docs,
    rust_2018_idioms
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc
)]

pub mod backup;
pub mod cancellation;
pub mod config;
pub mod errors;
pub mod events;
pub mod fs;
pub mod observability;
pub mod paths;
pub mod pipeline;
pub mod plugins;
pub mod retry;
pub mod testing;
pub mod text;
pub mod transaction;
pub mod utils;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::config::FlowConfig;
    pub use crate::errors::{ErrorCode, FlowError, OpError, RollbackError};
    pub use crate::events::{EventSink, LoggingEventSink, NoOpEventSink, ProgressEvent, ProgressStep};
    pub use crate::fs::{
        CommandOutput, CopyOptions, DirectOps, ExecOptions, MkdirOptions, MutatingOps,
        RemoveOptions,
    };
    pub use crate::pipeline::{Pipeline, PipelineConfig, PipelineOutput};
    pub use crate::plugins::{Plugin, PluginRegistry, TextPlugin};
    pub use crate::retry::{with_retry, JitterStrategy, RetryOptions};
    pub use crate::transaction::{
        transaction, TransactionHandle, TransactionManager, TransactionOptions,
    };
    pub use crate::utils::{generate_uuid, Timestamp};
}
