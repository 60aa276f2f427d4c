//! Bounded-concurrency, order-preserving item pipelines.
//!
//! A [`Pipeline`] is a chain of filter and transform stages applied to each
//! input item independently. At most [`PipelineConfig::parallel`] items are in
//! flight at once, and results come back in input order regardless of
//! completion order.

mod builder;
mod executor;
mod output;

#[cfg(test)]
mod pipeline_tests;

pub use builder::Pipeline;
pub use output::{ItemResult, PipelineOutput};

use crate::errors::FlowError;
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// The composed per-item chain. `Ok(None)` means a stage dropped the item.
pub(crate) type ItemFn<I, O> =
    Arc<dyn Fn(I) -> BoxFuture<'static, Result<Option<O>, FlowError>> + Send + Sync>;

/// Predicate over an input item.
pub(crate) type ItemFilter<I> = Arc<dyn Fn(&I) -> bool + Send + Sync>;

/// Execution settings for a [`Pipeline`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Maximum number of items in flight. Values below 1 behave as 1.
    #[serde(default = "default_parallel")]
    pub parallel: usize,
    /// Record per-item failures instead of stopping at the first one.
    #[serde(default)]
    pub continue_on_error: bool,
}

fn default_parallel() -> usize {
    1
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            parallel: default_parallel(),
            continue_on_error: false,
        }
    }
}

impl PipelineConfig {
    /// Creates a fail-fast configuration with the given concurrency bound.
    #[must_use]
    pub fn new(parallel: usize) -> Self {
        Self {
            parallel,
            ..Self::default()
        }
    }

    /// Sets whether failures are collected per item.
    #[must_use]
    pub const fn with_continue_on_error(mut self, continue_on_error: bool) -> Self {
        self.continue_on_error = continue_on_error;
        self
    }
}
