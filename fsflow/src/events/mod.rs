//! Event sinks and progress reporting.
//!
//! Transactions and pipelines publish lifecycle events (`transaction.started`,
//! `pipeline.item_failed`, ...) to an [`EventSink`], and per-step progress to a
//! caller callback through a [`ProgressReporter`].

mod progress;
mod sink;

pub use progress::{ProgressCallback, ProgressEvent, ProgressReporter, ProgressStep};
pub use sink::{CollectingEventSink, EventSink, LoggingEventSink, NoOpEventSink};

use std::sync::Arc;

/// Returns the sink used when none is configured.
#[must_use]
pub fn default_event_sink() -> Arc<dyn EventSink> {
    Arc::new(NoOpEventSink)
}
