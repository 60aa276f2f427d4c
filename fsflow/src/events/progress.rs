//! Step/total/current progress notifications.

use super::{EventSink, NoOpEventSink};
use crate::transaction::OperationRecord;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use tracing::warn;

/// Caller hook receiving progress notifications.
pub type ProgressCallback = Arc<dyn Fn(&ProgressEvent) + Send + Sync>;

/// What just happened.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProgressStep {
    /// A transaction logged a mutating operation.
    Operation(OperationRecord),
    /// A pipeline item finished.
    Item {
        /// Input position of the item.
        index: usize,
        /// Whether the item succeeded (dropped items count as success).
        succeeded: bool,
    },
}

/// One progress notification.
#[derive(Debug, Clone, Serialize)]
pub struct ProgressEvent {
    /// The step that completed.
    pub step: ProgressStep,
    /// Steps known so far (log length) or total items.
    pub total: usize,
    /// Index of this step, or number of completed items.
    pub current: usize,
}

/// Delivers progress to an optional callback and mirrors it into a sink.
#[derive(Clone)]
pub struct ProgressReporter {
    callback: Option<ProgressCallback>,
    sink: Arc<dyn EventSink>,
}

impl Default for ProgressReporter {
    fn default() -> Self {
        Self {
            callback: None,
            sink: Arc::new(NoOpEventSink),
        }
    }
}

impl fmt::Debug for ProgressReporter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProgressReporter")
            .field("has_callback", &self.callback.is_some())
            .finish_non_exhaustive()
    }
}

impl ProgressReporter {
    /// Creates a reporter.
    #[must_use]
    pub fn new(callback: Option<ProgressCallback>, sink: Arc<dyn EventSink>) -> Self {
        Self { callback, sink }
    }

    /// Reports one event. A panicking callback is logged and ignored.
    pub fn report(&self, event: &ProgressEvent) {
        if let Some(callback) = self.callback.as_ref() {
            if let Err(panic) = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                callback(event);
            })) {
                warn!(current = event.current, "Progress callback panicked: {:?}", panic);
            }
        }
        self.sink.try_emit(
            "progress",
            Some(serde_json::json!({
                "total": event.total,
                "current": event.current,
                "step": step_summary(&event.step),
            })),
        );
    }
}

fn step_summary(step: &ProgressStep) -> serde_json::Value {
    match step {
        ProgressStep::Operation(record) => serde_json::json!({
            "operation": record.kind.as_str(),
            "sequence": record.sequence,
            "executed": record.executed,
        }),
        ProgressStep::Item { index, succeeded } => serde_json::json!({
            "item": index,
            "succeeded": succeeded,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::CollectingEventSink;
    use parking_lot::Mutex;

    fn item(index: usize) -> ProgressEvent {
        ProgressEvent {
            step: ProgressStep::Item {
                index,
                succeeded: true,
            },
            total: 3,
            current: index + 1,
        }
    }

    #[test]
    fn test_reporter_invokes_callback_and_sink() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let captured = seen.clone();
        let sink = Arc::new(CollectingEventSink::new());
        let reporter = ProgressReporter::new(
            Some(Arc::new(move |event: &ProgressEvent| {
                captured.lock().push(event.current);
            })),
            sink.clone(),
        );

        reporter.report(&item(0));
        reporter.report(&item(1));

        assert_eq!(*seen.lock(), vec![1, 2]);
        assert_eq!(sink.events_of_type("progress").len(), 2);
        let (_, data) = &sink.events()[1];
        assert_eq!(data.as_ref().unwrap()["step"]["item"], 1);
    }

    #[test]
    fn test_panicking_callback_is_contained() {
        let reporter = ProgressReporter::new(
            Some(Arc::new(|_: &ProgressEvent| panic!("bad observer"))),
            Arc::new(NoOpEventSink),
        );
        reporter.report(&item(0));
    }
}
