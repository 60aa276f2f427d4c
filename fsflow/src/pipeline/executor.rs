//! Bounded, order-preserving scheduling of per-item chains.

use super::output::ItemResult;
use super::{ItemFn, PipelineConfig};
use crate::errors::FlowError;
use crate::events::{EventSink, ProgressEvent, ProgressReporter, ProgressStep};
use futures::stream::{FuturesUnordered, StreamExt};
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use tracing::debug;

/// What happened to one item.
type Slot<O> = Option<Result<Option<O>, FlowError>>;

/// Runs `chain` over `items` with at most `config.parallel` in flight.
///
/// A sliding window: as soon as one item finishes the next one starts. Item
/// futures are polled inside this future; nothing is spawned. In fail-fast
/// mode the first observed failure stops new launches, in-flight items drain,
/// and that failure is returned.
pub(super) async fn run_items<I, O>(
    items: Vec<I>,
    chain: &ItemFn<I, O>,
    config: &PipelineConfig,
    progress: &ProgressReporter,
    sink: &dyn EventSink,
) -> Result<Vec<ItemResult<O>>, FlowError>
where
    I: Send + 'static,
    O: Send + 'static,
{
    let total = items.len();
    let parallel = config.parallel.max(1);
    let mut slots: Vec<Slot<O>> = std::iter::repeat_with(|| None).take(total).collect();
    let mut pending = items.into_iter().enumerate();
    let mut in_flight = FuturesUnordered::new();
    let mut first_error: Option<(usize, FlowError)> = None;
    let mut completed = 0;

    loop {
        while first_error.is_none() && in_flight.len() < parallel {
            let Some((index, item)) = pending.next() else {
                break;
            };
            let item_future = AssertUnwindSafe(chain(item))
                .catch_unwind()
                .map(move |caught| (index, caught.unwrap_or_else(|panic| Err(panicked(&*panic)))));
            in_flight.push(item_future);
        }

        let Some((index, outcome)) = in_flight.next().await else {
            break;
        };
        completed += 1;
        progress.report(&ProgressEvent {
            step: ProgressStep::Item {
                index,
                succeeded: outcome.is_ok(),
            },
            total,
            current: completed,
        });

        if let Err(err) = &outcome {
            debug!(index, error = %err, "Pipeline item failed");
            sink.try_emit(
                "pipeline.item_failed",
                Some(serde_json::json!({ "index": index, "code": err.code(), "error": err.to_string() })),
            );
        }

        match outcome {
            Err(err) if !config.continue_on_error => {
                if first_error.is_none() {
                    first_error = Some((index, err));
                }
            }
            other => slots[index] = Some(other),
        }
    }

    if let Some((index, err)) = first_error {
        debug!(index, drained = completed, "Pipeline stopped on first failure");
        return Err(err);
    }

    Ok(slots
        .into_iter()
        .enumerate()
        .filter_map(|(index, slot)| match slot {
            Some(Ok(Some(value))) => Some(ItemResult {
                index,
                outcome: Ok(value),
            }),
            Some(Err(err)) => Some(ItemResult {
                index,
                outcome: Err(err),
            }),
            Some(Ok(None)) | None => None,
        })
        .collect())
}

fn panicked(payload: &(dyn std::any::Any + Send)) -> FlowError {
    let message = payload
        .downcast_ref::<&str>()
        .map(|s| (*s).to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string());
    FlowError::Other(anyhow::anyhow!("pipeline stage panicked: {message}"))
}
