use super::*;
use crate::errors::{ErrorCode, OpError};
use crate::events::{CollectingEventSink, ProgressStep};
use crate::plugins::{PluginRegistry, TextPlugin};
use crate::retry::RetryOptions;
use crate::testing::ConcurrencyProbe;
use parking_lot::Mutex;
use pretty_assertions::assert_eq;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio_test::{assert_err, assert_ok};

fn busy(index: i32) -> FlowError {
    OpError::new(ErrorCode::Busy, "item", format!("item {index} is busy")).into()
}

#[tokio::test]
async fn test_bounded_and_ordered_under_reverse_completion() {
    let probe = ConcurrencyProbe::new();
    let pipeline = Pipeline::<u64>::new(PipelineConfig::new(3)).transform({
        let probe = probe.clone();
        move |x: u64| {
            let probe = probe.clone();
            async move {
                let _guard = probe.enter();
                tokio::time::sleep(Duration::from_millis((10 - x) * 10)).await;
                Ok(x * 2)
            }
        }
    });

    let values = pipeline.execute(1..=10).await.unwrap().into_values().unwrap();

    assert_eq!(values, (1..=10).map(|x| x * 2).collect::<Vec<_>>());
    assert!(probe.max() <= 3, "saw {} concurrent calls", probe.max());
    assert_eq!(probe.max(), 3);
    assert_eq!(probe.total(), 10);
    assert_eq!(probe.current(), 0);
}

#[tokio::test]
async fn test_item_results_carry_input_index() {
    let output = Pipeline::<usize>::new(PipelineConfig::new(4))
        .transform(|x: usize| async move {
            tokio::time::sleep(Duration::from_millis(((7 - x) * 3) as u64)).await;
            Ok(format!("#{x}"))
        })
        .execute(0..7)
        .await
        .unwrap();

    let indices: Vec<usize> = output.items().iter().map(|item| item.index).collect();
    assert_eq!(indices, (0..7).collect::<Vec<_>>());
    assert_eq!(output.successes().next().map(String::as_str), Some("#0"));
}

#[tokio::test]
async fn test_filter_drops_items_and_keeps_relative_order() {
    let values = Pipeline::<i32>::new(PipelineConfig::new(2))
        .filter(|x| x % 3 != 0)
        .map(|x| x * 10)
        .filter(|x| *x != 4)
        .execute(1..=9)
        .await
        .unwrap()
        .into_values()
        .unwrap();

    assert_eq!(values, vec![10, 20, 50, 70, 80]);
}

#[tokio::test]
async fn test_filters_see_input_items_before_any_transform() {
    let values = Pipeline::<i32>::new(PipelineConfig::new(2))
        .map(|x| x + 100)
        .filter(|x| *x < 5)
        .execute(vec![1, 2, 3])
        .await
        .unwrap()
        .into_values()
        .unwrap();

    assert_eq!(values, vec![101, 102, 103]);
}

#[tokio::test]
async fn test_late_filter_skips_every_transform() {
    let calls = Arc::new(AtomicUsize::new(0));
    let counted = calls.clone();
    let values = Pipeline::<i32>::new(PipelineConfig::new(3))
        .transform(move |x: i32| {
            counted.fetch_add(1, Ordering::SeqCst);
            async move { Ok(x.to_string()) }
        })
        .filter(|x| x % 2 == 0)
        .execute(1..=6)
        .await
        .unwrap()
        .into_values()
        .unwrap();

    assert_eq!(values, vec!["2", "4", "6"]);
    assert_eq!(calls.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_filter_short_circuits_later_stages() {
    let calls = Arc::new(AtomicUsize::new(0));
    let counted = calls.clone();
    Pipeline::<i32>::new(PipelineConfig::default())
        .filter(|x| *x > 2)
        .transform(move |x: i32| {
            counted.fetch_add(1, Ordering::SeqCst);
            async move { Ok(x) }
        })
        .execute(vec![1, 2, 3, 4])
        .await
        .unwrap();

    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_slow_item_does_not_hold_back_the_window() {
    let finished = Arc::new(Mutex::new(Vec::new()));
    let recorded = finished.clone();
    let values = Pipeline::<usize>::new(PipelineConfig::new(2))
        .transform(move |x: usize| {
            let recorded = recorded.clone();
            async move {
                let millis = if x == 0 { 200 } else { 5 };
                tokio::time::sleep(Duration::from_millis(millis)).await;
                recorded.lock().push(x);
                Ok(x)
            }
        })
        .execute(0..9)
        .await
        .unwrap()
        .into_values()
        .unwrap();

    assert_eq!(values, (0..9).collect::<Vec<_>>());
    let finished = finished.lock().clone();
    assert_eq!(finished.len(), 9);
    assert_eq!(finished.last(), Some(&0), "completion order {finished:?}");
    assert_eq!(finished[..8].iter().copied().collect::<Vec<_>>(), (1..9).collect::<Vec<_>>());
}

#[tokio::test]
async fn test_fail_fast_returns_error_and_stops_launching() {
    let parallel = 2;
    let failing_index = 1;
    let started = Arc::new(AtomicUsize::new(0));
    let finished = Arc::new(AtomicUsize::new(0));
    let counters = (started.clone(), finished.clone());
    let err = Pipeline::<usize>::new(PipelineConfig::new(parallel))
        .transform(move |x: usize| {
            let (started, finished) = counters.clone();
            async move {
                started.fetch_add(1, Ordering::SeqCst);
                let result = if x == failing_index {
                    Err(busy(1))
                } else {
                    tokio::time::sleep(Duration::from_millis(20)).await;
                    Ok(x)
                };
                finished.fetch_add(1, Ordering::SeqCst);
                result
            }
        })
        .execute(0..20)
        .await;

    let err = assert_err!(err);
    assert_eq!(err.code(), "BUSY");
    let started = started.load(Ordering::SeqCst);
    assert_eq!(started, finished.load(Ordering::SeqCst), "in-flight items were abandoned");
    assert!(started <= failing_index + parallel, "launched {started} items");
}

#[tokio::test]
async fn test_continue_on_error_keeps_every_outcome() {
    let output = Pipeline::<i32>::new(PipelineConfig::new(3).with_continue_on_error(true))
        .transform(|x: i32| async move {
            if x % 2 == 0 {
                Err(busy(x))
            } else {
                Ok(x)
            }
        })
        .execute(1..=5)
        .await
        .unwrap();

    assert_eq!(output.len(), 5);
    assert_eq!(output.successes().copied().collect::<Vec<_>>(), vec![1, 3, 5]);
    let failed: Vec<usize> = output.failures().map(|(index, _)| index).collect();
    assert_eq!(failed, vec![1, 3]);
    assert_eq!(output.into_values().unwrap_err().code(), "BUSY");
}

#[tokio::test]
async fn test_limit_keeps_first_survivors() {
    let pipeline = Pipeline::<i32>::new(PipelineConfig::new(3))
        .filter(|x| x % 2 == 0)
        .limit(5)
        .limit(3);

    let values = pipeline.execute(1..=20).await.unwrap().into_values().unwrap();

    assert_eq!(values, vec![2, 4, 6]);
}

#[tokio::test]
async fn test_transform_with_retry_retries_per_item() {
    let attempts = Arc::new(Mutex::new(std::collections::HashMap::<i32, usize>::new()));
    let seen = attempts.clone();
    let options = RetryOptions::new().with_attempts(3).with_delay_ms(1);

    let values = Pipeline::<i32>::new(PipelineConfig::new(2))
        .transform_with_retry(
            move |x: i32| {
                let count = {
                    let mut seen = seen.lock();
                    let count = seen.entry(x).or_insert(0);
                    *count += 1;
                    *count
                };
                async move {
                    if x == 2 && count < 3 {
                        Err(busy(x))
                    } else {
                        Ok(x + 100)
                    }
                }
            },
            options,
        )
        .execute(vec![1, 2, 3])
        .await
        .unwrap()
        .into_values()
        .unwrap();

    assert_eq!(values, vec![101, 102, 103]);
    let attempts = attempts.lock();
    assert_eq!(attempts[&1], 1);
    assert_eq!(attempts[&2], 3);
}

#[tokio::test]
async fn test_progress_after_every_item() {
    let events = Arc::new(Mutex::new(Vec::new()));
    let recorded = events.clone();
    Pipeline::<i32>::new(PipelineConfig::new(2))
        .filter(|x| *x != 2)
        .on_progress(move |event| {
            if let ProgressStep::Item { index, succeeded } = event.step {
                recorded.lock().push((index, succeeded, event.current, event.total));
            }
        })
        .execute(vec![1, 2, 3])
        .await
        .unwrap();

    let mut events = events.lock().clone();
    let currents: Vec<usize> = events.iter().map(|e| e.2).collect();
    assert_eq!(currents, vec![1, 2, 3]);
    events.sort_by_key(|e| e.0);
    assert_eq!(events.iter().map(|e| (e.0, e.1, e.3)).collect::<Vec<_>>(), vec![
        (0, true, 3),
        (1, true, 3),
        (2, true, 3),
    ]);
}

#[tokio::test]
async fn test_events_emitted() {
    let sink = Arc::new(CollectingEventSink::new());
    Pipeline::<i32>::new(PipelineConfig::new(1).with_continue_on_error(true))
        .with_event_sink(sink.clone())
        .transform(|x: i32| async move { if x == 1 { Err(busy(x)) } else { Ok(x) } })
        .execute(vec![0, 1])
        .await
        .unwrap();

    let types = sink.event_types();
    assert_eq!(types.first().map(String::as_str), Some("pipeline.started"));
    assert_eq!(types.last().map(String::as_str), Some("pipeline.completed"));
    assert_eq!(sink.events_of_type("pipeline.item_failed").len(), 1);
    assert_eq!(sink.events_of_type("progress").len(), 2);
}

#[tokio::test]
async fn test_pipeline_is_reusable_and_runs_source() {
    let pipeline = Pipeline::<i32>::new(PipelineConfig::new(2))
        .map(|x| x + 1)
        .source(vec![1, 2]);

    let first = assert_ok!(assert_ok!(pipeline.run().await).into_values());
    let second = assert_ok!(assert_ok!(pipeline.run().await).into_values());
    let other = pipeline.execute(vec![10]).await.unwrap().into_values().unwrap();

    assert_eq!(first, vec![2, 3]);
    assert_eq!(first, second);
    assert_eq!(other, vec![11]);
}

#[tokio::test]
async fn test_empty_input_and_zero_parallel() {
    let pipeline = Pipeline::<i32>::new(PipelineConfig::new(0)).map(|x| x * 2);
    assert!(pipeline.execute(Vec::new()).await.unwrap().is_empty());
    assert_eq!(pipeline.execute(vec![4]).await.unwrap().into_values().unwrap(), vec![8]);
}

#[tokio::test]
async fn test_panicking_stage_becomes_item_error() {
    let output = Pipeline::<i32>::new(PipelineConfig::new(2).with_continue_on_error(true))
        .map(|x| {
            assert!(x != 3, "bad item");
            x
        })
        .execute(vec![1, 3, 5])
        .await
        .unwrap();

    let failures: Vec<String> = output.failures().map(|(_, e)| e.to_string()).collect();
    assert_eq!(failures.len(), 1);
    assert!(failures[0].contains("panicked"));
    assert_eq!(output.successes().copied().collect::<Vec<_>>(), vec![1, 5]);
}

#[tokio::test]
async fn test_named_stages_from_registry() {
    let registry = PluginRegistry::new();
    registry.install(Arc::new(TextPlugin)).unwrap();

    let values = Pipeline::<String>::new(PipelineConfig::new(2))
        .filter_named(&registry, "non_empty")
        .unwrap()
        .transform_named(&registry, "upper")
        .unwrap()
        .execute(["ab", "", "cd"].map(String::from))
        .await
        .unwrap()
        .into_values()
        .unwrap();

    assert_eq!(values, vec!["AB".to_string(), "CD".to_string()]);

    let missing = Pipeline::<String>::new(PipelineConfig::default()).filter_named(&registry, "nope");
    assert_eq!(missing.unwrap_err().code(), "PLUGIN_ERROR");
}
