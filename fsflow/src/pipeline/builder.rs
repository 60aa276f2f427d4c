//! Chained stage builder.

use super::executor::run_items;
use super::output::PipelineOutput;
use super::{ItemFilter, ItemFn, PipelineConfig};
use crate::errors::{FlowError, PluginError};
use crate::events::{EventSink, NoOpEventSink, ProgressCallback, ProgressEvent, ProgressReporter};
use crate::plugins::PluginRegistry;
use crate::retry::{with_retry, RetryOptions};
use futures::FutureExt;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info};

/// A chain of filter and transform stages over items of type `I`, producing
/// values of type `O`.
///
/// Filters test the input item and all run before any transform; the first
/// one returning false drops the item. Transforms then apply in the order
/// they were declared. Dropped items are absent from the output. Execution
/// is bounded by [`PipelineConfig::parallel`] and preserves input order.
///
/// ```
/// use fsflow::pipeline::{Pipeline, PipelineConfig};
///
/// # tokio_test::block_on(async {
/// let doubled = Pipeline::<i32>::new(PipelineConfig::new(3))
///     .filter(|x| x % 2 == 1)
///     .map(|x| x * 2)
///     .execute(1..=5)
///     .await
///     .unwrap()
///     .into_values()
///     .unwrap();
/// assert_eq!(doubled, vec![2, 6, 10]);
/// # });
/// ```
pub struct Pipeline<I, O = I> {
    config: PipelineConfig,
    filters: Vec<ItemFilter<I>>,
    chain: ItemFn<I, O>,
    limit: Option<usize>,
    source: Option<Vec<I>>,
    sink: Arc<dyn EventSink>,
    on_progress: Option<ProgressCallback>,
}

impl<I: Clone, O> Clone for Pipeline<I, O> {
    fn clone(&self) -> Self {
        Self {
            config: self.config.clone(),
            filters: self.filters.clone(),
            chain: self.chain.clone(),
            limit: self.limit,
            source: self.source.clone(),
            sink: self.sink.clone(),
            on_progress: self.on_progress.clone(),
        }
    }
}

impl<I, O> fmt::Debug for Pipeline<I, O> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pipeline")
            .field("config", &self.config)
            .field("filters", &self.filters.len())
            .field("limit", &self.limit)
            .field("source_len", &self.source.as_ref().map(Vec::len))
            .finish_non_exhaustive()
    }
}

impl<I> Pipeline<I, I>
where
    I: Send + 'static,
{
    /// Creates an empty pipeline that passes items through unchanged.
    #[must_use]
    pub fn new(config: PipelineConfig) -> Self {
        Self {
            config,
            filters: Vec::new(),
            chain: Arc::new(|item| async move { Ok(Some(item)) }.boxed()),
            limit: None,
            source: None,
            sink: Arc::new(NoOpEventSink),
            on_progress: None,
        }
    }
}

impl<I, O> Pipeline<I, O>
where
    I: Send + 'static,
    O: Send + 'static,
{
    /// The execution settings.
    #[must_use]
    pub const fn config(&self) -> &PipelineConfig {
        &self.config
    }

    fn then<P, F>(self, stage: F) -> Pipeline<I, P>
    where
        F: Fn(ItemFn<I, O>, I) -> futures::future::BoxFuture<'static, Result<Option<P>, FlowError>>
            + Send
            + Sync
            + 'static,
    {
        let previous = self.chain;
        Pipeline {
            config: self.config,
            filters: self.filters,
            chain: Arc::new(move |item| stage(previous.clone(), item)),
            limit: self.limit,
            source: self.source,
            sink: self.sink,
            on_progress: self.on_progress,
        }
    }

    /// Keeps input items for which `predicate` returns true.
    ///
    /// Filters see the item as it entered the pipeline, wherever they are
    /// declared in the chain.
    #[must_use]
    pub fn filter<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&I) -> bool + Send + Sync + 'static,
    {
        self.filters.push(Arc::new(predicate));
        self
    }

    fn resolve(&self) -> ItemFn<I, O> {
        if self.filters.is_empty() {
            return self.chain.clone();
        }
        let filters: Arc<[ItemFilter<I>]> = self.filters.clone().into();
        let chain = self.chain.clone();
        Arc::new(move |item| {
            let (filters, chain) = (filters.clone(), chain.clone());
            async move {
                if filters.iter().all(|keep| keep(&item)) {
                    chain(item).await
                } else {
                    Ok(None)
                }
            }
            .boxed()
        })
    }

    /// Async transform that may also drop the item by returning `None`.
    #[must_use]
    pub fn filter_map<P, F, Fut>(self, f: F) -> Pipeline<I, P>
    where
        P: Send + 'static,
        F: Fn(O) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Option<P>, FlowError>> + Send + 'static,
    {
        let f = Arc::new(f);
        self.then(move |previous, item| {
            let f = f.clone();
            async move {
                match previous(item).await? {
                    Some(value) => f(value).await,
                    None => Ok(None),
                }
            }
            .boxed()
        })
    }

    /// Async transform.
    #[must_use]
    pub fn transform<P, F, Fut>(self, f: F) -> Pipeline<I, P>
    where
        P: Send + 'static,
        F: Fn(O) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<P, FlowError>> + Send + 'static,
    {
        let f = Arc::new(f);
        self.filter_map(move |value| {
            let f = f.clone();
            async move { f(value).await.map(Some) }
        })
    }

    /// Synchronous, infallible transform.
    #[must_use]
    pub fn map<P, F>(self, f: F) -> Pipeline<I, P>
    where
        P: Send + 'static,
        F: Fn(O) -> P + Send + Sync + 'static,
    {
        let f = Arc::new(f);
        self.then(move |previous, item| {
            let f = f.clone();
            async move { Ok(previous(item).await?.map(|value| f(value))) }.boxed()
        })
    }

    /// Async transform retried per item under `options`.
    ///
    /// Retries of one item occupy only that item's concurrency slot.
    #[must_use]
    pub fn transform_with_retry<P, F, Fut>(self, f: F, options: RetryOptions) -> Pipeline<I, P>
    where
        O: Clone + Sync,
        P: Send + 'static,
        F: Fn(O) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<P, FlowError>> + Send + 'static,
    {
        let f = Arc::new(f);
        let options = Arc::new(options);
        self.transform(move |value: O| {
            let (f, options) = (f.clone(), options.clone());
            async move { with_retry(&options, || f(value.clone())).await }
        })
    }

    /// Keeps only the first `n` surviving results, by input position.
    ///
    /// Applied to the final results; when called more than once the smallest
    /// limit wins.
    #[must_use]
    pub fn limit(mut self, n: usize) -> Self {
        self.limit = Some(self.limit.map_or(n, |current| current.min(n)));
        self
    }

    /// Sets the input used by [`run`](Self::run).
    #[must_use]
    pub fn source(mut self, items: impl IntoIterator<Item = I>) -> Self {
        self.source = Some(items.into_iter().collect());
        self
    }

    /// Sets the event sink.
    #[must_use]
    pub fn with_event_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sink = sink;
        self
    }

    /// Sets a callback invoked after every item completes.
    #[must_use]
    pub fn on_progress<F>(mut self, callback: F) -> Self
    where
        F: Fn(&ProgressEvent) + Send + Sync + 'static,
    {
        self.on_progress = Some(Arc::new(callback));
        self
    }

    /// Runs the chain over `input`.
    ///
    /// # Errors
    ///
    /// In fail-fast mode, the first observed item failure. With
    /// `continue_on_error` failures are reported per item and this never
    /// fails.
    pub async fn execute(&self, input: impl IntoIterator<Item = I>) -> Result<PipelineOutput<O>, FlowError> {
        let items: Vec<I> = input.into_iter().collect();
        let total = items.len();
        let started = Instant::now();
        debug!(items = total, parallel = self.config.parallel, "Pipeline started");
        self.sink
            .emit(
                "pipeline.started",
                Some(serde_json::json!({
                    "items": total,
                    "parallel": self.config.parallel,
                    "continue_on_error": self.config.continue_on_error,
                })),
            )
            .await;

        let progress = ProgressReporter::new(self.on_progress.clone(), self.sink.clone());
        let chain = self.resolve();
        let mut results = match run_items(items, &chain, &self.config, &progress, &*self.sink).await {
            Ok(results) => results,
            Err(err) => {
                self.sink
                    .emit(
                        "pipeline.completed",
                        Some(serde_json::json!({ "items": total, "error": err.to_string() })),
                    )
                    .await;
                return Err(err);
            }
        };

        if let Some(limit) = self.limit {
            results.truncate(limit);
        }
        let output = PipelineOutput::new(results);
        let failed = output.failures().count();
        info!(
            items = total,
            survivors = output.len(),
            failed,
            elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
            "Pipeline completed"
        );
        self.sink
            .emit(
                "pipeline.completed",
                Some(serde_json::json!({
                    "items": total,
                    "survivors": output.len(),
                    "failed": failed,
                })),
            )
            .await;
        Ok(output)
    }

    /// Runs the chain over the configured [`source`](Self::source).
    ///
    /// # Errors
    ///
    /// As [`execute`](Self::execute); a pipeline without a source yields an
    /// empty output.
    pub async fn run(&self) -> Result<PipelineOutput<O>, FlowError>
    where
        I: Clone,
    {
        let items = self.source.clone().unwrap_or_default();
        self.execute(items).await
    }
}

impl<I, O> Pipeline<I, O>
where
    I: AsRef<str> + Send + 'static,
    O: Send + 'static,
{
    /// Adds a filter registered in `registry` under `name`.
    ///
    /// # Errors
    ///
    /// [`PluginError::NotRegistered`] if no such filter exists.
    pub fn filter_named(self, registry: &PluginRegistry, name: &str) -> Result<Self, FlowError> {
        let filter = registry
            .filter(name)
            .ok_or_else(|| PluginError::not_registered("filter", name))?;
        Ok(self.filter(move |line: &I| filter(line.as_ref())))
    }
}

impl<I> Pipeline<I, String>
where
    I: Send + 'static,
{

    /// Adds a transformer registered in `registry` under `name`.
    ///
    /// # Errors
    ///
    /// [`PluginError::NotRegistered`] if no such transformer exists.
    pub fn transform_named(self, registry: &PluginRegistry, name: &str) -> Result<Self, FlowError> {
        let transformer = registry
            .transformer(name)
            .ok_or_else(|| PluginError::not_registered("transformer", name))?;
        Ok(self.transform(move |text: String| {
            let result = transformer(text).map_err(FlowError::Other);
            async move { result }
        }))
    }
}
