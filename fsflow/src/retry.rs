//! Retry with exponential backoff for fallible async operations.
//!
//! [`with_retry`] drives an operation until it succeeds, the error is judged
//! not worth retrying, or attempts run out. Errors are classified before the
//! retry decision so caller errors wrapping I/O failures get a recoverable
//! flag.

use crate::errors::FlowError;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Decides whether a classified error should be retried.
pub type ShouldRetryFn = Arc<dyn Fn(&FlowError) -> bool + Send + Sync>;

/// Observes a retry: `(attempt_that_failed, error)`.
pub type OnRetryFn = Arc<dyn Fn(u32, &FlowError) + Send + Sync>;

/// Jitter strategy to prevent thundering herd.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum JitterStrategy {
    /// Exact delays.
    #[default]
    None,
    /// Random from 0 to delay
    Full,
    /// Half fixed, half random
    Equal,
}

impl JitterStrategy {
    /// Applies jitter to a delay in milliseconds.
    #[must_use]
    pub fn apply(self, delay_ms: u64) -> u64 {
        match self {
            Self::None => delay_ms,
            Self::Full => {
                if delay_ms == 0 {
                    0
                } else {
                    rand::thread_rng().gen_range(0..=delay_ms)
                }
            }
            Self::Equal => {
                let half = delay_ms / 2;
                if half == 0 {
                    delay_ms
                } else {
                    half + rand::thread_rng().gen_range(0..=half)
                }
            }
        }
    }
}

/// Configuration for [`with_retry`].
#[derive(Clone)]
pub struct RetryOptions {
    /// Maximum attempts, including the first one. Zero behaves like one.
    pub attempts: u32,
    /// Delay before the first retry, in milliseconds.
    pub delay_ms: u64,
    /// Multiplier applied to the delay after every failed attempt.
    pub backoff_factor: f64,
    /// Optional cap on a single delay.
    pub max_delay_ms: Option<u64>,
    /// Jitter applied on top of the computed delay.
    pub jitter: JitterStrategy,
    /// Operation name used when classifying errors and in logs.
    pub label: String,
    should_retry: Option<ShouldRetryFn>,
    on_retry: Option<OnRetryFn>,
}

impl Default for RetryOptions {
    fn default() -> Self {
        Self {
            attempts: 3,
            delay_ms: 1000,
            backoff_factor: 2.0,
            max_delay_ms: None,
            jitter: JitterStrategy::None,
            label: "operation".to_string(),
            should_retry: None,
            on_retry: None,
        }
    }
}

impl fmt::Debug for RetryOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryOptions")
            .field("attempts", &self.attempts)
            .field("delay_ms", &self.delay_ms)
            .field("backoff_factor", &self.backoff_factor)
            .field("max_delay_ms", &self.max_delay_ms)
            .field("jitter", &self.jitter)
            .field("label", &self.label)
            .field("should_retry", &self.should_retry.is_some())
            .field("on_retry", &self.on_retry.is_some())
            .finish()
    }
}

impl RetryOptions {
    /// Creates options with the default policy (3 attempts, 1s, factor 2).
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the maximum attempts.
    #[must_use]
    pub fn with_attempts(mut self, attempts: u32) -> Self {
        self.attempts = attempts;
        self
    }

    /// Sets the base delay.
    #[must_use]
    pub fn with_delay_ms(mut self, delay_ms: u64) -> Self {
        self.delay_ms = delay_ms;
        self
    }

    /// Sets the backoff factor.
    #[must_use]
    pub fn with_backoff_factor(mut self, factor: f64) -> Self {
        self.backoff_factor = factor;
        self
    }

    /// Caps every delay.
    #[must_use]
    pub fn with_max_delay_ms(mut self, max_delay_ms: u64) -> Self {
        self.max_delay_ms = Some(max_delay_ms);
        self
    }

    /// Sets the jitter strategy.
    #[must_use]
    pub fn with_jitter(mut self, jitter: JitterStrategy) -> Self {
        self.jitter = jitter;
        self
    }

    /// Sets the label used for classification and logging.
    #[must_use]
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    /// Replaces the default "retry recoverable errors" policy.
    #[must_use]
    pub fn with_should_retry<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&FlowError) -> bool + Send + Sync + 'static,
    {
        self.should_retry = Some(Arc::new(predicate));
        self
    }

    /// Registers a hook invoked after each backoff, before the next attempt.
    ///
    /// A panicking hook is logged and ignored.
    #[must_use]
    pub fn with_on_retry<F>(mut self, hook: F) -> Self
    where
        F: Fn(u32, &FlowError) + Send + Sync + 'static,
    {
        self.on_retry = Some(Arc::new(hook));
        self
    }

    /// Attempts actually made: `attempts`, at least one.
    #[must_use]
    pub fn max_attempts(&self) -> u32 {
        self.attempts.max(1)
    }

    /// Delay after the `attempt`-th failure (1-based), before jitter.
    ///
    /// `delay_ms * backoff_factor^(attempt - 1)`, capped by `max_delay_ms`.
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt.saturating_sub(1)).unwrap_or(i32::MAX);
        let raw = self.delay_ms as f64 * self.backoff_factor.max(0.0).powi(exponent);
        let mut millis = if raw.is_finite() && raw < u64::MAX as f64 {
            raw.round() as u64
        } else {
            u64::MAX
        };
        if let Some(cap) = self.max_delay_ms {
            millis = millis.min(cap);
        }
        Duration::from_millis(self.jitter.apply(millis))
    }

    fn should_retry(&self, error: &FlowError) -> bool {
        self.should_retry
            .as_ref()
            .map_or_else(|| error.is_recoverable(), |predicate| predicate(error))
    }

    fn notify_retry(&self, attempt: u32, error: &FlowError) {
        let Some(hook) = self.on_retry.as_ref() else {
            return;
        };
        if let Err(panic) = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            hook(attempt, error);
        })) {
            warn!(label = %self.label, attempt, "on_retry hook panicked: {:?}", panic);
        }
    }
}

/// Executes an operation with retry logic.
///
/// The operation is invoked at most [`RetryOptions::max_attempts`] times. The
/// last classified error is returned as soon as attempts run out or
/// `should_retry` declines, without a further delay.
pub async fn with_retry<T, F, Fut>(options: &RetryOptions, mut operation: F) -> Result<T, FlowError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, FlowError>>,
{
    let max_attempts = options.max_attempts();
    let mut attempt = 1;

    loop {
        let error = match operation().await {
            Ok(value) => return Ok(value),
            Err(err) => err.classified(&options.label),
        };

        if attempt >= max_attempts || !options.should_retry(&error) {
            debug!(
                label = %options.label,
                attempt,
                code = error.code(),
                "Giving up"
            );
            return Err(error);
        }

        let delay = options.delay_for(attempt);
        debug!(
            label = %options.label,
            attempt,
            delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
            error = %error,
            "Retrying after error"
        );
        tokio::time::sleep(delay).await;
        options.notify_retry(attempt, &error);
        attempt += 1;
    }
}
