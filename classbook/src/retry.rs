//! Retry policy for version conflicts.
//!
//! When a save loses a compare-and-swap race the engine re-runs the whole
//! read-inspect-save sequence. [`RetryPolicy`] bounds how often that happens
//! and how long to wait between attempts: exponential backoff from a base
//! delay, capped at a maximum, with ±20% jitter so contending writers spread
//! out instead of colliding again.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;

use crate::types::ClassId;

const DEFAULT_MAX_RETRIES: u32 = 3;
const DEFAULT_BASE_DELAY: Duration = Duration::from_millis(10);
const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(1);
const DEFAULT_JITTER: f64 = 0.2;

/// Information about one retry, passed to a [`MetricsHook`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryContext {
    /// 1-based retry number; the first retry is attempt 1.
    pub attempt: u32,
    /// Backoff applied before this retry, in milliseconds.
    pub delay_ms: u64,
    /// The contended class.
    pub class_id: ClassId,
}

/// Observer notified before every retry.
///
/// Implementations must be cheap and must not block; they run inside the
/// per-class critical section.
pub trait MetricsHook: Send + Sync {
    /// Called once per retry, before the backoff sleep.
    fn on_retry_attempt(&self, ctx: &RetryContext);
}

/// How many times, and how patiently, to retry after a version conflict.
#[derive(Clone)]
pub struct RetryPolicy {
    max_retries: u32,
    base_delay: Duration,
    max_delay: Duration,
    jitter: f64,
    metrics_hook: Option<Arc<dyn MetricsHook>>,
}

impl RetryPolicy {
    /// Three retries, 10ms base delay doubling up to 1s, ±20% jitter.
    pub fn new() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            base_delay: DEFAULT_BASE_DELAY,
            max_delay: DEFAULT_MAX_DELAY,
            jitter: DEFAULT_JITTER,
            metrics_hook: None,
        }
    }

    /// Sets the number of retries after the first attempt. Zero disables retrying.
    #[must_use]
    pub const fn max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Sets the delay before the first retry.
    #[must_use]
    pub const fn base_delay(mut self, base_delay: Duration) -> Self {
        self.base_delay = base_delay;
        self
    }

    /// Sets the upper bound on any single delay.
    #[must_use]
    pub const fn max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = max_delay;
        self
    }

    /// Disables jitter, making delays exactly `base * 2^(attempt-1)` (capped).
    #[must_use]
    pub const fn without_jitter(mut self) -> Self {
        self.jitter = 0.0;
        self
    }

    /// Registers an observer for retry attempts.
    #[must_use]
    pub fn with_metrics_hook<H>(mut self, hook: H) -> Self
    where
        H: MetricsHook + 'static,
    {
        self.metrics_hook = Some(Arc::new(hook));
        self
    }

    /// Configured retry budget.
    pub const fn retry_budget(&self) -> u32 {
        self.max_retries
    }

    /// Whether another retry is allowed after `retries_so_far` retries.
    pub const fn allows_retry(&self, retries_so_far: u32) -> bool {
        retries_so_far < self.max_retries
    }

    /// Backoff before retry number `attempt` (1-based).
    #[allow(
        clippy::cast_precision_loss,
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss
    )]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let base_ms = self.base_delay.as_millis() as f64;
        let max_ms = self.max_delay.as_millis() as f64;

        let exponent = attempt.saturating_sub(1).min(30);
        let delay = (base_ms * f64::from(1_u32 << exponent)).min(max_ms);

        let jitter = if self.jitter > 0.0 {
            let mut rng = rand::rng();
            delay * self.jitter * rng.random_range(-1.0..=1.0)
        } else {
            0.0
        };

        Duration::from_millis((delay + jitter).clamp(0.0, max_ms) as u64)
    }

    /// Reports a retry to the metrics hook, if one is registered.
    pub fn notify(&self, ctx: &RetryContext) {
        if let Some(hook) = &self.metrics_hook {
            hook.on_retry_attempt(ctx);
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for RetryPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("max_retries", &self.max_retries)
            .field("base_delay", &self.base_delay)
            .field("max_delay", &self.max_delay)
            .field("jitter", &self.jitter)
            .field("metrics_hook", &self.metrics_hook.is_some())
            .finish()
    }
}
