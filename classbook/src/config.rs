//! Engine configuration with validated parameters.
//!
//! Every tunable is a `nutype` so that an `EngineConfig` which exists is one
//! the engine can run with. Configurations deserialize from any serde format;
//! missing fields take their defaults.

use std::time::Duration;

use nutype::nutype;
use serde::{Deserialize, Serialize};

use crate::retry::RetryPolicy;

/// How close to its start a class stops accepting cancellations, in minutes.
///
/// Cancelling is refused when the class starts within this many minutes
/// (inclusive). Between 0 and 1440 (one day); defaults to 30.
#[nutype(
    validate(less_or_equal = 1440),
    default = 30,
    derive(
        Debug,
        Clone,
        Copy,
        PartialEq,
        Eq,
        PartialOrd,
        Ord,
        Display,
        Into,
        Default,
        Serialize,
        Deserialize
    )
)]
pub struct CancellationWindowMinutes(u32);

impl CancellationWindowMinutes {
    /// The window as a signed duration for comparison against time-to-start.
    pub fn as_duration(self) -> chrono::Duration {
        chrono::Duration::minutes(i64::from(self.into_inner()))
    }
}

/// Retries after a version conflict before giving up. Between 0 and 10; defaults to 3.
#[nutype(
    validate(less_or_equal = 10),
    default = 3,
    derive(
        Debug,
        Clone,
        Copy,
        PartialEq,
        Eq,
        PartialOrd,
        Ord,
        Display,
        Into,
        Default,
        Serialize,
        Deserialize
    )
)]
pub struct MaxRetries(u32);

/// Delay before the first retry in milliseconds. Between 1ms and 10s; defaults to 10ms.
#[nutype(
    validate(greater_or_equal = 1, less_or_equal = 10_000),
    default = 10,
    derive(
        Debug,
        Clone,
        Copy,
        PartialEq,
        Eq,
        PartialOrd,
        Ord,
        Into,
        Default,
        Serialize,
        Deserialize
    )
)]
pub struct RetryBaseDelayMs(u64);

impl RetryBaseDelayMs {
    /// Convert to Duration for use with tokio::time::sleep.
    pub fn as_duration(self) -> Duration {
        Duration::from_millis(self.into_inner())
    }
}

/// Upper bound on a single retry delay in milliseconds. Between 1ms and 5 minutes; defaults to 1s.
#[nutype(
    validate(greater_or_equal = 1, less_or_equal = 300_000),
    default = 1_000,
    derive(
        Debug,
        Clone,
        Copy,
        PartialEq,
        Eq,
        PartialOrd,
        Ord,
        Into,
        Default,
        Serialize,
        Deserialize
    )
)]
pub struct RetryMaxDelayMs(u64);

impl RetryMaxDelayMs {
    /// Convert to Duration for use with tokio::time::sleep.
    pub fn as_duration(self) -> Duration {
        Duration::from_millis(self.into_inner())
    }
}

/// Tunables of the booking engine.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Cancellation cut-off before class start.
    pub cancellation_window: CancellationWindowMinutes,
    /// Retry budget for version conflicts.
    pub max_retries: MaxRetries,
    /// First backoff delay.
    pub retry_base_delay: RetryBaseDelayMs,
    /// Backoff cap.
    pub retry_max_delay: RetryMaxDelayMs,
}

impl EngineConfig {
    /// Production defaults: 30-minute window, 3 retries, 10ms to 1s backoff.
    pub fn new() -> Self {
        Self::default()
    }

    /// Short backoff for test suites that provoke conflicts on purpose.
    pub fn testing() -> Self {
        Self {
            retry_base_delay: RetryBaseDelayMs::try_new(1).unwrap_or_default(),
            retry_max_delay: RetryMaxDelayMs::try_new(5).unwrap_or_default(),
            ..Self::default()
        }
    }

    /// Sets the cancellation window.
    #[must_use]
    pub const fn with_cancellation_window(mut self, window: CancellationWindowMinutes) -> Self {
        self.cancellation_window = window;
        self
    }

    /// Sets the retry budget.
    #[must_use]
    pub const fn with_max_retries(mut self, max_retries: MaxRetries) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Builds the retry policy these settings describe, without a metrics hook.
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new()
            .max_retries(self.max_retries.into_inner())
            .base_delay(self.retry_base_delay.as_duration())
            .max_delay(self.retry_max_delay.as_duration())
    }
}
