//! The booking engine: Book and Cancel over a versioned class store.
//!
//! Each request runs one critical section per class:
//!
//! 1. take the in-process lock for the class ([`ClassLocks`]),
//! 2. load the record and its version,
//! 3. resolve the user,
//! 4. apply the transition to the loaded copy,
//! 5. save it with the loaded version as the expected version.
//!
//! If step 5 loses a compare-and-swap race against another process the
//! sequence restarts from step 2 under the [`RetryPolicy`]. Rejections and
//! not-found results never reach step 5.

use tracing::{debug, info, instrument, warn};

use crate::class::ClassRecord;
use crate::clock::{Clock, SystemClock};
use crate::config::EngineConfig;
use crate::errors::{BookingError, BookingResult, StoreError, StoreResult};
use crate::locks::ClassLocks;
use crate::outcome::{BookingOutcome, CancelOutcome};
use crate::retry::{RetryContext, RetryPolicy};
use crate::store::{ClassStore, UserDirectory, VersionedClass};
use crate::types::{ClassId, RecordVersion, UserId};

/// Serializes Book and Cancel requests per class and persists their effects.
///
/// # Example
///
/// ```rust,ignore
/// let engine = BookingEngine::new(store, users);
/// match engine.book(&class_id, &user_id).await? {
///     BookingOutcome::Booked => notify_booked(&user_id),
///     BookingOutcome::Waitlisted => notify_waitlisted(&user_id),
///     other => reject(other.message()),
/// }
/// ```
#[derive(Debug)]
pub struct BookingEngine<S, U, C = SystemClock> {
    store: S,
    users: U,
    clock: C,
    config: EngineConfig,
    retry: RetryPolicy,
    locks: ClassLocks,
}

impl<S, U> BookingEngine<S, U, SystemClock>
where
    S: ClassStore + Sync,
    U: UserDirectory,
{
    /// Creates an engine with the default configuration and the system clock.
    pub fn new(store: S, users: U) -> Self {
        let config = EngineConfig::default();
        Self {
            store,
            users,
            clock: SystemClock,
            retry: config.retry_policy(),
            config,
            locks: ClassLocks::new(),
        }
    }
}

impl<S, U, C> BookingEngine<S, U, C>
where
    S: ClassStore + Sync,
    U: UserDirectory,
    C: Clock,
{
    /// Replaces the configuration and the retry policy derived from it.
    #[must_use]
    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.retry = config.retry_policy();
        self.config = config;
        self
    }

    /// Replaces the retry policy, for example to attach a metrics hook.
    #[must_use]
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Replaces the clock used for cancellation-window checks.
    pub fn with_clock<C2: Clock>(self, clock: C2) -> BookingEngine<S, U, C2> {
        BookingEngine {
            store: self.store,
            users: self.users,
            clock,
            config: self.config,
            retry: self.retry,
            locks: self.locks,
        }
    }

    /// The underlying store.
    pub const fn store(&self) -> &S {
        &self.store
    }

    /// The active configuration.
    pub const fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Books `user_id` into `class_id`, or puts them on the waiting list.
    ///
    /// # Errors
    ///
    /// - [`BookingError::ConcurrencyConflict`] when every attempt lost a
    ///   version race. Nothing was written.
    /// - [`BookingError::Store`] when the store failed or returned a corrupt
    ///   record. Nothing was written.
    #[instrument(name = "engine.book", skip_all, fields(class_id = %class_id, user_id = %user_id))]
    pub async fn book(&self, class_id: &ClassId, user_id: &UserId) -> BookingResult<BookingOutcome> {
        let _guard = self.locks.acquire(class_id).await;

        let mut retries = 0;
        loop {
            match self.try_book(class_id, user_id).await {
                Ok(outcome) => {
                    info!(outcome = ?outcome, "[engine.book] request completed");
                    return Ok(outcome);
                }
                Err(error) => retries = self.prepare_retry(class_id, error, retries).await?,
            }
        }
    }

    /// Cancels `user_id`'s booking in `class_id` and promotes the next waiting user.
    ///
    /// # Errors
    ///
    /// Same as [`book`](Self::book).
    #[instrument(name = "engine.cancel", skip_all, fields(class_id = %class_id, user_id = %user_id))]
    pub async fn cancel(&self, class_id: &ClassId, user_id: &UserId) -> BookingResult<CancelOutcome> {
        let _guard = self.locks.acquire(class_id).await;

        let mut retries = 0;
        loop {
            match self.try_cancel(class_id, user_id).await {
                Ok(outcome) => {
                    info!(
                        outcome = ?outcome,
                        promoted = ?outcome.promoted(),
                        "[engine.cancel] request completed"
                    );
                    return Ok(outcome);
                }
                Err(error) => retries = self.prepare_retry(class_id, error, retries).await?,
            }
        }
    }

    async fn try_book(&self, class_id: &ClassId, user_id: &UserId) -> StoreResult<BookingOutcome> {
        let Some(VersionedClass {
            mut record,
            version,
        }) = self.store.load(class_id).await?
        else {
            return Ok(BookingOutcome::ClassNotFound);
        };

        if !self.users.user_exists(user_id).await? {
            return Ok(BookingOutcome::UserNotFound);
        }

        let outcome = record.reserve(user_id);
        if outcome.is_mutation() {
            self.persist(record, version).await?;
        }
        Ok(outcome)
    }

    async fn try_cancel(&self, class_id: &ClassId, user_id: &UserId) -> StoreResult<CancelOutcome> {
        let Some(VersionedClass {
            mut record,
            version,
        }) = self.store.load(class_id).await?
        else {
            return Ok(CancelOutcome::ClassNotFound);
        };

        if !self.users.user_exists(user_id).await? {
            return Ok(CancelOutcome::UserNotFound);
        }

        let now = self.clock.now();
        let outcome = record.release(user_id, now, self.config.cancellation_window.as_duration());
        if outcome.is_mutation() {
            self.persist(record, version).await?;
        }
        Ok(outcome)
    }

    async fn persist(&self, record: ClassRecord, expected: RecordVersion) -> StoreResult<()> {
        let new_version = self.store.save(record, expected).await?;
        debug!(version = %new_version, "[engine.persist] class record saved");
        Ok(())
    }

    /// Decides whether a failed attempt is retried, and sleeps if so.
    ///
    /// Returns the updated retry count, or the error to surface.
    async fn prepare_retry(
        &self,
        class_id: &ClassId,
        error: StoreError,
        retries: u32,
    ) -> BookingResult<u32> {
        if !matches!(error, StoreError::VersionConflict { .. }) {
            warn!(error = %error, "[engine.store_error] store operation failed");
            return Err(error.into());
        }

        if !self.retry.allows_retry(retries) {
            warn!(
                attempts = retries + 1,
                "[engine.conflict] retries exhausted, giving up"
            );
            return Err(BookingError::ConcurrencyConflict {
                class_id: class_id.clone(),
                attempts: retries + 1,
            });
        }

        let attempt = retries + 1;
        let delay = self.retry.delay_for(attempt);
        let delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
        self.retry.notify(&RetryContext {
            attempt,
            delay_ms,
            class_id: class_id.clone(),
        });
        debug!(attempt, delay_ms, "[engine.retry] version conflict, retrying");

        tokio::time::sleep(delay).await;
        Ok(attempt)
    }
}
