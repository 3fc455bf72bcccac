#![forbid(invalid_value, overflowing_literals, unconditional_recursion, unsafe_code)]
#![deny(
    bad_style,
    meta_variable_misuse,
    non_ascii_idents,
    rust_2018_idioms,
    unreachable_code,
    unused_extern_crates,
    unused_must_use
)]
#![warn(missing_docs)]

//! Class booking with capacity-limited rosters and FIFO waiting lists.
//!
//! Users book a slot in a class; when the class is full they join its
//! waiting list. Cancelling a booking frees the slot for the user at the head
//! of the waiting list. Cancellation closes 30 minutes before the class
//! starts (configurable).
//!
//! # Overview
//!
//! - Domain types: [`ClassId`], [`UserId`], [`Capacity`], [`ClassRecord`]
//! - Outcomes: [`BookingOutcome`], [`CancelOutcome`], [`OutcomeCategory`]
//! - Ports: [`ClassStore`], [`ClassCatalog`], [`UserDirectory`], [`Clock`]
//! - Engine: [`BookingEngine`] with [`EngineConfig`] and [`RetryPolicy`]
//! - Listing: [`ListingQuery`], [`ClassPage`]
//! - Errors: [`StoreError`], [`BookingError`], [`Operation`]
//!
//! # Consistency
//!
//! All requests against one class are serialized: inside a process by a
//! per-class lock, across processes by a compare-and-swap on the record
//! version with bounded retries. Roster and waiting list are always written
//! together, so no reader observes a half-applied booking.

mod class;
mod clock;
mod config;
mod engine;
mod errors;
mod listing;
mod locks;
mod outcome;
mod retry;
mod store;
mod types;
mod validation;

pub use class::{ClassRecord, RecordInvariantViolation};
pub use clock::{Clock, SystemClock};
pub use config::{
    CancellationWindowMinutes, EngineConfig, MaxRetries, RetryBaseDelayMs, RetryMaxDelayMs,
};
pub use engine::BookingEngine;
pub use errors::{BookingError, BookingResult, Operation, StoreError, StoreResult};
pub use listing::{ClassPage, ListingQuery, PageNumber, PageSize, SortField};
pub use locks::{ClassGuard, ClassLocks};
pub use outcome::{BookingOutcome, CancelOutcome, OutcomeCategory};
pub use retry::{MetricsHook, RetryContext, RetryPolicy};
pub use store::{ClassCatalog, ClassStore, UserDirectory, VersionedClass};
pub use types::{
    Capacity, ClassId, ClassKind, ClassName, RecordVersion, Timestamp, UnknownClassKind, UserId,
};
