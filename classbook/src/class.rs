//! The class record and its booking state transitions.
//!
//! [`ClassRecord`] owns the slot roster and the waiting list of one class and
//! is the only place where they change. The transitions are pure: they take
//! the current time as an argument and perform no I/O, so the engine can run
//! them inside its per-class critical section and persist the result in a
//! single save.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::outcome::{BookingOutcome, CancelOutcome};
use crate::types::{Capacity, ClassId, ClassKind, ClassName, Timestamp, UserId};

/// A roster or waiting list that violates the class invariants.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RecordInvariantViolation {
    /// More users hold a slot than the class admits.
    #[error("{occupied} users booked into a class of capacity {capacity}")]
    OverCapacity {
        /// Capacity of the class.
        capacity: Capacity,
        /// Number of users in the roster.
        occupied: usize,
    },

    /// A user appears twice in the roster.
    #[error("user '{0}' appears more than once in the slot roster")]
    DuplicateSlot(UserId),

    /// A user appears twice in the waiting list.
    #[error("user '{0}' appears more than once in the waiting list")]
    DuplicateWaiting(UserId),

    /// A user is both booked and waiting.
    #[error("user '{0}' is both booked and on the waiting list")]
    BookedAndWaiting(UserId),
}

/// A bookable class together with its roster and waiting list.
///
/// Invariants, upheld by every constructor and transition:
///
/// - the roster holds at most `capacity` users,
/// - neither sequence contains duplicates,
/// - no user is both booked and waiting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawClassRecord")]
pub struct ClassRecord {
    id: ClassId,
    name: ClassName,
    kind: ClassKind,
    capacity: Capacity,
    start_time: Timestamp,
    slots: Vec<UserId>,
    waiting_list: VecDeque<UserId>,
}

#[derive(Deserialize)]
struct RawClassRecord {
    id: ClassId,
    name: ClassName,
    kind: ClassKind,
    capacity: Capacity,
    start_time: Timestamp,
    #[serde(default)]
    slots: Vec<UserId>,
    #[serde(default)]
    waiting_list: Vec<UserId>,
}

impl TryFrom<RawClassRecord> for ClassRecord {
    type Error = RecordInvariantViolation;

    fn try_from(raw: RawClassRecord) -> Result<Self, Self::Error> {
        Self::new(raw.id, raw.name, raw.kind, raw.capacity, raw.start_time)
            .with_roster(raw.slots, raw.waiting_list)
    }
}

impl ClassRecord {
    /// Creates a class with an empty roster and an empty waiting list.
    pub const fn new(
        id: ClassId,
        name: ClassName,
        kind: ClassKind,
        capacity: Capacity,
        start_time: Timestamp,
    ) -> Self {
        Self {
            id,
            name,
            kind,
            capacity,
            start_time,
            slots: Vec::new(),
            waiting_list: VecDeque::new(),
        }
    }

    /// Replaces the roster and waiting list, validating the invariants.
    ///
    /// Used by store adapters when rebuilding a record from its persisted form.
    pub fn with_roster(
        mut self,
        slots: Vec<UserId>,
        waiting_list: Vec<UserId>,
    ) -> Result<Self, RecordInvariantViolation> {
        self.slots = slots;
        self.waiting_list = waiting_list.into();
        self.check_invariants()?;
        Ok(self)
    }

    /// Verifies the capacity, uniqueness and disjointness invariants.
    pub fn check_invariants(&self) -> Result<(), RecordInvariantViolation> {
        if !self.capacity.holds(self.slots.len()) {
            return Err(RecordInvariantViolation::OverCapacity {
                capacity: self.capacity,
                occupied: self.slots.len(),
            });
        }

        for (index, user) in self.slots.iter().enumerate() {
            if self.slots[..index].contains(user) {
                return Err(RecordInvariantViolation::DuplicateSlot(user.clone()));
            }
        }

        for (index, user) in self.waiting_list.iter().enumerate() {
            if self.waiting_list.range(..index).any(|other| other == user) {
                return Err(RecordInvariantViolation::DuplicateWaiting(user.clone()));
            }
            if self.slots.contains(user) {
                return Err(RecordInvariantViolation::BookedAndWaiting(user.clone()));
            }
        }

        Ok(())
    }

    /// The class identifier.
    pub const fn id(&self) -> &ClassId {
        &self.id
    }

    /// The display name.
    pub const fn name(&self) -> &ClassName {
        &self.name
    }

    /// The activity kind.
    pub const fn kind(&self) -> ClassKind {
        self.kind
    }

    /// Maximum number of booked users.
    pub const fn capacity(&self) -> Capacity {
        self.capacity
    }

    /// When the class begins.
    pub const fn start_time(&self) -> Timestamp {
        self.start_time
    }

    /// Booked users, in booking order.
    pub fn slots(&self) -> &[UserId] {
        &self.slots
    }

    /// Waiting users, head first.
    pub const fn waiting_list(&self) -> &VecDeque<UserId> {
        &self.waiting_list
    }

    /// Whether `user` holds a slot.
    pub fn is_booked(&self, user: &UserId) -> bool {
        self.slots.contains(user)
    }

    /// Whether `user` is on the waiting list.
    pub fn is_waiting(&self, user: &UserId) -> bool {
        self.waiting_list.contains(user)
    }

    /// Whether every slot is taken.
    pub fn is_full(&self) -> bool {
        !self.capacity.admits(self.slots.len())
    }

    /// Reserves a slot for `user`, or queues them when the class is full.
    ///
    /// The record changes only when the returned outcome is
    /// [`BookingOutcome::Booked`] or [`BookingOutcome::Waitlisted`].
    pub fn reserve(&mut self, user: &UserId) -> BookingOutcome {
        if self.is_booked(user) {
            return BookingOutcome::AlreadyBooked;
        }

        if self.capacity.admits(self.slots.len()) {
            // Only reachable for a waiting user if capacity grew after they queued.
            self.waiting_list.retain(|waiting| waiting != user);
            self.slots.push(user.clone());
            return BookingOutcome::Booked;
        }

        if self.is_waiting(user) {
            return BookingOutcome::AlreadyWaitlisted;
        }

        self.waiting_list.push_back(user.clone());
        BookingOutcome::Waitlisted
    }

    /// Releases `user`'s slot and promotes the head of the waiting list.
    ///
    /// Cancellation is refused when the class starts within `window` of `now`
    /// (inclusive), and for users who do not hold a slot. The record changes
    /// only when the returned outcome is [`CancelOutcome::Cancelled`].
    pub fn release(
        &mut self,
        user: &UserId,
        now: Timestamp,
        window: chrono::Duration,
    ) -> CancelOutcome {
        let Some(position) = self.slots.iter().position(|booked| booked == user) else {
            return CancelOutcome::NotBooked;
        };

        if now.until(self.start_time) <= window {
            return CancelOutcome::TooCloseToStart;
        }

        let _ = self.slots.remove(position);

        let promoted = self.waiting_list.pop_front();
        if let Some(next) = &promoted {
            self.slots.push(next.clone());
        }

        CancelOutcome::Cancelled { promoted }
    }
}
