//! Deterministic clocks and record builders for tests.

use chrono::{Duration, SubsecRound, Utc};
use classbook::{Capacity, ClassId, ClassKind, ClassName, ClassRecord, Clock, Timestamp, UserId};
use parking_lot::Mutex;

/// A clock that always reports the same instant.
#[derive(Debug, Clone, Copy)]
pub struct FixedClock(Timestamp);

impl FixedClock {
    /// A clock pinned at `now`.
    pub const fn new(now: Timestamp) -> Self {
        Self(now)
    }

    /// A clock pinned `offset` before `start`.
    ///
    /// `FixedClock::before(start, Duration::minutes(30))` is exactly at the
    /// cancellation cut-off of a class starting at `start`.
    pub fn before(start: Timestamp, offset: Duration) -> Self {
        Self(Timestamp::new(start.into_datetime() - offset))
    }
}

impl Clock for FixedClock {
    fn now(&self) -> Timestamp {
        self.0
    }
}

/// A clock tests can move.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<Timestamp>,
}

impl ManualClock {
    /// A clock starting at `now`.
    pub fn new(now: Timestamp) -> Self {
        Self {
            now: Mutex::new(now),
        }
    }

    /// Moves the clock to `now`, forwards or backwards.
    pub fn set(&self, now: Timestamp) {
        *self.now.lock() = now;
    }

    /// Moves the clock forward by `by`.
    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock();
        *now = Timestamp::new(now.into_datetime() + by);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Timestamp {
        *self.now.lock()
    }
}

/// Builds class records with sensible defaults: a fresh id, capacity 1,
/// a yoga class starting two hours from now.
#[derive(Debug, Clone)]
pub struct ClassRecordBuilder {
    id: ClassId,
    name: ClassName,
    kind: ClassKind,
    capacity: Capacity,
    start_time: Timestamp,
}

impl ClassRecordBuilder {
    /// A builder with the defaults above.
    pub fn new() -> Self {
        Self {
            id: ClassId::generate(),
            name: ClassName::try_new("Test Class").expect("valid class name"),
            kind: ClassKind::Yoga,
            capacity: Capacity::try_new(1).expect("valid capacity"),
            start_time: from_now(Duration::hours(2)),
        }
    }

    /// Uses `id` instead of a generated id.
    pub fn id(mut self, id: &str) -> Self {
        self.id = ClassId::try_new(id).expect("valid class id");
        self
    }

    /// Sets the class name.
    pub fn named(mut self, name: &str) -> Self {
        self.name = ClassName::try_new(name).expect("valid class name");
        self
    }

    /// Sets the class kind.
    pub const fn kind(mut self, kind: ClassKind) -> Self {
        self.kind = kind;
        self
    }

    /// Sets the number of slots.
    pub fn capacity(mut self, capacity: u32) -> Self {
        self.capacity = Capacity::try_new(capacity).expect("capacity must be at least 1");
        self
    }

    /// Starts the class at an exact instant.
    pub const fn starts_at(mut self, start_time: Timestamp) -> Self {
        self.start_time = start_time;
        self
    }

    /// Starts the class `offset` from now, truncated to microseconds.
    pub fn starts_in(mut self, offset: Duration) -> Self {
        self.start_time = from_now(offset);
        self
    }

    /// Builds an empty class record.
    pub fn build(self) -> ClassRecord {
        ClassRecord::new(self.id, self.name, self.kind, self.capacity, self.start_time)
    }
}

impl Default for ClassRecordBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Microsecond precision, which is what PostgreSQL `timestamptz` keeps.
fn from_now(offset: Duration) -> Timestamp {
    Timestamp::new((Utc::now() + offset).trunc_subsecs(6))
}

/// `user-1` .. `user-n`.
pub fn test_users(n: u32) -> Vec<UserId> {
    (1..=n).map(test_user).collect()
}

/// The user named `user-{n}`.
pub fn test_user(n: u32) -> UserId {
    UserId::try_new(format!("user-{n}")).expect("valid user id")
}
