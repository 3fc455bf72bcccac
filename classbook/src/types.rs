//! Core types for the classbook booking library.
//!
//! All identifiers and bounded quantities use smart constructors so that a
//! value which exists is a value which is valid, following the "parse, don't
//! validate" principle.

use chrono::{DateTime, Utc};
use nutype::nutype;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::validation::no_control_characters;

/// Identifier of a class.
///
/// `ClassId` values are trimmed, non-empty, at most 64 characters and free of
/// control characters. The booking core treats them as opaque tokens.
#[nutype(
    sanitize(trim),
    validate(not_empty, len_char_max = 64, predicate = no_control_characters),
    derive(
        Debug,
        Clone,
        PartialEq,
        Eq,
        PartialOrd,
        Ord,
        Hash,
        AsRef,
        Deref,
        Display,
        Serialize,
        Deserialize
    )
)]
pub struct ClassId(String);

impl ClassId {
    /// Generates a fresh, time-ordered identifier (UUIDv7).
    pub fn generate() -> Self {
        // A hyphenated UUID is always 36 printable characters.
        Self::try_new(Uuid::now_v7().to_string()).expect("UUIDv7 text is always a valid ClassId")
    }
}

/// Opaque identifier of a user, resolved by an external identity service.
///
/// The same constraints as [`ClassId`] apply. No further structure is
/// assumed; two users are the same user iff their identifiers are equal.
#[nutype(
    sanitize(trim),
    validate(not_empty, len_char_max = 64, predicate = no_control_characters),
    derive(
        Debug,
        Clone,
        PartialEq,
        Eq,
        PartialOrd,
        Ord,
        Hash,
        AsRef,
        Deref,
        Display,
        Serialize,
        Deserialize
    )
)]
pub struct UserId(String);

impl UserId {
    /// Generates a fresh, time-ordered identifier (UUIDv7).
    pub fn generate() -> Self {
        Self::try_new(Uuid::now_v7().to_string()).expect("UUIDv7 text is always a valid UserId")
    }
}

/// Human readable name of a class.
#[nutype(
    sanitize(trim),
    validate(not_empty, len_char_max = 200),
    derive(
        Debug,
        Clone,
        PartialEq,
        Eq,
        PartialOrd,
        Ord,
        Hash,
        AsRef,
        Deref,
        Display,
        Serialize,
        Deserialize
    )
)]
pub struct ClassName(String);

/// Maximum number of users that can hold a slot in a class.
///
/// A class always admits at least one user.
#[nutype(
    validate(greater_or_equal = 1),
    derive(
        Debug,
        Clone,
        Copy,
        PartialEq,
        Eq,
        PartialOrd,
        Ord,
        Hash,
        Display,
        Into,
        Serialize,
        Deserialize
    )
)]
pub struct Capacity(u32);

impl Capacity {
    /// Returns whether a roster currently holding `occupied` users has room
    /// for one more.
    pub fn admits(self, occupied: usize) -> bool {
        usize::try_from(self.into_inner()).map_or(true, |limit| occupied < limit)
    }

    /// Returns whether `occupied` users fit within this capacity.
    pub fn holds(self, occupied: usize) -> bool {
        usize::try_from(self.into_inner()).map_or(true, |limit| occupied <= limit)
    }
}

/// The kind of activity a class offers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClassKind {
    /// Yoga session.
    Yoga,
    /// Gym session.
    Gym,
    /// Dance session.
    Dance,
}

impl ClassKind {
    /// The lowercase name used in storage and on the wire.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Yoga => "yoga",
            Self::Gym => "gym",
            Self::Dance => "dance",
        }
    }
}

impl std::fmt::Display for ClassKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Returned when a string does not name a [`ClassKind`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown class kind '{0}', expected one of yoga, gym, dance")]
pub struct UnknownClassKind(pub String);

impl std::str::FromStr for ClassKind {
    type Err = UnknownClassKind;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "yoga" => Ok(Self::Yoga),
            "gym" => Ok(Self::Gym),
            "dance" => Ok(Self::Dance),
            _ => Err(UnknownClassKind(s.to_string())),
        }
    }
}

/// Version of a stored class record.
///
/// Versions start at 0 when a record is inserted and increase by one with
/// every successful save. Saves name the version they were computed from,
/// which is how concurrent writers are detected.
#[nutype(derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Display,
    Serialize,
    Deserialize
))]
pub struct RecordVersion(u64);

impl RecordVersion {
    /// The version assigned to a freshly inserted record.
    pub fn initial() -> Self {
        Self::new(0)
    }

    /// Returns the version following this one.
    #[must_use]
    pub fn next(self) -> Self {
        Self::new(self.into_inner() + 1)
    }
}

/// A point in time, always in UTC.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Timestamp(DateTime<Utc>);

impl Timestamp {
    /// Creates a new timestamp from a UTC `DateTime`.
    pub const fn new(datetime: DateTime<Utc>) -> Self {
        Self(datetime)
    }

    /// Creates a timestamp representing the current moment.
    pub fn now() -> Self {
        Self(Utc::now())
    }

    /// Returns the underlying `DateTime`.
    pub const fn as_datetime(&self) -> &DateTime<Utc> {
        &self.0
    }

    /// Converts the timestamp into the underlying `DateTime`.
    pub const fn into_datetime(self) -> DateTime<Utc> {
        self.0
    }

    /// Time remaining from `self` until `later`; negative if `later` is in the past.
    pub fn until(self, later: Self) -> chrono::Duration {
        later.0 - self.0
    }
}

impl From<DateTime<Utc>> for Timestamp {
    fn from(datetime: DateTime<Utc>) -> Self {
        Self::new(datetime)
    }
}

impl From<Timestamp> for DateTime<Utc> {
    fn from(timestamp: Timestamp) -> Self {
        timestamp.into_datetime()
    }
}

impl std::fmt::Display for Timestamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #[test]
        fn class_id_accepts_valid_strings(s in "[a-zA-Z0-9_-]{1,64}") {
            let result = ClassId::try_new(s.clone());
            prop_assert!(result.is_ok());
            let id = result.unwrap();
            prop_assert_eq!(id.as_ref(), s.as_str());
        }

        #[test]
        fn user_id_trims_whitespace(s in " {0,5}[a-f0-9]{1,50} {0,5}") {
            let user = UserId::try_new(s.clone()).unwrap();
            prop_assert_eq!(user.as_ref(), s.trim());
        }

        #[test]
        fn ids_reject_blank_strings(s in " {0,20}") {
            prop_assert!(ClassId::try_new(s.clone()).is_err());
            prop_assert!(UserId::try_new(s).is_err());
        }

        #[test]
        fn ids_reject_strings_over_64_chars(s in "[a-z0-9]{65,120}") {
            prop_assert!(ClassId::try_new(s).is_err());
        }

        #[test]
        fn capacity_admits_exactly_below_limit(limit in 1u32..500, occupied in 0usize..600) {
            let capacity = Capacity::try_new(limit).unwrap();
            prop_assert_eq!(capacity.admits(occupied), occupied < limit as usize);
            prop_assert_eq!(capacity.holds(occupied), occupied <= limit as usize);
        }

        #[test]
        fn record_version_next_increments_by_one(v in 0u64..u64::MAX) {
            prop_assert_eq!(RecordVersion::new(v).next().into_inner(), v + 1);
        }
    }

    #[test]
    fn ids_reject_control_characters() {
        assert!(ClassId::try_new("yoga\n101").is_err());
        assert!(UserId::try_new("user\u{7}").is_err());
    }

    #[test]
    fn capacity_rejects_zero() {
        assert!(Capacity::try_new(0).is_err());
        assert!(Capacity::try_new(1).is_ok());
    }

    #[test]
    fn generated_ids_are_unique() {
        assert_ne!(ClassId::generate(), ClassId::generate());
        assert_ne!(UserId::generate(), UserId::generate());
    }

    #[test]
    fn class_kind_parses_case_insensitively() {
        assert_eq!("Yoga".parse::<ClassKind>(), Ok(ClassKind::Yoga));
        assert_eq!(" gym ".parse::<ClassKind>(), Ok(ClassKind::Gym));
        assert_eq!("dance".parse::<ClassKind>(), Ok(ClassKind::Dance));
        assert!("pilates".parse::<ClassKind>().is_err());
    }

    #[test]
    fn class_kind_serializes_lowercase() {
        let json = serde_json::to_string(&ClassKind::Dance).unwrap();
        assert_eq!(json, "\"dance\"");
    }

    #[test]
    fn timestamp_until_is_signed() {
        let start = Timestamp::now();
        let later = Timestamp::new(start.into_datetime() + chrono::Duration::minutes(5));
        assert_eq!(start.until(later), chrono::Duration::minutes(5));
        assert_eq!(later.until(start), chrono::Duration::minutes(-5));
    }

    #[test]
    fn record_version_initial_is_zero() {
        assert_eq!(RecordVersion::initial().into_inner(), 0);
    }
}
