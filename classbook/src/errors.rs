//! Error types for classbook.
//!
//! Not-found and business-rule results are *outcomes*, not errors: they are
//! modelled by [`BookingOutcome`](crate::BookingOutcome) and
//! [`CancelOutcome`](crate::CancelOutcome). The types in this module cover the
//! two remaining failure kinds:
//!
//! - **Concurrency conflicts**: another writer changed the class between our
//!   read and our save. Retryable from a fresh read.
//! - **Infrastructure failures**: the backing store could not serve the
//!   request, or returned a record that violates the class invariants.
//!
//! # Example Usage
//!
//! ```rust,ignore
//! match engine.book(&class_id, &user_id).await {
//!     Ok(outcome) => respond(outcome.category().status_code(), outcome.message()),
//!     Err(error) if error.is_retryable() => schedule_retry(),
//!     Err(error) => respond(error.status_code(), &error.to_string()),
//! }
//! ```

use thiserror::Error;

use crate::types::{ClassId, RecordVersion, UserId};

/// Identifies the store operation that failed.
///
/// Used by [`StoreError::StoreFailure`] to report which operation hit an
/// infrastructure failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    /// Loading a class record.
    LoadClass,
    /// Saving a class record with a version check.
    SaveClass,
    /// Inserting a new class record.
    InsertClass,
    /// Listing class records.
    ListClasses,
    /// Looking up a user.
    FindUser,
    /// Registering a user.
    RegisterUser,
    /// Beginning a database transaction.
    BeginTransaction,
    /// Committing a database transaction.
    CommitTransaction,
}

impl std::fmt::Display for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::LoadClass => write!(f, "load_class"),
            Self::SaveClass => write!(f, "save_class"),
            Self::InsertClass => write!(f, "insert_class"),
            Self::ListClasses => write!(f, "list_classes"),
            Self::FindUser => write!(f, "find_user"),
            Self::RegisterUser => write!(f, "register_user"),
            Self::BeginTransaction => write!(f, "begin_transaction"),
            Self::CommitTransaction => write!(f, "commit_transaction"),
        }
    }
}

/// Errors returned by store adapters.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    /// The record changed since it was read.
    ///
    /// Returned by a save whose expected version no longer matches the stored
    /// version. The whole read-inspect-save sequence must be repeated.
    #[error("version conflict on class '{class_id}': expected version {expected}")]
    VersionConflict {
        /// The class whose record moved on.
        class_id: ClassId,
        /// The version the writer based its change on.
        expected: RecordVersion,
    },

    /// A save targeted a class that does not exist.
    #[error("class '{0}' does not exist")]
    MissingClass(ClassId),

    /// An insert targeted a class identifier that is already taken.
    #[error("class '{0}' already exists")]
    DuplicateClass(ClassId),

    /// A user registration targeted an identifier that is already taken.
    #[error("user '{0}' already exists")]
    DuplicateUser(UserId),

    /// The stored representation of a class could not be turned back into a
    /// valid record.
    #[error("stored class '{class_id}' is corrupt: {detail}")]
    CorruptRecord {
        /// The affected class.
        class_id: ClassId,
        /// What was wrong with it.
        detail: String,
    },

    /// The backing store failed (connection drop, timeout, unavailable).
    #[error("{operation} operation failed: {detail}")]
    StoreFailure {
        /// The operation that failed.
        operation: Operation,
        /// Backend-specific description.
        detail: String,
    },
}

impl StoreError {
    /// Convenience constructor for [`StoreError::StoreFailure`].
    pub fn failure(operation: Operation, detail: impl Into<String>) -> Self {
        Self::StoreFailure {
            operation,
            detail: detail.into(),
        }
    }
}

/// Errors returned by the booking engine.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BookingError {
    /// Concurrent writers kept changing the class until the retry budget ran out.
    ///
    /// The request had no effect. Callers may retry it.
    #[error("concurrency conflict on class '{class_id}' after {attempts} attempts")]
    ConcurrencyConflict {
        /// The contended class.
        class_id: ClassId,
        /// How many times the operation was tried.
        attempts: u32,
    },

    /// The store failed. The request had no effect.
    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

impl BookingError {
    /// Whether repeating the same request may succeed.
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::ConcurrencyConflict { .. })
    }

    /// HTTP status code conventionally used for this error.
    pub const fn status_code(&self) -> u16 {
        match self {
            Self::ConcurrencyConflict { .. } => 409,
            Self::Store(StoreError::StoreFailure { .. }) => 503,
            Self::Store(_) => 500,
        }
    }
}

/// Type alias for store results.
pub type StoreResult<T> = Result<T, StoreError>;

/// Type alias for engine results.
pub type BookingResult<T> = Result<T, BookingError>;

#[cfg(test)]
mod tests {
    use super::*;

    fn class_id() -> ClassId {
        ClassId::try_new("yoga-101").unwrap()
    }

    #[test]
    fn store_error_messages_are_descriptive() {
        let err = StoreError::VersionConflict {
            class_id: class_id(),
            expected: RecordVersion::new(4),
        };
        assert_eq!(
            err.to_string(),
            "version conflict on class 'yoga-101': expected version 4"
        );

        let err = StoreError::failure(Operation::SaveClass, "connection reset");
        assert_eq!(err.to_string(), "save_class operation failed: connection reset");

        let err = StoreError::DuplicateClass(class_id());
        assert_eq!(err.to_string(), "class 'yoga-101' already exists");
    }

    #[test]
    fn booking_error_wraps_store_error() {
        let err: BookingError = StoreError::failure(Operation::LoadClass, "timeout").into();
        assert!(matches!(
            err,
            BookingError::Store(StoreError::StoreFailure {
                operation: Operation::LoadClass,
                ..
            })
        ));
        assert_eq!(err.to_string(), "store error: load_class operation failed: timeout");
    }

    #[test]
    fn only_concurrency_conflicts_are_retryable() {
        let conflict = BookingError::ConcurrencyConflict {
            class_id: class_id(),
            attempts: 4,
        };
        assert!(conflict.is_retryable());
        assert_eq!(conflict.status_code(), 409);

        let failure = BookingError::Store(StoreError::failure(Operation::LoadClass, "down"));
        assert!(!failure.is_retryable());
        assert_eq!(failure.status_code(), 503);

        let corrupt = BookingError::Store(StoreError::CorruptRecord {
            class_id: class_id(),
            detail: "duplicate user".to_string(),
        });
        assert_eq!(corrupt.status_code(), 500);
    }
}
