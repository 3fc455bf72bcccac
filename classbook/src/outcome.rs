//! Typed results of the booking operations.
//!
//! Every way a Book or Cancel request can end without an infrastructure or
//! concurrency failure is a variant here, so callers branch exhaustively
//! instead of inspecting messages.

use serde::{Deserialize, Serialize};

use crate::types::UserId;

/// How a boundary layer should classify an outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeCategory {
    /// The requested state transition was applied.
    Success,
    /// The class or the user does not exist.
    NotFound,
    /// A business rule refused the request; nothing changed.
    Rejected,
}

impl OutcomeCategory {
    /// HTTP status code conventionally used for this category.
    pub const fn status_code(self) -> u16 {
        match self {
            Self::Success => 200,
            Self::NotFound => 404,
            Self::Rejected => 400,
        }
    }
}

/// Result of a Book request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BookingOutcome {
    /// The user now holds a slot.
    Booked,
    /// The class was full; the user was appended to the waiting list.
    Waitlisted,
    /// The user already held a slot. Nothing changed.
    AlreadyBooked,
    /// The class is full and the user is already waiting. Nothing changed.
    AlreadyWaitlisted,
    /// No class with the requested identifier exists.
    ClassNotFound,
    /// No user with the requested identifier exists.
    UserNotFound,
}

impl BookingOutcome {
    /// Classification for the boundary layer.
    pub const fn category(self) -> OutcomeCategory {
        match self {
            Self::Booked | Self::Waitlisted => OutcomeCategory::Success,
            Self::ClassNotFound | Self::UserNotFound => OutcomeCategory::NotFound,
            Self::AlreadyBooked | Self::AlreadyWaitlisted => OutcomeCategory::Rejected,
        }
    }

    /// Whether this outcome was produced by persisting a change.
    pub const fn is_mutation(self) -> bool {
        matches!(self, Self::Booked | Self::Waitlisted)
    }

    /// Short human readable description.
    pub const fn message(self) -> &'static str {
        match self {
            Self::Booked => "slot booked successfully",
            Self::Waitlisted => "added to waiting list",
            Self::AlreadyBooked => "user already booked this class",
            Self::AlreadyWaitlisted => "user is already on the waiting list",
            Self::ClassNotFound => "class not found",
            Self::UserNotFound => "user not found",
        }
    }
}

/// Result of a Cancel request.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CancelOutcome {
    /// The user's slot was released.
    Cancelled {
        /// The user moved from the head of the waiting list into the freed slot, if any.
        promoted: Option<UserId>,
    },
    /// The class starts too soon for cancellation. Nothing changed.
    TooCloseToStart,
    /// The user does not hold a slot (waiting-list entries included). Nothing changed.
    NotBooked,
    /// No class with the requested identifier exists.
    ClassNotFound,
    /// No user with the requested identifier exists.
    UserNotFound,
}

impl CancelOutcome {
    /// Classification for the boundary layer.
    pub const fn category(&self) -> OutcomeCategory {
        match self {
            Self::Cancelled { .. } => OutcomeCategory::Success,
            Self::ClassNotFound | Self::UserNotFound => OutcomeCategory::NotFound,
            Self::TooCloseToStart | Self::NotBooked => OutcomeCategory::Rejected,
        }
    }

    /// Whether this outcome was produced by persisting a change.
    pub const fn is_mutation(&self) -> bool {
        matches!(self, Self::Cancelled { .. })
    }

    /// The promoted user, when the cancellation freed a slot for someone waiting.
    pub const fn promoted(&self) -> Option<&UserId> {
        match self {
            Self::Cancelled { promoted } => promoted.as_ref(),
            _ => None,
        }
    }

    /// Short human readable description.
    pub const fn message(&self) -> &'static str {
        match self {
            Self::Cancelled { promoted: Some(_) } => {
                "booking cancelled, slot reallocated from waiting list"
            }
            Self::Cancelled { promoted: None } => "booking cancelled",
            Self::TooCloseToStart => "cannot cancel within the cancellation window before start",
            Self::NotBooked => "user did not book this class",
            Self::ClassNotFound => "class not found",
            Self::UserNotFound => "user not found",
        }
    }
}
