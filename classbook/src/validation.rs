//! Shared validation predicates for domain types.
//!
//! This module contains validation functions used by nutype-based domain types
//! across the classbook crate.

/// Validation predicate: reject control characters.
///
/// Identifiers travel through URLs, log lines and SQL parameters; control
/// characters in any of those positions are always a caller bug.
pub(crate) fn no_control_characters(s: &str) -> bool {
    !s.chars().any(char::is_control)
}
