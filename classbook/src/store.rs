//! Ports between the booking engine and its collaborators.
//!
//! - [`ClassStore`]: versioned reads and compare-and-swap writes of one class record.
//! - [`ClassCatalog`]: read-only listings.
//! - [`UserDirectory`]: existence checks for opaque user identifiers.
//!
//! Adapters live in the `classbook-memory` and `classbook-postgres` crates.

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;

use crate::class::ClassRecord;
use crate::errors::StoreResult;
use crate::listing::{ClassPage, ListingQuery};
use crate::types::{ClassId, RecordVersion, UserId};

/// A class record together with the version it was read at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionedClass {
    /// The record as stored.
    pub record: ClassRecord,
    /// The version to name when saving a modified copy.
    pub version: RecordVersion,
}

/// Persistence for class records with optimistic concurrency control.
///
/// # Compare-and-swap
///
/// [`save`](Self::save) writes the whole record (roster and waiting list
/// together) only if the stored version still equals `expected`. Otherwise it
/// fails with [`StoreError::VersionConflict`](crate::StoreError::VersionConflict)
/// and writes nothing. A successful save returns the new version, which is
/// always `expected.next()`.
pub trait ClassStore {
    /// Reads a class and its current version. `Ok(None)` if it does not exist.
    fn load(
        &self,
        class_id: &ClassId,
    ) -> impl Future<Output = StoreResult<Option<VersionedClass>>> + Send;

    /// Replaces a class record if its stored version equals `expected`.
    fn save(
        &self,
        record: ClassRecord,
        expected: RecordVersion,
    ) -> impl Future<Output = StoreResult<RecordVersion>> + Send;

    /// Creates a class at [`RecordVersion::initial`].
    ///
    /// Fails with [`StoreError::DuplicateClass`](crate::StoreError::DuplicateClass)
    /// if the identifier is taken. The engine never calls this; it exists for
    /// whatever administers the schedule.
    fn insert(&self, record: ClassRecord)
        -> impl Future<Output = StoreResult<RecordVersion>> + Send;
}

/// Read-only listing of classes.
pub trait ClassCatalog {
    /// Returns the page of classes selected by `query`, ordered and counted as
    /// [`ListingQuery::apply`] would.
    fn list_classes(
        &self,
        query: &ListingQuery,
    ) -> impl Future<Output = StoreResult<ClassPage>> + Send;
}

/// Existence lookup for users owned by an external identity service.
#[async_trait]
pub trait UserDirectory: Send + Sync {
    /// Whether a user with this identifier exists.
    async fn user_exists(&self, user_id: &UserId) -> StoreResult<bool>;
}

impl<T: ClassStore + Sync> ClassStore for &T {
    async fn load(&self, class_id: &ClassId) -> StoreResult<Option<VersionedClass>> {
        (*self).load(class_id).await
    }

    async fn save(&self, record: ClassRecord, expected: RecordVersion) -> StoreResult<RecordVersion> {
        (*self).save(record, expected).await
    }

    async fn insert(&self, record: ClassRecord) -> StoreResult<RecordVersion> {
        (*self).insert(record).await
    }
}

impl<T: ClassStore + Send + Sync> ClassStore for Arc<T> {
    async fn load(&self, class_id: &ClassId) -> StoreResult<Option<VersionedClass>> {
        (**self).load(class_id).await
    }

    async fn save(&self, record: ClassRecord, expected: RecordVersion) -> StoreResult<RecordVersion> {
        (**self).save(record, expected).await
    }

    async fn insert(&self, record: ClassRecord) -> StoreResult<RecordVersion> {
        (**self).insert(record).await
    }
}

impl<T: ClassCatalog + Sync> ClassCatalog for &T {
    async fn list_classes(&self, query: &ListingQuery) -> StoreResult<ClassPage> {
        (*self).list_classes(query).await
    }
}

impl<T: ClassCatalog + Send + Sync> ClassCatalog for Arc<T> {
    async fn list_classes(&self, query: &ListingQuery) -> StoreResult<ClassPage> {
        (**self).list_classes(query).await
    }
}

#[async_trait]
impl<T: UserDirectory + ?Sized> UserDirectory for Arc<T> {
    async fn user_exists(&self, user_id: &UserId) -> StoreResult<bool> {
        (**self).user_exists(user_id).await
    }
}
