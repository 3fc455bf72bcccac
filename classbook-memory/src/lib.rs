//! In-memory adapters for classbook
//!
//! This crate provides in-memory implementations of the `ClassStore`,
//! `ClassCatalog` and `UserDirectory` ports, useful for testing and
//! development scenarios where persistence is not required.

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![allow(clippy::significant_drop_tightening)]

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use classbook::{
    ClassCatalog, ClassId, ClassPage, ClassRecord, ClassStore, ListingQuery, RecordVersion,
    StoreError, StoreResult, UserDirectory, UserId, VersionedClass,
};
use parking_lot::RwLock;

/// Thread-safe in-memory class store.
///
/// Clones share the same underlying map, so a clone handed to an engine and
/// one kept by a test observe the same records.
#[derive(Debug, Clone, Default)]
pub struct InMemoryClassStore {
    classes: Arc<RwLock<HashMap<ClassId, VersionedClass>>>,
}

impl InMemoryClassStore {
    /// Create a new empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored classes.
    pub fn len(&self) -> usize {
        self.classes.read().len()
    }

    /// Whether the store holds no classes.
    pub fn is_empty(&self) -> bool {
        self.classes.read().is_empty()
    }
}

impl ClassStore for InMemoryClassStore {
    async fn load(&self, class_id: &ClassId) -> StoreResult<Option<VersionedClass>> {
        Ok(self.classes.read().get(class_id).cloned())
    }

    async fn save(&self, record: ClassRecord, expected: RecordVersion) -> StoreResult<RecordVersion> {
        let mut classes = self.classes.write();

        let current = classes
            .get_mut(record.id())
            .ok_or_else(|| StoreError::MissingClass(record.id().clone()))?;

        if current.version != expected {
            return Err(StoreError::VersionConflict {
                class_id: record.id().clone(),
                expected,
            });
        }

        let version = expected.next();
        *current = VersionedClass { record, version };
        Ok(version)
    }

    async fn insert(&self, record: ClassRecord) -> StoreResult<RecordVersion> {
        let mut classes = self.classes.write();

        if classes.contains_key(record.id()) {
            return Err(StoreError::DuplicateClass(record.id().clone()));
        }

        let version = RecordVersion::initial();
        let _ = classes.insert(record.id().clone(), VersionedClass { record, version });
        Ok(version)
    }
}

impl ClassCatalog for InMemoryClassStore {
    async fn list_classes(&self, query: &ListingQuery) -> StoreResult<ClassPage> {
        let snapshot: Vec<ClassRecord> = self
            .classes
            .read()
            .values()
            .map(|versioned| versioned.record.clone())
            .collect();

        Ok(query.apply(snapshot))
    }
}

/// Thread-safe in-memory set of known users.
#[derive(Debug, Clone, Default)]
pub struct InMemoryUserDirectory {
    users: Arc<RwLock<HashSet<UserId>>>,
}

impl InMemoryUserDirectory {
    /// Create an empty directory.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a directory that already knows `users`.
    pub fn with_users<I>(users: I) -> Self
    where
        I: IntoIterator<Item = UserId>,
    {
        Self {
            users: Arc::new(RwLock::new(users.into_iter().collect())),
        }
    }

    /// Add a user. Fails with [`StoreError::DuplicateUser`] if already known.
    pub fn register(&self, user_id: UserId) -> StoreResult<()> {
        let mut users = self.users.write();
        if users.contains(&user_id) {
            return Err(StoreError::DuplicateUser(user_id));
        }
        let _ = users.insert(user_id);
        Ok(())
    }
}

#[async_trait]
impl UserDirectory for InMemoryUserDirectory {
    async fn user_exists(&self, user_id: &UserId) -> StoreResult<bool> {
        Ok(self.users.read().contains(user_id))
    }
}
