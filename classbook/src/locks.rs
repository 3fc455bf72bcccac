//! Per-class mutual exclusion inside one process.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

use crate::types::ClassId;

/// Exclusive access to one class, released on drop.
pub type ClassGuard = OwnedMutexGuard<()>;

/// Registry of async mutexes keyed by class.
///
/// Requests against the same class queue up in FIFO order (tokio's mutex is
/// fair); requests against different classes never wait on each other.
/// Entries nobody holds or waits for are pruned on the next acquisition.
#[derive(Debug, Default)]
pub struct ClassLocks {
    locks: Mutex<HashMap<ClassId, Arc<AsyncMutex<()>>>>,
}

impl ClassLocks {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Waits until no other task holds `class_id`, then holds it.
    pub async fn acquire(&self, class_id: &ClassId) -> ClassGuard {
        let lock = {
            let mut locks = self.locks.lock();
            // A count of one means only the registry references the mutex.
            locks.retain(|_, lock| Arc::strong_count(lock) > 1);
            Arc::clone(locks.entry(class_id.clone()).or_default())
        };
        lock.lock_owned().await
    }

    /// Number of classes with a live entry.
    pub fn tracked(&self) -> usize {
        self.locks.lock().len()
    }
}
