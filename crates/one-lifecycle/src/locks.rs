//! Per-environment exclusive locks.
//!
//! One async mutex per environment name, created on first use and kept for
//! the lifetime of the table. Operations on the same name queue in FIFO
//! order; operations on different names never contend.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::OwnedMutexGuard;
use tracing::debug;

/// Registry of per-name locks.
#[derive(Debug, Default)]
pub struct NamespaceLockTable {
    entries: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl NamespaceLockTable {
    pub fn new() -> Self {
        Self::default()
    }

    fn entry(&self, key: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(mutex) = entries.get(key) {
            return mutex.clone();
        }
        let mutex = Arc::new(tokio::sync::Mutex::new(()));
        entries.insert(key.to_string(), mutex.clone());
        // Entries are never evicted.
        debug!(namespace = %key, registered = entries.len(), "namespace lock registered");
        mutex
    }

    /// Wait until the lock for `key` is exclusively held by the caller.
    pub async fn acquire(&self, key: &str) -> NamespaceLock {
        let mutex = self.entry(key);
        debug!(namespace = %key, "acquiring namespace lock");
        let guard = mutex.lock_owned().await;
        debug!(namespace = %key, "namespace lock acquired");
        NamespaceLock {
            key: key.to_string(),
            _guard: guard,
        }
    }

    /// Whether some operation currently holds the lock for `key`.
    pub fn is_held(&self, key: &str) -> bool {
        let entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries
            .get(key)
            .is_some_and(|mutex| mutex.try_lock().is_err())
    }

    /// Number of names that have ever been locked.
    pub fn len(&self) -> usize {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Exclusive hold on one environment name. Released on drop.
#[derive(Debug)]
pub struct NamespaceLock {
    key: String,
    _guard: OwnedMutexGuard<()>,
}

impl NamespaceLock {
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Release the lock explicitly.
    pub fn release(self) {
        drop(self);
    }
}

impl Drop for NamespaceLock {
    fn drop(&mut self) {
        debug!(namespace = %self.key, "namespace lock released");
    }
}
