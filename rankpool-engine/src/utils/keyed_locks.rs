//! Per-key async locks
//!
//! Serializes work on one key (for example one athlete/test type/level
//! triple) while unrelated keys proceed in parallel.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// Registry of lazily created per-key mutexes
pub struct KeyedLocks<K> {
    locks: Arc<Mutex<HashMap<K, Arc<Mutex<()>>>>>,
}

impl<K> Clone for KeyedLocks<K> {
    fn clone(&self) -> Self {
        Self {
            locks: Arc::clone(&self.locks),
        }
    }
}

impl<K> Default for KeyedLocks<K>
where
    K: Eq + Hash + Clone,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K> KeyedLocks<K>
where
    K: Eq + Hash + Clone,
{
    pub fn new() -> Self {
        Self {
            locks: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Wait for exclusive access to `key`
    ///
    /// The returned guard releases the key when dropped.
    pub async fn acquire(&self, key: K) -> OwnedMutexGuard<()> {
        let entry = {
            let mut locks = self.locks.lock().await;

            // Drop entries nobody is holding or waiting on
            locks.retain(|_, lock| Arc::strong_count(lock) > 1);

            Arc::clone(locks.entry(key).or_insert_with(|| Arc::new(Mutex::new(()))))
        };

        entry.lock_owned().await
    }

    /// Number of keys currently tracked
    pub async fn len(&self) -> usize {
        self.locks.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}
