/// Per-key async mutual exclusion
///
/// Used to serialise registrations per mac and relay commands per device id.
/// Entries are dropped once no task holds or waits on them.
use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Arc, Mutex};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

/// Guard for one key; the section ends when it is dropped
pub struct KeyGuard<K: Eq + Hash + Clone> {
    _guard: OwnedMutexGuard<()>,
    key: K,
    owner: Arc<Mutex<HashMap<K, Arc<AsyncMutex<()>>>>>,
}

impl<K: Eq + Hash + Clone> Drop for KeyGuard<K> {
    fn drop(&mut self) {
        let mut map = match self.owner.lock() {
            Ok(map) => map,
            Err(poisoned) => poisoned.into_inner(),
        };
        // Map entry + our guard's own Arc: nobody else is waiting
        if let Some(slot) = map.get(&self.key) {
            if Arc::strong_count(slot) <= 2 {
                map.remove(&self.key);
            }
        }
    }
}

/// A lazily-populated set of async mutexes keyed by `K`
///
/// Clones share the same set.
#[derive(Clone)]
pub struct KeyedLocks<K: Eq + Hash + Clone> {
    slots: Arc<Mutex<HashMap<K, Arc<AsyncMutex<()>>>>>,
}

impl<K: Eq + Hash + Clone> Default for KeyedLocks<K> {
    fn default() -> Self {
        Self {
            slots: Arc::new(Mutex::new(HashMap::new())),
        }
    }
}

impl<K: Eq + Hash + Clone> KeyedLocks<K> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to `key`
    pub async fn lock(&self, key: K) -> KeyGuard<K> {
        let slot = {
            let mut map = match self.slots.lock() {
                Ok(map) => map,
                Err(poisoned) => poisoned.into_inner(),
            };
            map.entry(key.clone())
                .or_insert_with(|| Arc::new(AsyncMutex::new(())))
                .clone()
        };

        let guard = slot.lock_owned().await;
        KeyGuard {
            _guard: guard,
            key,
            owner: self.slots.clone(),
        }
    }

    /// Keys currently held or waited on
    pub fn active(&self) -> usize {
        match self.slots.lock() {
            Ok(map) => map.len(),
            Err(poisoned) => poisoned.into_inner().len(),
        }
    }
}
