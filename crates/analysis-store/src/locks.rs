use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// One async mutex per cache key.
///
/// Holding the guard across read-cache / call-model / write-cache keeps two
/// sessions from racing on the same key. A key's mutex is dropped from the
/// map once the last guard and waiter are gone.
#[derive(Debug, Default)]
pub struct KeyLocks {
    locks: DashMap<String, Arc<Mutex<()>>>,
}

/// Exclusive hold on one key. Releasing it prunes the key if nobody else waits.
#[derive(Debug)]
pub struct KeyGuard<'a> {
    guard: Option<OwnedMutexGuard<()>>,
    locks: &'a DashMap<String, Arc<Mutex<()>>>,
    key: String,
}

impl Drop for KeyGuard<'_> {
    fn drop(&mut self) {
        drop(self.guard.take());
        // Waiters hold a clone of the Arc, so a count of 1 means only the map is left
        self.locks
            .remove_if(&self.key, |_, mutex| Arc::strong_count(mutex) == 1);
    }
}

impl KeyLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn lock(&self, key: &str) -> KeyGuard<'_> {
        let mutex = self.locks.entry(key.to_string()).or_default().clone();
        KeyGuard {
            guard: Some(mutex.lock_owned().await),
            locks: &self.locks,
            key: key.to_string(),
        }
    }

    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}
