//! Per-key async mutual exclusion.
//!
//! Summary version assignment reads the current max version and writes
//! max + 1; two writers on the same (case, type, step) key must not
//! interleave. Dataset example appends are serialized per dataset the same
//! way so statistics are always recomputed from the full example set.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Arc;
use tokio::sync::OwnedMutexGuard;

#[derive(Default)]
struct Slot {
    mutex: Arc<tokio::sync::Mutex<()>>,
    /// Holders plus waiters
    users: usize,
}

/// A set of async mutexes created on demand, one per key.
///
/// Entries are dropped once no guard or waiter holds them, so the map only
/// grows with the number of keys in flight.
pub struct KeyedLocks<K> {
    locks: Mutex<HashMap<K, Slot>>,
}

impl<K> Default for KeyedLocks<K> {
    fn default() -> Self {
        Self {
            locks: Mutex::new(HashMap::new()),
        }
    }
}

/// Registration of one caller on a key, from the start of its wait until
/// its guard is released. Dropping it, including when the wait is
/// cancelled, prunes the entry once no caller is left.
struct Lease<'a, K: Eq + Hash> {
    owner: &'a KeyedLocks<K>,
    key: K,
}

impl<K: Eq + Hash> Drop for Lease<'_, K> {
    fn drop(&mut self) {
        let mut locks = self.owner.locks.lock();
        if let Some(slot) = locks.get_mut(&self.key) {
            slot.users -= 1;
            if slot.users == 0 {
                locks.remove(&self.key);
            }
        }
    }
}

/// Held while the key is locked.
pub struct KeyGuard<'a, K: Eq + Hash> {
    // Field order: the mutex is released before the lease is returned.
    _guard: OwnedMutexGuard<()>,
    _lease: Lease<'a, K>,
}

impl<K> KeyedLocks<K>
where
    K: Eq + Hash + Clone,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to `key`.
    pub async fn lock(&self, key: K) -> KeyGuard<'_, K> {
        let mutex = {
            let mut locks = self.locks.lock();
            let slot = locks.entry(key.clone()).or_default();
            slot.users += 1;
            slot.mutex.clone()
        };
        let lease = Lease { owner: self, key };

        let guard = mutex.lock_owned().await;
        KeyGuard {
            _guard: guard,
            _lease: lease,
        }
    }

    /// Keys with a live lock entry.
    pub fn active(&self) -> usize {
        self.locks.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test(start_paused = true)]
    async fn test_same_key_is_serialized() {
        let locks = Arc::new(KeyedLocks::new());
        let inside = Arc::new(AtomicUsize::new(0));
        let max_inside = Arc::new(AtomicUsize::new(0));

        let tasks: Vec<_> = (0..8)
            .map(|_| {
                let locks = locks.clone();
                let inside = inside.clone();
                let max_inside = max_inside.clone();
                tokio::spawn(async move {
                    let _guard = locks.lock("c-1/overall").await;
                    let now = inside.fetch_add(1, Ordering::SeqCst) + 1;
                    max_inside.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(10)).await;
                    inside.fetch_sub(1, Ordering::SeqCst);
                })
            })
            .collect();

        for task in tasks {
            task.await.unwrap();
        }
        assert_eq!(max_inside.load(Ordering::SeqCst), 1);
        assert_eq!(locks.active(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_different_keys_run_concurrently() {
        let locks = KeyedLocks::new();
        let a = locks.lock("a").await;
        let b = tokio::time::timeout(Duration::from_millis(1), locks.lock("b")).await;
        assert!(b.is_ok());
        assert_eq!(locks.active(), 2);
        drop(b);
        drop(a);
        assert_eq!(locks.active(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_entry_survives_while_waiter_queued() {
        let locks = Arc::new(KeyedLocks::new());
        let first = locks.lock("k").await;

        let waiter = {
            let locks = locks.clone();
            tokio::spawn(async move {
                let _guard = locks.lock("k").await;
            })
        };
        tokio::time::sleep(Duration::from_millis(1)).await;

        drop(first);
        assert_eq!(locks.active(), 1);
        waiter.await.unwrap();
        assert_eq!(locks.active(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_waiter_releases_entry() {
        let locks = KeyedLocks::new();
        let first = locks.lock("k").await;

        let waited = tokio::time::timeout(Duration::from_millis(5), locks.lock("k")).await;
        assert!(waited.is_err());
        assert_eq!(locks.active(), 1);

        drop(first);
        assert_eq!(locks.active(), 0);

        // The key is usable again afterwards.
        let again = tokio::time::timeout(Duration::from_millis(5), locks.lock("k")).await;
        assert!(again.is_ok());
    }
}
