//! Mutual exclusion per key.
//!
//! Entries exist only while someone holds or waits for the key, so the map
//! does not grow with the number of identities ever seen.

use dashmap::DashMap;
use std::hash::Hash;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::{Mutex, OwnedMutexGuard};

#[derive(Default)]
struct Slot {
    mutex: Arc<Mutex<()>>,
    /// Holders plus waiters. Only changed under the map's shard lock.
    users: AtomicUsize,
}

type Slots<K> = Arc<DashMap<K, Slot>>;

pub struct KeyedMutex<K: Eq + Hash + Clone> {
    locks: Slots<K>,
}

impl<K: Eq + Hash + Clone> Default for KeyedMutex<K> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: Eq + Hash + Clone> KeyedMutex<K> {
    pub fn new() -> Self {
        Self {
            locks: Arc::new(DashMap::new()),
        }
    }

    /// Waits until `key` is free. The key is released when the returned
    /// guard is dropped. A wait that is cancelled gives up its slot too.
    pub async fn acquire(&self, key: K) -> KeyedGuard<K> {
        let mutex = {
            let slot = self.locks.entry(key.clone()).or_default();
            slot.users.fetch_add(1, Ordering::SeqCst);
            slot.mutex.clone()
        };
        let registration = Registration {
            key,
            locks: self.locks.clone(),
        };
        let guard = mutex.lock_owned().await;
        KeyedGuard {
            _guard: guard,
            registration,
        }
    }

    /// Number of keys currently held or waited on.
    pub fn active_keys(&self) -> usize {
        self.locks.len()
    }
}

struct Registration<K: Eq + Hash + Clone> {
    key: K,
    locks: Slots<K>,
}

impl<K: Eq + Hash + Clone> Drop for Registration<K> {
    fn drop(&mut self) {
        self.locks
            .remove_if(&self.key, |_, slot| slot.users.fetch_sub(1, Ordering::SeqCst) == 1);
    }
}

#[must_use = "the key is released as soon as the guard is dropped"]
pub struct KeyedGuard<K: Eq + Hash + Clone> {
    // dropped before the registration
    _guard: OwnedMutexGuard<()>,
    registration: Registration<K>,
}

impl<K: Eq + Hash + Clone> KeyedGuard<K> {
    pub fn key(&self) -> &K {
        &self.registration.key
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn same_key_is_exclusive() {
        let locks = Arc::new(KeyedMutex::<String>::new());
        let inside = Arc::new(AtomicUsize::new(0));
        let max_inside = Arc::new(AtomicUsize::new(0));

        let tasks: Vec<_> = (0..4)
            .map(|_| {
                let locks = locks.clone();
                let inside = inside.clone();
                let max_inside = max_inside.clone();
                tokio::spawn(async move {
                    let _guard = locks.acquire("222@s.whatsapp.net".to_string()).await;
                    let now = inside.fetch_add(1, Ordering::SeqCst) + 1;
                    max_inside.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(5)).await;
                    inside.fetch_sub(1, Ordering::SeqCst);
                })
            })
            .collect();
        for task in tasks {
            task.await.unwrap();
        }

        assert_eq!(max_inside.load(Ordering::SeqCst), 1);
        assert_eq!(locks.active_keys(), 0);
    }

    #[tokio::test]
    async fn different_keys_do_not_block() {
        let locks = KeyedMutex::<&'static str>::new();
        let _a = locks.acquire("a").await;
        let b = tokio::time::timeout(Duration::from_millis(50), locks.acquire("b")).await;
        assert!(b.is_ok());
        assert_eq!(locks.active_keys(), 2);
    }

    #[tokio::test]
    async fn released_key_can_be_taken_again() {
        let locks = KeyedMutex::<u32>::new();
        let guard = locks.acquire(7).await;
        assert_eq!(*guard.key(), 7);
        assert!(
            tokio::time::timeout(Duration::from_millis(20), locks.acquire(7))
                .await
                .is_err()
        );
        drop(guard);
        let _again = tokio::time::timeout(Duration::from_millis(50), locks.acquire(7))
            .await
            .unwrap();
        assert_eq!(locks.active_keys(), 1);
    }

    #[tokio::test]
    async fn abandoned_wait_does_not_keep_the_key() {
        let locks = KeyedMutex::<u32>::new();
        let held = locks.acquire(7).await;
        let mut waiting = Box::pin(locks.acquire(7));
        assert!(
            tokio::time::timeout(Duration::from_millis(20), &mut waiting)
                .await
                .is_err()
        );

        drop(held);
        drop(waiting);
        assert_eq!(locks.active_keys(), 0);
    }
}
