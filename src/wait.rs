//! Bounded waits: a timeout wrapper for single round trips and keyed
//! one-shot waiters for events that arrive out of band (receipts).

use crate::error::RelayError;
use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::time::timeout;

/// Runs `future` for at most `duration`.
pub async fn with_timeout<F: Future>(duration: Duration, future: F) -> Result<F::Output, RelayError> {
    timeout(duration, future)
        .await
        .map_err(|_| RelayError::Timeout(duration))
}

type Waiter<V> = (u64, oneshot::Sender<V>);

pub struct EventWaiters<K, V> {
    waiters: Mutex<HashMap<K, Vec<Waiter<V>>>>,
    next_id: AtomicU64,
}

impl<K, V> Default for EventWaiters<K, V> {
    fn default() -> Self {
        Self {
            waiters: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }
}

impl<K, V> EventWaiters<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// Waits for the next [`Self::notify`] on `key`. The registration is
    /// removed on every exit path, timeout included.
    pub async fn wait_for(&self, key: K, duration: Duration) -> Result<V, RelayError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        self.lock().entry(key.clone()).or_default().push((id, tx));

        let _guard = scopeguard::guard((), |_| self.remove(&key, id));

        match timeout(duration, rx).await {
            Ok(Ok(value)) => Ok(value),
            // sender dropped without a value
            Ok(Err(_)) | Err(_) => Err(RelayError::Timeout(duration)),
        }
    }

    /// Wakes every waiter registered on `key`; returns how many there were.
    pub fn notify(&self, key: &K, value: V) -> usize {
        let Some(waiters) = self.lock().remove(key) else {
            return 0;
        };
        let count = waiters.len();
        for (_, tx) in waiters {
            let _ = tx.send(value.clone());
        }
        count
    }

    pub fn pending(&self, key: &K) -> usize {
        self.lock().get(key).map_or(0, Vec::len)
    }

    fn remove(&self, key: &K, id: u64) {
        let mut waiters = self.lock();
        if let Some(list) = waiters.get_mut(key) {
            list.retain(|(waiter, _)| *waiter != id);
            if list.is_empty() {
                waiters.remove(key);
            }
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<K, Vec<Waiter<V>>>> {
        self.waiters.lock().unwrap_or_else(|p| p.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn notify_wakes_the_waiter() {
        let waiters: Arc<EventWaiters<String, u32>> = Arc::new(EventWaiters::new());
        let waiting = {
            let waiters = waiters.clone();
            tokio::spawn(async move { waiters.wait_for("id-1".into(), Duration::from_secs(5)).await })
        };

        while waiters.pending(&"id-1".to_string()) == 0 {
            tokio::task::yield_now().await;
        }
        assert_eq!(waiters.notify(&"id-1".to_string(), 7), 1);
        assert_eq!(waiting.await.unwrap().unwrap(), 7);
    }

    #[tokio::test]
    async fn timeout_removes_the_registration() {
        let waiters: EventWaiters<String, u32> = EventWaiters::new();
        let err = waiters
            .wait_for("id-1".into(), Duration::from_millis(10))
            .await
            .unwrap_err();
        assert!(matches!(err, RelayError::Timeout(_)));
        assert_eq!(waiters.pending(&"id-1".to_string()), 0);
        assert_eq!(waiters.notify(&"id-1".to_string(), 1), 0);
    }

    #[tokio::test]
    async fn with_timeout_reports_the_duration() {
        let err = with_timeout(Duration::from_millis(5), std::future::pending::<()>())
            .await
            .unwrap_err();
        assert!(matches!(err, RelayError::Timeout(d) if d == Duration::from_millis(5)));
        assert_eq!(with_timeout(Duration::from_secs(1), async { 3 }).await.unwrap(), 3);
    }
}
