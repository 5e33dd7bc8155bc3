//! Transactions over a [`KeyStore`].
//!
//! One transaction is open at a time per store. Writes are buffered and
//! reach the backend as a single batch on [`KeyTransaction::commit`];
//! dropping the transaction discards them. `commit` hands back the batch it
//! applied so in-memory mirrors of the store are only fed committed data.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::OwnedMutexGuard;
use wacore::store::{KeyCategory, KeyStore, KeyUpdates, Result};

pub struct TransactionalKeyStore {
    backend: Arc<dyn KeyStore>,
    lock: Arc<tokio::sync::Mutex<()>>,
}

impl TransactionalKeyStore {
    pub fn new(backend: Arc<dyn KeyStore>) -> Self {
        Self {
            backend,
            lock: Arc::new(tokio::sync::Mutex::new(())),
        }
    }

    pub fn backend(&self) -> &Arc<dyn KeyStore> {
        &self.backend
    }

    /// Waits for the running transaction, if any, and opens a new one.
    /// `owner` only labels the transaction in logs.
    pub async fn begin(&self, owner: &str) -> KeyTransaction {
        let guard = self.lock.clone().lock_owned().await;
        log::trace!(target: "KeyStore", "transaction opened by {owner}");
        KeyTransaction {
            owner: owner.to_string(),
            backend: self.backend.clone(),
            writes: Mutex::new(HashMap::new()),
            _guard: guard,
        }
    }
}

type WriteKey = (KeyCategory, String);

pub struct KeyTransaction {
    owner: String,
    backend: Arc<dyn KeyStore>,
    writes: Mutex<HashMap<WriteKey, Option<Vec<u8>>>>,
    _guard: OwnedMutexGuard<()>,
}

impl KeyTransaction {
    pub fn owner(&self) -> &str {
        &self.owner
    }

    pub fn pending_writes(&self) -> usize {
        self.writes.lock().unwrap_or_else(|p| p.into_inner()).len()
    }

    /// Applies every buffered write in one backend batch and returns it.
    pub async fn commit(self) -> Result<KeyUpdates> {
        let writes = std::mem::take(&mut *self.writes.lock().unwrap_or_else(|p| p.into_inner()));
        if writes.is_empty() {
            return Ok(KeyUpdates::new());
        }

        let count = writes.len();
        let updates = writes
            .into_iter()
            .fold(KeyUpdates::new(), |updates, ((category, id), value)| match value {
                Some(value) => updates.put(category, id, value),
                None => updates.delete(category, id),
            });
        self.backend.set(updates.clone()).await?;
        log::debug!(target: "KeyStore", "committed {count} writes for {}", self.owner);
        Ok(updates)
    }
}

#[async_trait]
impl KeyStore for KeyTransaction {
    async fn get(&self, category: KeyCategory, ids: &[String]) -> Result<HashMap<String, Vec<u8>>> {
        let mut found = HashMap::new();
        let mut missing = Vec::new();
        {
            let writes = self.writes.lock().unwrap_or_else(|p| p.into_inner());
            for id in ids {
                match writes.get(&(category, id.clone())) {
                    Some(Some(value)) => {
                        found.insert(id.clone(), value.clone());
                    }
                    // deleted inside this transaction
                    Some(None) => {}
                    None => missing.push(id.clone()),
                }
            }
        }
        if !missing.is_empty() {
            found.extend(self.backend.get(category, &missing).await?);
        }
        Ok(found)
    }

    async fn set(&self, updates: KeyUpdates) -> Result<()> {
        let mut writes = self.writes.lock().unwrap_or_else(|p| p.into_inner());
        for (category, id, value) in updates {
            writes.insert((category, id), value);
        }
        Ok(())
    }

    fn defers_writes(&self) -> bool {
        true
    }
}
