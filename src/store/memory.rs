use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;
use wacore::store::{KeyCategory, KeyStore, KeyUpdates, Result};

/// Key store kept entirely in memory. A batch passed to `set` is applied
/// under one write lock, so readers never see half of it.
#[derive(Debug, Default)]
pub struct MemoryKeyStore {
    data: RwLock<HashMap<KeyCategory, HashMap<String, Vec<u8>>>>,
}

impl MemoryKeyStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn count(&self, category: KeyCategory) -> usize {
        self.data
            .read()
            .await
            .get(&category)
            .map_or(0, HashMap::len)
    }

    pub async fn ids(&self, category: KeyCategory) -> Vec<String> {
        let data = self.data.read().await;
        let mut ids: Vec<String> = data
            .get(&category)
            .map(|m| m.keys().cloned().collect())
            .unwrap_or_default();
        ids.sort();
        ids
    }
}

#[async_trait]
impl KeyStore for MemoryKeyStore {
    async fn get(&self, category: KeyCategory, ids: &[String]) -> Result<HashMap<String, Vec<u8>>> {
        let data = self.data.read().await;
        let Some(entries) = data.get(&category) else {
            return Ok(HashMap::new());
        };
        Ok(ids
            .iter()
            .filter_map(|id| entries.get(id).map(|v| (id.clone(), v.clone())))
            .collect())
    }

    async fn set(&self, updates: KeyUpdates) -> Result<()> {
        let mut data = self.data.write().await;
        for (category, id, value) in updates {
            let entries = data.entry(category).or_default();
            match value {
                Some(value) => {
                    entries.insert(id, value);
                }
                None => {
                    entries.remove(&id);
                }
            }
        }
        Ok(())
    }
}
