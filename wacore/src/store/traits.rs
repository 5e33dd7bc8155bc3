use crate::store::error::Result;
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Namespaces of the key store. Ids are unique only within a category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum KeyCategory {
    /// Pairwise ratchet state, keyed by protocol address (`222:1@c.us.0`).
    Session,
    /// Sender-key records, keyed by `{group}::{sender protocol address}`.
    SenderKey,
    /// Per-group map of devices that hold the current distribution.
    SenderKeyMemory,
    /// `{pn}` -> lid user and `{lid}_reverse` -> pn user.
    LidMapping,
}

impl KeyCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            KeyCategory::Session => "session",
            KeyCategory::SenderKey => "sender-key",
            KeyCategory::SenderKeyMemory => "sender-key-memory",
            KeyCategory::LidMapping => "lid-mapping",
        }
    }
}

/// A batch of writes. A `None` value deletes the id.
#[derive(Debug, Clone, Default)]
pub struct KeyUpdates {
    entries: Vec<(KeyCategory, String, Option<Vec<u8>>)>,
}

impl KeyUpdates {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(mut self, category: KeyCategory, id: impl Into<String>, value: Vec<u8>) -> Self {
        self.entries.push((category, id.into(), Some(value)));
        self
    }

    pub fn delete(mut self, category: KeyCategory, id: impl Into<String>) -> Self {
        self.entries.push((category, id.into(), None));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &(KeyCategory, String, Option<Vec<u8>>)> {
        self.entries.iter()
    }
}

impl IntoIterator for KeyUpdates {
    type Item = (KeyCategory, String, Option<Vec<u8>>);
    type IntoIter = std::vec::IntoIter<Self::Item>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.into_iter()
    }
}

/// Category-scoped byte store shared by the session manager, the sender-key
/// ratchet, the mapping store and the ratchet collaborator.
#[async_trait]
pub trait KeyStore: Send + Sync {
    /// Returns only the ids that exist.
    async fn get(&self, category: KeyCategory, ids: &[String]) -> Result<HashMap<String, Vec<u8>>>;

    async fn set(&self, updates: KeyUpdates) -> Result<()>;

    async fn get_one(&self, category: KeyCategory, id: &str) -> Result<Option<Vec<u8>>> {
        let mut found = self.get(category, &[id.to_string()]).await?;
        Ok(found.remove(id))
    }

    async fn put_one(&self, category: KeyCategory, id: &str, value: Vec<u8>) -> Result<()> {
        self.set(KeyUpdates::new().put(category, id, value)).await
    }

    async fn delete_one(&self, category: KeyCategory, id: &str) -> Result<()> {
        self.set(KeyUpdates::new().delete(category, id)).await
    }

    async fn contains(&self, category: KeyCategory, id: &str) -> Result<bool> {
        Ok(self.get_one(category, id).await?.is_some())
    }

    /// Whether writes stay invisible to other readers until a later commit.
    fn defers_writes(&self) -> bool {
        false
    }
}

pub fn encode_value<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    Ok(bincode::serde::encode_to_vec(
        value,
        bincode::config::standard(),
    )?)
}

pub fn decode_value<T: DeserializeOwned>(data: &[u8]) -> Result<T> {
    let (value, _) = bincode::serde::decode_from_slice(data, bincode::config::standard())?;
    Ok(value)
}
