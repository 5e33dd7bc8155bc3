//! Durable LID/PN mapping store.
//!
//! Both directions are persisted in the `lid-mapping` key category
//! (`{pn}` and `{lid}_reverse`, each holding the whole entry) and mirrored
//! in a [`LidPnCache`]. Mappings are user-level; lookups carry the device
//! of the address they were asked about.
//!
//! The cache only mirrors committed rows. Through a store that defers its
//! writes the cache is left alone and [`LidMappingStore::apply_committed`]
//! catches up once the batch is committed.

use crate::lid_pn_cache::{LearningSource, LidPnCache, LidPnEntry};
use std::sync::Arc;
use wacore::client::context::LidDirectory;
use wacore::store::{KeyCategory, KeyStore, KeyUpdates, StoreError, decode_value, encode_value};
use wacore_binary::jid::{Jid, Server};

fn reverse_id(lid_user: &str) -> String {
    format!("{lid_user}_reverse")
}

/// One phone number and the linked identity it maps to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MappingPair {
    pub pn: Jid,
    pub lid: Jid,
}

impl MappingPair {
    pub fn new(pn: Jid, lid: Jid) -> Self {
        Self { pn, lid }
    }
}

pub struct LidMappingStore {
    cache: LidPnCache,
    directory: Option<Arc<dyn LidDirectory>>,
}

impl LidMappingStore {
    pub fn new(directory: Option<Arc<dyn LidDirectory>>) -> Self {
        Self {
            cache: LidPnCache::new(),
            directory,
        }
    }

    pub fn cache(&self) -> &LidPnCache {
        &self.cache
    }

    /// Persists and caches `pairs`. Pairs that are not a phone number
    /// matched with a LID are skipped. Returns how many were stored.
    pub async fn store_mappings(
        &self,
        keys: &dyn KeyStore,
        pairs: &[MappingPair],
        source: LearningSource,
    ) -> Result<usize, StoreError> {
        let mut updates = KeyUpdates::new();
        let mut entries = Vec::with_capacity(pairs.len());
        for pair in pairs {
            if !pair.pn.is_pn() || !pair.lid.is_lid() {
                log::warn!(
                    target: "LidMapping",
                    "ignoring invalid mapping {} -> {}",
                    pair.pn,
                    pair.lid
                );
                continue;
            }
            let entry = LidPnEntry::new(pair.lid.user.clone(), pair.pn.user.clone(), source);
            let value = encode_value(&entry)?;
            updates = updates
                .put(KeyCategory::LidMapping, entry.phone_number.clone(), value.clone())
                .put(KeyCategory::LidMapping, reverse_id(&entry.lid), value);
            entries.push(entry);
        }
        if entries.is_empty() {
            return Ok(0);
        }

        keys.set(updates).await?;
        let stored = entries.len();
        for entry in entries {
            log::debug!(
                target: "LidMapping",
                "stored mapping {} <-> {} ({})",
                entry.phone_number,
                entry.lid,
                entry.learning_source.as_str()
            );
            if !keys.defers_writes() {
                self.cache.add(entry).await;
            }
        }
        Ok(stored)
    }

    /// Caches the phone-number rows of a committed batch.
    pub async fn apply_committed(&self, updates: &KeyUpdates) {
        let rows = updates.iter().filter_map(|(category, id, value)| match value {
            Some(value) if *category == KeyCategory::LidMapping && !id.ends_with("_reverse") => {
                Some((id, value))
            }
            _ => None,
        });
        for (id, value) in rows {
            match decode_value::<LidPnEntry>(value) {
                Ok(entry) => {
                    self.cache.add(entry).await;
                }
                Err(e) => log::warn!(target: "LidMapping", "unreadable mapping row {id}: {e}"),
            }
        }
    }

    /// LID for `pn` from the cache or the key store, without asking the
    /// directory.
    pub async fn known_lid_for_pn(
        &self,
        keys: &dyn KeyStore,
        pn: &Jid,
    ) -> Result<Option<Jid>, StoreError> {
        if !pn.is_pn() {
            return Ok(None);
        }
        if let Some(lid_user) = self.cache.current_lid(&pn.user).await {
            return Ok(Some(pn.with_server_user(Server::Lid, &lid_user)));
        }
        let Some(raw) = keys.get_one(KeyCategory::LidMapping, &pn.user).await? else {
            return Ok(None);
        };
        let entry: LidPnEntry = decode_value(&raw)?;
        let lid = pn.with_server_user(Server::Lid, &entry.lid);
        if !keys.defers_writes() {
            self.cache.add(entry).await;
        }
        Ok(Some(lid))
    }

    pub async fn known_pn_for_lid(
        &self,
        keys: &dyn KeyStore,
        lid: &Jid,
    ) -> Result<Option<Jid>, StoreError> {
        if !lid.is_lid() {
            return Ok(None);
        }
        if let Some(pn_user) = self.cache.phone_number(&lid.user).await {
            return Ok(Some(lid.with_server_user(Server::User, &pn_user)));
        }
        let Some(raw) = keys
            .get_one(KeyCategory::LidMapping, &reverse_id(&lid.user))
            .await?
        else {
            return Ok(None);
        };
        let entry: LidPnEntry = decode_value(&raw)?;
        let pn = lid.with_server_user(Server::User, &entry.phone_number);
        if !keys.defers_writes() {
            self.cache.add(entry).await;
        }
        Ok(Some(pn))
    }

    /// Like [`Self::known_lid_for_pn`], then falls back to the directory
    /// and stores what it answers. Directory failures read as "unknown".
    pub async fn lid_for_pn(&self, keys: &dyn KeyStore, pn: &Jid) -> Result<Option<Jid>, StoreError> {
        if let Some(lid) = self.known_lid_for_pn(keys, pn).await? {
            return Ok(Some(lid));
        }
        let Some(directory) = self.directory.as_ref().filter(|_| pn.is_pn()) else {
            return Ok(None);
        };
        match directory.lid_for_pn(&pn.to_non_ad()).await {
            Ok(Some(lid)) if lid.is_lid() => {
                let pair = MappingPair::new(pn.to_non_ad(), lid.to_non_ad());
                self.store_mappings(keys, &[pair], LearningSource::RecipientLatestLid)
                    .await?;
                Ok(Some(pn.with_server_user(Server::Lid, &lid.user)))
            }
            Ok(_) => Ok(None),
            Err(e) => {
                log::warn!(target: "LidMapping", "directory lookup for {pn} failed: {e}");
                Ok(None)
            }
        }
    }

    pub async fn pn_for_lid(&self, keys: &dyn KeyStore, lid: &Jid) -> Result<Option<Jid>, StoreError> {
        if let Some(pn) = self.known_pn_for_lid(keys, lid).await? {
            return Ok(Some(pn));
        }
        let Some(directory) = self.directory.as_ref().filter(|_| lid.is_lid()) else {
            return Ok(None);
        };
        match directory.pn_for_lid(&lid.to_non_ad()).await {
            Ok(Some(pn)) if pn.is_pn() => {
                let pair = MappingPair::new(pn.to_non_ad(), lid.to_non_ad());
                self.store_mappings(keys, &[pair], LearningSource::RecipientLatestLid)
                    .await?;
                Ok(Some(lid.with_server_user(Server::User, &pn.user)))
            }
            Ok(_) => Ok(None),
            Err(e) => {
                log::warn!(target: "LidMapping", "directory lookup for {lid} failed: {e}");
                Ok(None)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loopback::StaticLidDirectory;
    use crate::store::{MemoryKeyStore, TransactionalKeyStore};

    #[tokio::test]
    async fn stores_both_directions() {
        let keys = MemoryKeyStore::new();
        let store = LidMappingStore::new(None);
        let stored = store
            .store_mappings(
                &keys,
                &[MappingPair::new(Jid::pn("559980000001"), Jid::lid("100000012345678"))],
                LearningSource::Usync,
            )
            .await
            .unwrap();
        assert_eq!(stored, 1);
        assert_eq!(
            keys.ids(KeyCategory::LidMapping).await,
            ["100000012345678_reverse", "559980000001"]
        );

        let lid = store
            .known_lid_for_pn(&keys, &Jid::pn("559980000001").with_device(3))
            .await
            .unwrap();
        assert_eq!(lid, Some(Jid::lid("100000012345678").with_device(3)));

        let pn = store
            .known_pn_for_lid(&keys, &Jid::lid("100000012345678"))
            .await
            .unwrap();
        assert_eq!(pn, Some(Jid::pn("559980000001")));
    }

    #[tokio::test]
    async fn persisted_mapping_survives_a_cold_cache() {
        let keys = MemoryKeyStore::new();
        LidMappingStore::new(None)
            .store_mappings(
                &keys,
                &[MappingPair::new(Jid::pn("222"), Jid::lid("900"))],
                LearningSource::Pairing,
            )
            .await
            .unwrap();

        let fresh = LidMappingStore::new(None);
        assert_eq!(fresh.cache().len().await, (0, 0));
        let lid = fresh.known_lid_for_pn(&keys, &Jid::pn("222")).await.unwrap();
        assert_eq!(lid, Some(Jid::lid("900")));
        assert_eq!(fresh.cache().len().await, (1, 1));
    }

    #[tokio::test]
    async fn uncommitted_mappings_stay_out_of_the_cache() {
        let keys = TransactionalKeyStore::new(Arc::new(MemoryKeyStore::new()));
        let store = LidMappingStore::new(None);
        let pair = MappingPair::new(Jid::pn("222"), Jid::lid("900"));
        {
            let tx = keys.begin("rolled back").await;
            store
                .store_mappings(&tx, &[pair.clone()], LearningSource::Usync)
                .await
                .unwrap();
            let lid = store.known_lid_for_pn(&tx, &Jid::pn("222")).await.unwrap();
            assert_eq!(lid, Some(Jid::lid("900")));
        }
        assert_eq!(store.cache().len().await, (0, 0));
        let lid = store
            .known_lid_for_pn(keys.backend().as_ref(), &Jid::pn("222"))
            .await
            .unwrap();
        assert!(lid.is_none());

        let tx = keys.begin("committed").await;
        store
            .store_mappings(&tx, &[pair], LearningSource::Usync)
            .await
            .unwrap();
        assert_eq!(store.cache().len().await, (0, 0));
        let committed = tx.commit().await.unwrap();
        store.apply_committed(&committed).await;
        assert_eq!(store.cache().current_lid("222").await.as_deref(), Some("900"));
        assert_eq!(store.cache().phone_number("900").await.as_deref(), Some("222"));
    }

    #[tokio::test]
    async fn invalid_pairs_are_skipped() {
        let keys = MemoryKeyStore::new();
        let store = LidMappingStore::new(None);
        let stored = store
            .store_mappings(
                &keys,
                &[
                    MappingPair::new(Jid::group("g1"), Jid::lid("900")),
                    MappingPair::new(Jid::pn("222"), Jid::pn("333")),
                ],
                LearningSource::Other,
            )
            .await
            .unwrap();
        assert_eq!(stored, 0);
        assert_eq!(keys.count(KeyCategory::LidMapping).await, 0);
        assert!(
            store
                .known_lid_for_pn(&keys, &Jid::group("g1"))
                .await
                .unwrap()
                .is_none()
        );
    }

    #[tokio::test]
    async fn directory_answer_is_stored() {
        let keys = MemoryKeyStore::new();
        let directory = Arc::new(StaticLidDirectory::new());
        directory.insert(Jid::pn("444"), Jid::lid("777"));
        let store = LidMappingStore::new(Some(directory.clone()));

        let lid = store
            .lid_for_pn(&keys, &Jid::pn("444").with_device(2))
            .await
            .unwrap();
        assert_eq!(lid, Some(Jid::lid("777").with_device(2)));
        assert_eq!(directory.lookups(), 1);

        // second lookup is served locally
        let pn = store.pn_for_lid(&keys, &Jid::lid("777")).await.unwrap();
        assert_eq!(pn, Some(Jid::pn("444")));
        assert_eq!(directory.lookups(), 1);
        assert_eq!(keys.count(KeyCategory::LidMapping).await, 2);
    }
}
