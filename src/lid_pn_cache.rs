//! In-memory view of the LID/PN mappings.
//!
//! Not a performance cache: it has no TTL and is only written after the
//! mapping reached the key store. A phone number can have been mapped to
//! several LIDs over time; the entry with the newest `created_at` is the
//! current one on the phone-number side.

use std::collections::HashMap;
use tokio::sync::RwLock;

pub use wacore::types::{LearningSource, LidPnEntry};

#[derive(Debug, Default)]
struct Maps {
    by_lid: HashMap<String, LidPnEntry>,
    by_pn: HashMap<String, LidPnEntry>,
}

#[derive(Debug, Default)]
pub struct LidPnCache {
    maps: RwLock<Maps>,
}

impl LidPnCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn current_lid(&self, phone: &str) -> Option<String> {
        self.maps.read().await.by_pn.get(phone).map(|e| e.lid.clone())
    }

    pub async fn phone_number(&self, lid: &str) -> Option<String> {
        self.maps
            .read()
            .await
            .by_lid
            .get(lid)
            .map(|e| e.phone_number.clone())
    }

    pub async fn entry_by_phone(&self, phone: &str) -> Option<LidPnEntry> {
        self.maps.read().await.by_pn.get(phone).cloned()
    }

    /// Records `entry`. The LID side always takes it; the PN side only if it
    /// is not older than what is there. Returns whether it became the
    /// current LID of its phone number.
    pub async fn add(&self, entry: LidPnEntry) -> bool {
        let mut maps = self.maps.write().await;
        maps.by_lid.insert(entry.lid.clone(), entry.clone());

        let newer = maps
            .by_pn
            .get(&entry.phone_number)
            .is_none_or(|existing| existing.created_at <= entry.created_at);
        if newer {
            maps.by_pn.insert(entry.phone_number.clone(), entry);
        }
        newer
    }

    pub async fn warm_up(&self, entries: impl IntoIterator<Item = LidPnEntry>) {
        let start = std::time::Instant::now();
        let mut count = 0usize;
        for entry in entries {
            self.add(entry).await;
            count += 1;
        }
        log::debug!(
            "LID-PN cache warmed up with {count} entries in {:?}",
            start.elapsed()
        );
    }

    /// (LID entries, phone-number entries).
    pub async fn len(&self) -> (usize, usize) {
        let maps = self.maps.read().await;
        (maps.by_lid.len(), maps.by_pn.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(lid: &str, pn: &str, at: i64) -> LidPnEntry {
        LidPnEntry::with_timestamp(lid.to_string(), pn.to_string(), at, LearningSource::Usync)
    }

    #[tokio::test]
    async fn lookups_work_both_ways() {
        let cache = LidPnCache::new();
        assert!(cache.current_lid("559980000001").await.is_none());

        assert!(cache.add(entry("100000012345678", "559980000001", 1)).await);

        assert_eq!(
            cache.current_lid("559980000001").await.as_deref(),
            Some("100000012345678")
        );
        assert_eq!(
            cache.phone_number("100000012345678").await.as_deref(),
            Some("559980000001")
        );
    }

    #[tokio::test]
    async fn newest_lid_wins_on_phone_side() {
        let cache = LidPnCache::new();
        cache.add(entry("100000012345678", "559980000001", 1000)).await;
        assert!(cache.add(entry("100000087654321", "559980000001", 2000)).await);

        assert_eq!(
            cache.current_lid("559980000001").await.as_deref(),
            Some("100000087654321")
        );
        // the superseded LID still resolves back to its phone number
        assert_eq!(
            cache.phone_number("100000012345678").await.as_deref(),
            Some("559980000001")
        );
    }

    #[tokio::test]
    async fn older_entry_does_not_override() {
        let cache = LidPnCache::new();
        cache.add(entry("100000087654321", "559980000001", 2000)).await;
        assert!(!cache.add(entry("100000012345678", "559980000001", 1000)).await);

        let current = cache.entry_by_phone("559980000001").await.unwrap();
        assert_eq!(current.lid, "100000087654321");
        assert_eq!(current.created_at, 2000);
    }

    #[tokio::test]
    async fn warm_up_loads_everything() {
        let cache = LidPnCache::new();
        cache
            .warm_up([entry("lid1", "pn1", 1), entry("lid2", "pn2", 2), entry("lid3", "pn3", 3)])
            .await;

        assert_eq!(cache.len().await, (3, 3));
        assert_eq!(cache.current_lid("pn2").await.as_deref(), Some("lid2"));
    }
}
