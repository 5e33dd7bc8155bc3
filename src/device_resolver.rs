//! Recipient -> device resolution backed by a TTL cache and usync queries.

use crate::error::RelayError;
use crate::lid_mapping::{LidMappingStore, MappingPair};
use crate::lid_pn_cache::LearningSource;
use crate::wait::with_timeout;
use moka::future::Cache;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use wacore::client::context::Transport;
use wacore::store::KeyStore;
use wacore::usync::{self, Device};
use wacore_binary::builder::NodeBuilder;
use wacore_binary::jid::{Jid, SERVER_JID, Server};

pub struct DeviceResolver {
    /// Devices by user, as the server last listed them (primary included).
    cache: Cache<String, Arc<Vec<Device>>>,
    transport: Arc<dyn Transport>,
    mappings: Arc<LidMappingStore>,
    query_timeout: Duration,
    sid_counter: AtomicU64,
}

impl DeviceResolver {
    pub fn new(
        transport: Arc<dyn Transport>,
        mappings: Arc<LidMappingStore>,
        ttl: Duration,
        capacity: u64,
        query_timeout: Duration,
    ) -> Self {
        Self {
            cache: Cache::builder()
                .time_to_live(ttl)
                .max_capacity(capacity)
                .build(),
            transport,
            mappings,
            query_timeout,
            sid_counter: AtomicU64::new(1),
        }
    }

    pub async fn invalidate(&self, user: &str) {
        self.cache.invalidate(user).await;
    }

    /// Expands `recipients` into devices.
    ///
    /// A recipient with an explicit device is returned as is. A phone
    /// number whose LID is also among the recipients is dropped. Devices
    /// are addressed on the server they were requested with, whatever
    /// server the cache entry came from.
    pub async fn resolve_devices(
        &self,
        keys: &dyn KeyStore,
        me: &Jid,
        recipients: &[Jid],
        use_cache: bool,
        ignore_zero_devices: bool,
    ) -> Result<Vec<Device>, RelayError> {
        let recipients = self.prefer_lid(keys, recipients).await?;

        let mut resolved = Vec::new();
        let mut to_fetch: Vec<Jid> = Vec::new();
        let mut requested_server: HashMap<String, Server> = HashMap::new();

        for jid in &recipients {
            if jid.has_explicit_device() {
                resolved.push(Device::new(jid.clone()));
                continue;
            }
            if use_cache && let Some(devices) = self.cache.get(&jid.user).await {
                log::trace!(target: "Relay/Devices", "using cached devices for {}", jid.user);
                resolved.extend(
                    devices
                        .iter()
                        .filter(|d| !(ignore_zero_devices && d.device == 0))
                        .map(|d| d.on_server(jid.server)),
                );
                continue;
            }
            requested_server.insert(jid.user.clone(), jid.server);
            to_fetch.push(jid.to_non_ad());
        }
        if !use_cache {
            log::debug!(target: "Relay/Devices", "not using cache for devices");
        }

        if !to_fetch.is_empty() {
            let fetched = self.fetch_devices(keys, me, &to_fetch).await?;
            for (user, devices) in fetched {
                let server = requested_server.get(&user).copied().unwrap_or(Server::User);
                resolved.extend(
                    devices
                        .iter()
                        .filter(|d| !(ignore_zero_devices && d.device == 0))
                        .map(|d| d.on_server(server)),
                );
                self.cache.insert(user, Arc::new(devices)).await;
            }
        }

        let mut seen = HashSet::new();
        resolved.retain(|d| seen.insert(d.jid.to_string()));
        Ok(resolved)
    }

    /// Deduplicates and drops phone numbers whose linked identity is
    /// present too.
    async fn prefer_lid(&self, keys: &dyn KeyStore, recipients: &[Jid]) -> Result<Vec<Jid>, RelayError> {
        let lid_users: HashSet<&str> = recipients
            .iter()
            .filter(|j| j.is_lid())
            .map(|j| j.user.as_str())
            .collect();

        let mut seen = HashSet::new();
        let mut out = Vec::with_capacity(recipients.len());
        for jid in recipients {
            if !seen.insert(jid.clone()) {
                continue;
            }
            if jid.is_pn()
                && !lid_users.is_empty()
                && let Some(lid) = self.mappings.known_lid_for_pn(keys, jid).await?
                && lid_users.contains(lid.user.as_str())
            {
                log::debug!(target: "Relay/Devices", "dropping {jid}, addressed as {lid}");
                continue;
            }
            out.push(jid.clone());
        }
        Ok(out)
    }

    /// One usync query for every user in `jids`; devices grouped by user.
    async fn fetch_devices(
        &self,
        keys: &dyn KeyStore,
        me: &Jid,
        jids: &[Jid],
    ) -> Result<Vec<(String, Vec<Device>)>, RelayError> {
        let sid = format!("relay-{}", self.sid_counter.fetch_add(1, Ordering::Relaxed));
        let iq = NodeBuilder::new("iq")
            .attr("to", SERVER_JID)
            .attr("type", "get")
            .attr("xmlns", "usync")
            .child(usync::build_get_user_devices_query(jids, &sid))
            .build();

        log::debug!(target: "Relay/Devices", "fetching devices for {} users", jids.len());
        let response = with_timeout(self.query_timeout, self.transport.query(iq))
            .await?
            .map_err(RelayError::AddressResolution)?;

        let lists = usync::parse_get_user_devices_response(&response)?;
        let learned: Vec<MappingPair> = usync::parse_lid_mappings_from_response(&response)
            .into_iter()
            .map(|m| MappingPair::new(Jid::pn(&m.phone_number), Jid::lid(&m.lid)))
            .collect();
        if !learned.is_empty() {
            self.mappings
                .store_mappings(keys, &learned, LearningSource::Usync)
                .await?;
        }

        let mut grouped: Vec<(String, Vec<Device>)> = Vec::new();
        for device in usync::extract_device_jids(&lists, me, false) {
            match grouped.iter_mut().find(|(user, _)| *user == device.user) {
                Some((_, devices)) => devices.push(device),
                None => grouped.push((device.user.clone(), vec![device])),
            }
        }
        Ok(grouped)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loopback::LoopbackServer;
    use crate::store::MemoryKeyStore;

    fn resolver(server: Arc<LoopbackServer>, mappings: Arc<LidMappingStore>) -> DeviceResolver {
        DeviceResolver::new(
            server,
            mappings,
            Duration::from_secs(300),
            100,
            Duration::from_secs(5),
        )
    }

    #[tokio::test]
    async fn explicit_devices_bypass_the_directory() {
        let server = Arc::new(LoopbackServer::new());
        let resolver = resolver(server.clone(), Arc::new(LidMappingStore::new(None)));
        let keys = MemoryKeyStore::new();

        let devices = resolver
            .resolve_devices(&keys, &Jid::pn("111"), &[Jid::pn("222").with_device(4)], true, false)
            .await
            .unwrap();
        assert_eq!(devices.len(), 1);
        assert_eq!(devices[0].jid.to_string(), "222:4@s.whatsapp.net");
        assert_eq!(server.usync_count(), 0);
    }

    #[tokio::test]
    async fn second_resolution_hits_the_cache() {
        let server = Arc::new(LoopbackServer::new());
        server.add_devices(&Jid::pn("222"), &[0, 1]);
        let resolver = resolver(server.clone(), Arc::new(LidMappingStore::new(None)));
        let keys = MemoryKeyStore::new();
        let me = Jid::pn("111");

        let first = resolver
            .resolve_devices(&keys, &me, &[Jid::pn("222")], true, false)
            .await
            .unwrap();
        let second = resolver
            .resolve_devices(&keys, &me, &[Jid::pn("222")], true, true)
            .await
            .unwrap();

        assert_eq!(first.len(), 2);
        assert_eq!(second.len(), 1);
        assert_eq!(second[0].device, 1);
        assert_eq!(server.usync_count(), 1);

        resolver
            .resolve_devices(&keys, &me, &[Jid::pn("222")], false, false)
            .await
            .unwrap();
        assert_eq!(server.usync_count(), 2);
    }

    #[tokio::test]
    async fn cached_devices_follow_the_requested_server() {
        let server = Arc::new(LoopbackServer::new());
        server.add_devices(&Jid::pn("900"), &[0, 2]);
        let resolver = resolver(server.clone(), Arc::new(LidMappingStore::new(None)));
        let keys = MemoryKeyStore::new();
        let me = Jid::pn("111");

        resolver
            .resolve_devices(&keys, &me, &[Jid::pn("900")], true, false)
            .await
            .unwrap();
        let as_lid = resolver
            .resolve_devices(&keys, &me, &[Jid::lid("900")], true, false)
            .await
            .unwrap();
        let jids: Vec<String> = as_lid.iter().map(|d| d.jid.to_string()).collect();
        assert_eq!(jids, ["900@lid", "900:2@lid"]);
    }

    #[tokio::test]
    async fn failed_query_fails_the_whole_resolution() {
        let server = Arc::new(LoopbackServer::new());
        server.add_devices(&Jid::pn("222"), &[0]);
        server.fail_queries(true);
        let resolver = resolver(server, Arc::new(LidMappingStore::new(None)));
        let keys = MemoryKeyStore::new();

        let err = resolver
            .resolve_devices(&keys, &Jid::pn("111"), &[Jid::pn("222"), Jid::pn("333")], true, false)
            .await
            .unwrap_err();
        assert!(matches!(err, RelayError::AddressResolution(_)));
    }

    #[tokio::test]
    async fn phone_number_is_dropped_when_its_lid_is_requested() {
        let server = Arc::new(LoopbackServer::new());
        server.add_devices(&Jid::lid("900"), &[0, 1]);
        let mappings = Arc::new(LidMappingStore::new(None));
        let keys = MemoryKeyStore::new();
        mappings
            .store_mappings(
                &keys,
                &[MappingPair::new(Jid::pn("222"), Jid::lid("900"))],
                LearningSource::Usync,
            )
            .await
            .unwrap();
        let resolver = resolver(server, mappings);

        let devices = resolver
            .resolve_devices(&keys, &Jid::pn("111"), &[Jid::pn("222"), Jid::lid("900")], true, false)
            .await
            .unwrap();
        let jids: Vec<String> = devices.iter().map(|d| d.jid.to_string()).collect();
        assert_eq!(jids, ["900@lid", "900:1@lid"]);
    }

    #[tokio::test]
    async fn usync_lid_children_are_learned() {
        let server = Arc::new(LoopbackServer::new());
        server.add_devices(&Jid::pn("222"), &[0]);
        server.map_lid(&Jid::pn("222"), &Jid::lid("800"));
        let mappings = Arc::new(LidMappingStore::new(None));
        let resolver = resolver(server, mappings.clone());
        let keys = MemoryKeyStore::new();

        resolver
            .resolve_devices(&keys, &Jid::pn("111"), &[Jid::pn("222")], true, false)
            .await
            .unwrap();
        assert_eq!(mappings.cache().current_lid("222").await.as_deref(), Some("800"));
    }
}
