//! Pairwise session assertion and PN -> LID session migration.
//!
//! A user whose phone number maps to a linked identity is addressed by the
//! LID. Sessions still held under the phone number are moved over in bulk
//! (device index preserved) and the phone-number copy is deleted; when
//! neither identity has a session the LID is what gets fetched.

use crate::error::{RelayError, SessionMigrationError};
use crate::lid_mapping::LidMappingStore;
use crate::wait::with_timeout;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use wacore::client::context::{SignalRepository, Transport};
use wacore::prekeys::PreKeyUtils;
use wacore::store::{KeyCategory, KeyStore, KeyUpdates};
use wacore::types::jid::JidExt;
use wacore_binary::jid::Jid;

/// Maximum number of devices in one pre-key fetch.
pub const SESSION_CHECK_BATCH_SIZE: usize = 50;

fn session_id(jid: &Jid) -> String {
    jid.to_protocol_address().to_string()
}

/// Moves the sessions of `pairs` (phone-number device, same device on the
/// LID) in one batch.
///
/// For each pair the result tells whether the LID device now has a
/// session. A phone-number session next to an existing LID session is
/// stale and deleted as well.
pub async fn migrate_sessions(
    keys: &dyn KeyStore,
    user: &str,
    pairs: &[(Jid, Jid)],
) -> Result<Vec<bool>, SessionMigrationError> {
    let ids: Vec<String> = pairs
        .iter()
        .flat_map(|(pn, lid)| [session_id(pn), session_id(lid)])
        .collect();
    let found = keys
        .get(KeyCategory::Session, &ids)
        .await
        .map_err(|source| SessionMigrationError::Load {
            user: user.to_string(),
            source,
        })?;

    let mut updates = KeyUpdates::new();
    let mut usable = Vec::with_capacity(pairs.len());
    let mut moved = 0usize;
    for (pn, lid) in pairs {
        let (pn_id, lid_id) = (session_id(pn), session_id(lid));
        let has_lid = found.contains_key(&lid_id);
        match found.get(&pn_id) {
            Some(_) if has_lid => {
                updates = updates.delete(KeyCategory::Session, pn_id.clone());
            }
            Some(record) => {
                updates = updates
                    .put(KeyCategory::Session, lid_id, record.clone())
                    .delete(KeyCategory::Session, pn_id.clone());
                moved += 1;
            }
            None => {}
        }
        usable.push(has_lid || found.contains_key(&pn_id));
    }

    if !updates.is_empty() {
        keys.set(updates)
            .await
            .map_err(|source| SessionMigrationError::Commit {
                user: user.to_string(),
                source,
            })?;
    }
    if moved > 0 {
        log::info!(target: "Relay/Session", "migrated {moved} sessions of {user} to its LID");
    }
    Ok(usable)
}

pub struct SessionManager {
    transport: Arc<dyn Transport>,
    signal: Arc<dyn SignalRepository>,
    mappings: Arc<LidMappingStore>,
    batch_size: usize,
    query_timeout: Duration,
}

impl SessionManager {
    pub fn new(
        transport: Arc<dyn Transport>,
        signal: Arc<dyn SignalRepository>,
        mappings: Arc<LidMappingStore>,
        batch_size: usize,
        query_timeout: Duration,
    ) -> Self {
        Self {
            transport,
            signal,
            mappings,
            batch_size: batch_size.max(1),
            query_timeout,
        }
    }

    /// Makes sure every address has a session, fetching pre-key bundles
    /// for those that do not. Returns whether anything was fetched.
    ///
    /// With `force` every address is fetched again and no migration is
    /// attempted.
    pub async fn ensure_sessions(
        &self,
        keys: &dyn KeyStore,
        addresses: &[Jid],
        force: bool,
    ) -> Result<bool, RelayError> {
        let to_fetch = if force {
            dedup(addresses.iter().cloned())
        } else {
            self.missing_sessions(keys, addresses).await?
        };
        if to_fetch.is_empty() {
            return Ok(false);
        }

        self.warn_dual_identity(keys, &to_fetch).await?;
        log::debug!(target: "Relay/Session", "fetching sessions for {} devices", to_fetch.len());
        for batch in to_fetch.chunks(self.batch_size) {
            self.fetch_and_inject(keys, batch).await?;
        }
        Ok(true)
    }

    /// Addresses still without a session after migrating what can be
    /// migrated. PN devices of migrated users are replaced by their LID.
    async fn missing_sessions(&self, keys: &dyn KeyStore, addresses: &[Jid]) -> Result<Vec<Jid>, RelayError> {
        let mut by_user: Vec<(String, Vec<Jid>)> = Vec::new();
        for jid in dedup(addresses.iter().cloned()) {
            let user = jid.to_non_ad().to_string();
            match by_user.iter_mut().find(|(u, _)| *u == user) {
                Some((_, devices)) => devices.push(jid),
                None => by_user.push((user, vec![jid])),
            }
        }

        let mut candidates = Vec::with_capacity(addresses.len());
        for (user, devices) in by_user {
            let lid = match devices.first() {
                Some(first) => self.mappings.known_lid_for_pn(keys, first).await?,
                None => None,
            };
            let Some(lid) = lid else {
                candidates.extend(devices);
                continue;
            };

            let pairs: Vec<(Jid, Jid)> = devices
                .iter()
                .map(|pn| (pn.clone(), pn.with_server_user(lid.server, &lid.user)))
                .collect();
            match migrate_sessions(keys, &user, &pairs).await {
                // migrated or not, the LID is the address from now on
                Ok(_) => candidates.extend(pairs.into_iter().map(|(_, lid)| lid)),
                Err(e) => {
                    log::warn!(target: "Relay/Session", "session migration failed: {e}");
                    candidates.extend(devices);
                }
            }
        }

        let ids: Vec<String> = candidates.iter().map(session_id).collect();
        let existing = keys.get(KeyCategory::Session, &ids).await?;
        Ok(dedup(
            candidates
                .into_iter()
                .filter(|jid| !existing.contains_key(&session_id(jid))),
        ))
    }

    async fn warn_dual_identity(&self, keys: &dyn KeyStore, to_fetch: &[Jid]) -> Result<(), RelayError> {
        let lid_users: HashSet<&str> = to_fetch
            .iter()
            .filter(|j| j.is_lid())
            .map(|j| j.user.as_str())
            .collect();
        if lid_users.is_empty() {
            return Ok(());
        }
        let mut warned = HashSet::new();
        for pn in to_fetch.iter().filter(|j| j.is_pn()) {
            if let Some(lid) = self.mappings.known_lid_for_pn(keys, pn).await?
                && lid_users.contains(lid.user.as_str())
                && warned.insert(pn.user.clone())
            {
                log::warn!(
                    target: "Relay/Session",
                    "fetching sessions for {} under both {} and {}",
                    pn.user,
                    pn.to_non_ad(),
                    lid.to_non_ad()
                );
            }
        }
        Ok(())
    }

    async fn fetch_and_inject(&self, keys: &dyn KeyStore, batch: &[Jid]) -> Result<(), RelayError> {
        let iq = PreKeyUtils::build_fetch_prekeys_iq(batch);
        let response = with_timeout(self.query_timeout, self.transport.query(iq))
            .await?
            .map_err(RelayError::SessionFetch)?;
        let bundles = PreKeyUtils::parse_prekeys_response(&response)?;
        let bundles: HashMap<String, _> = bundles
            .into_iter()
            .map(|(jid, bundle)| (session_id(&jid), bundle))
            .collect();

        for jid in batch {
            let address = jid.to_protocol_address();
            let Some(bundle) = bundles.get(&address.to_string()) else {
                log::warn!(target: "Relay/Session", "no pre-key bundle returned for {jid}");
                continue;
            };
            self.signal
                .inject_session(keys, &address, bundle)
                .await
                .map_err(|e| {
                    log::warn!(target: "Relay/Session", "failed to establish session with {jid}: {e}");
                    RelayError::SessionFetch(anyhow::Error::new(e).context(format!("session with {jid}")))
                })?;
        }
        Ok(())
    }
}

fn dedup(jids: impl IntoIterator<Item = Jid>) -> Vec<Jid> {
    let mut seen = HashSet::new();
    jids.into_iter()
        .filter(|jid| seen.insert(session_id(jid)))
        .collect()
}
