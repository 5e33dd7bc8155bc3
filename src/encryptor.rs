//! Pairwise fan-out of one payload to many devices.

use crate::client::Account;
use crate::error::RelayError;
use crate::keyed_mutex::KeyedMutex;
use crate::lid_mapping::LidMappingStore;
use crate::session::migrate_sessions;
use futures_util::future::join_all;
use std::sync::Arc;
use wacore::client::context::SignalRepository;
use wacore::send::{build_enc_node, build_participant_node};
use wacore::signal::CiphertextType;
use wacore::store::{KeyStore, StoreError};
use wacore::types::jid::JidExt;
use wacore_binary::jid::Jid;
use wacore_binary::node::{Attrs, Node};

/// `<to jid>` nodes in device order, and whether any of them carries a
/// pre-key message.
#[derive(Debug, Default)]
pub struct EncryptedFanout {
    pub nodes: Vec<Node>,
    pub device_identity_required: bool,
}

/// Key under which all pairwise work for one person is serialized: the
/// LID user when one is known, else the address as given.
pub async fn identity_lock_key(
    mappings: &LidMappingStore,
    keys: &dyn KeyStore,
    jid: &Jid,
) -> Result<String, StoreError> {
    let identity = match mappings.known_lid_for_pn(keys, jid).await? {
        Some(lid) => lid,
        None => jid.clone(),
    };
    Ok(identity.to_non_ad().to_string())
}

pub struct ParticipantEncryptor {
    signal: Arc<dyn SignalRepository>,
    mappings: Arc<LidMappingStore>,
    locks: Arc<KeyedMutex<String>>,
}

impl ParticipantEncryptor {
    pub fn new(
        signal: Arc<dyn SignalRepository>,
        mappings: Arc<LidMappingStore>,
        locks: Arc<KeyedMutex<String>>,
    ) -> Self {
        Self {
            signal,
            mappings,
            locks,
        }
    }

    /// Encrypts `payload` for every device. Own devices get `own_payload`
    /// when one is given; the sending device itself is skipped.
    ///
    /// Users are encrypted concurrently, each under its identity lock.
    /// Devices of one user are encrypted one after another.
    pub async fn encrypt_for_devices(
        &self,
        keys: &dyn KeyStore,
        account: &Account,
        devices: &[Jid],
        payload: &[u8],
        own_payload: Option<&[u8]>,
        extra_attrs: &Attrs,
    ) -> Result<EncryptedFanout, RelayError> {
        let mut by_user: Vec<(String, Vec<&Jid>)> = Vec::new();
        for device in devices {
            let user = device.to_non_ad().to_string();
            match by_user.iter_mut().find(|(u, _)| *u == user) {
                Some((_, list)) => list.push(device),
                None => by_user.push((user, vec![device])),
            }
        }

        let results = join_all(by_user.into_iter().map(|(user, devices)| {
            self.encrypt_user(keys, account, user, devices, payload, own_payload, extra_attrs)
        }))
        .await;

        let mut fanout = EncryptedFanout::default();
        for result in results {
            let (nodes, pkmsg) = result?;
            fanout.nodes.extend(nodes);
            fanout.device_identity_required |= pkmsg;
        }
        Ok(fanout)
    }

    #[allow(clippy::too_many_arguments)]
    async fn encrypt_user(
        &self,
        keys: &dyn KeyStore,
        account: &Account,
        user: String,
        devices: Vec<&Jid>,
        payload: &[u8],
        own_payload: Option<&[u8]>,
        extra_attrs: &Attrs,
    ) -> Result<(Vec<Node>, bool), RelayError> {
        let lock_key = match devices.first() {
            Some(first) => identity_lock_key(&self.mappings, keys, first).await?,
            None => return Ok((Vec::new(), false)),
        };
        let _guard = self.locks.acquire(lock_key).await;

        let mut nodes = Vec::with_capacity(devices.len());
        let mut pkmsg = false;
        for device in devices {
            if account.is_origin_device(device) {
                log::trace!(target: "Relay/Encrypt", "skipping own sending device {device}");
                continue;
            }
            let plaintext = match own_payload {
                Some(own) if account.is_own(device) => own,
                _ => payload,
            };

            let target = self.migrated_target(keys, &user, device).await?;
            let (kind, ciphertext) = self
                .signal
                .encrypt_message(keys, &target.to_protocol_address(), plaintext)
                .await?;
            pkmsg |= kind == CiphertextType::Pkmsg;
            nodes.push(build_participant_node(
                &target,
                build_enc_node(kind, ciphertext, extra_attrs),
            ));
        }
        Ok((nodes, pkmsg))
    }

    /// The LID form of `device` when its session is (or could be) moved
    /// there, else `device` unchanged.
    async fn migrated_target(&self, keys: &dyn KeyStore, user: &str, device: &Jid) -> Result<Jid, RelayError> {
        if !device.is_pn() {
            return Ok(device.clone());
        }
        let Some(lid) = self.mappings.known_lid_for_pn(keys, device).await? else {
            return Ok(device.clone());
        };
        match migrate_sessions(keys, user, &[(device.clone(), lid.clone())]).await {
            Ok(usable) if usable.first().copied().unwrap_or(false) => Ok(lid),
            Ok(_) => Ok(device.clone()),
            Err(e) => {
                log::warn!(target: "Relay/Encrypt", "keeping {device}: {e}");
                Ok(device.clone())
            }
        }
    }
}
