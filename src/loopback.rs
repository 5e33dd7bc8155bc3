//! In-process stand-ins for the collaborators of [`RelayClient`]: a server
//! that answers device and pre-key queries, static group and LID
//! directories, and a toy ratchet.
//!
//! The ratchet keeps the session bookkeeping the relay engine relies on
//! (presence, pre-key first message) but encrypts every pairwise message
//! under one fixed key. It is not a security primitive.
//!
//! [`RelayClient`]: crate::client::RelayClient

use aes::Aes256;
use aes_gcm::Aes256Gcm;
use aes_gcm::aead::{Aead, KeyInit};
use anyhow::anyhow;
use async_trait::async_trait;
use cipher::block_padding::Pkcs7;
use cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use rand::Rng;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use wacore::client::context::{GroupInfo, GroupMetadataProvider, LidDirectory, SignalRepository, Transport};
use wacore::prekeys::PreKeyBundle;
use wacore::signal::sender_key::SenderMessageKey;
use wacore::signal::{CiphertextType, SignalError};
use wacore::store::{KeyCategory, KeyStore, decode_value, encode_value};
use wacore::types::jid::ProtocolAddress;
use wacore_binary::builder::NodeBuilder;
use wacore_binary::jid::{Jid, SERVER_JID};
use wacore_binary::node::Node;

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|p| p.into_inner())
}

#[derive(Default)]
struct ServerState {
    devices: HashMap<String, Vec<u16>>,
    lids: HashMap<String, Jid>,
    withheld: HashSet<String>,
    tampered: HashSet<String>,
    sent: Vec<Node>,
    queries: Vec<Node>,
    requested_keys: Vec<Jid>,
}

/// Answers usync and pre-key queries from registered device lists and
/// records everything it is sent.
#[derive(Default)]
pub struct LoopbackServer {
    state: Mutex<ServerState>,
    fail: AtomicBool,
    usync_queries: AtomicUsize,
    key_fetches: AtomicUsize,
}

impl LoopbackServer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers the device list of `user`. Companion devices get a key
    /// index so they survive device filtering.
    pub fn add_devices(&self, user: &Jid, devices: &[u16]) {
        lock(&self.state)
            .devices
            .insert(user.to_non_ad().to_string(), devices.to_vec());
    }

    /// Makes usync answers for `pn` carry `lid`.
    pub fn map_lid(&self, pn: &Jid, lid: &Jid) {
        lock(&self.state)
            .lids
            .insert(pn.to_non_ad().to_string(), lid.to_non_ad());
    }

    /// Answers pre-key requests for `device` with an error.
    pub fn withhold_bundle(&self, device: &Jid) {
        lock(&self.state).withheld.insert(device.to_string());
    }

    /// Serves a bundle for `device` whose signed pre-key signature is zeroed.
    pub fn tamper_bundle(&self, device: &Jid) {
        lock(&self.state).tampered.insert(device.to_string());
    }

    pub fn fail_queries(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub fn usync_count(&self) -> usize {
        self.usync_queries.load(Ordering::SeqCst)
    }

    pub fn key_fetch_count(&self) -> usize {
        self.key_fetches.load(Ordering::SeqCst)
    }

    pub fn sent_nodes(&self) -> Vec<Node> {
        lock(&self.state).sent.clone()
    }

    pub fn queries(&self) -> Vec<Node> {
        lock(&self.state).queries.clone()
    }

    /// Every device a pre-key bundle was asked for, in request order.
    pub fn requested_key_jids(&self) -> Vec<Jid> {
        lock(&self.state).requested_keys.clone()
    }

    fn usync_response(&self, query: &Node) -> Node {
        let state = lock(&self.state);
        let users = query
            .get_optional_child_by_tag(&["usync", "list"])
            .map(|list| {
                list.get_children_by_tag("user")
                    .filter_map(|user| user.attr("jid"))
                    .map(|jid| usync_user(&state, jid))
                    .collect::<Vec<_>>()
            })
            .unwrap_or_default();

        result_iq(
            NodeBuilder::new("usync")
                .child(NodeBuilder::new("list").children(users).build())
                .build(),
        )
    }

    fn prekey_response(&self, query: &Node) -> Node {
        let mut state = lock(&self.state);
        let requested: Vec<Jid> = query
            .get_optional_child("key")
            .map(|key| {
                key.get_children_by_tag("user")
                    .filter_map(|user| user.attr("jid")?.parse().ok())
                    .collect()
            })
            .unwrap_or_default();

        let users: Vec<Node> = requested
            .iter()
            .map(|jid| {
                if state.withheld.contains(&jid.to_string()) {
                    NodeBuilder::new("user")
                        .jid_attr("jid", jid)
                        .child(NodeBuilder::new("error").attr("code", "406").build())
                        .build()
                } else {
                    bundle_node(jid, state.tampered.contains(&jid.to_string()))
                }
            })
            .collect();
        state.requested_keys.extend(requested);

        result_iq(NodeBuilder::new("list").children(users).build())
    }
}

fn result_iq(child: Node) -> Node {
    NodeBuilder::new("iq")
        .attr("type", "result")
        .attr("from", SERVER_JID)
        .child(child)
        .build()
}

fn usync_user(state: &ServerState, jid: &str) -> Node {
    let devices = state
        .devices
        .get(jid)
        .map(|ids| {
            ids.iter()
                .map(|&id| {
                    NodeBuilder::new("device")
                        .attr("id", id.to_string())
                        .optional_attr("key-index", (id != 0).then_some("1"))
                        .build()
                })
                .collect::<Vec<_>>()
        })
        .unwrap_or_default();

    let mut children = vec![
        NodeBuilder::new("devices")
            .child(
                NodeBuilder::new("device-list")
                    .attr("hash", format!("2:{}", devices.len()))
                    .children(devices)
                    .build(),
            )
            .build(),
    ];
    if let Some(lid) = state.lids.get(jid) {
        children.push(NodeBuilder::new("lid").jid_attr("val", lid).build());
    }
    NodeBuilder::new("user").attr("jid", jid).children(children).build()
}

fn bundle_node(jid: &Jid, tampered: bool) -> Node {
    let seed = jid.device() as u8;
    let signature = if tampered { [0; 64] } else { [seed.wrapping_add(2); 64] };
    NodeBuilder::new("user")
        .jid_attr("jid", jid)
        .children([
            NodeBuilder::new("registration")
                .bytes(u32::from(jid.device()).to_be_bytes())
                .build(),
            NodeBuilder::new("identity").bytes([seed; 32]).build(),
            NodeBuilder::new("skey")
                .children([
                    NodeBuilder::new("id").bytes([0, 0, 1]).build(),
                    NodeBuilder::new("value").bytes([seed.wrapping_add(1); 32]).build(),
                    NodeBuilder::new("signature").bytes(signature).build(),
                ])
                .build(),
            NodeBuilder::new("key")
                .children([
                    NodeBuilder::new("id").bytes([0, 0, 7]).build(),
                    NodeBuilder::new("value").bytes([seed.wrapping_add(3); 32]).build(),
                ])
                .build(),
        ])
        .build()
}

#[async_trait]
impl Transport for LoopbackServer {
    async fn send_node(&self, node: Node) -> Result<(), anyhow::Error> {
        log::debug!(target: "Loopback", "<-- {}", node.tag);
        lock(&self.state).sent.push(node);
        Ok(())
    }

    async fn query(&self, node: Node) -> Result<Node, anyhow::Error> {
        lock(&self.state).queries.push(node.clone());
        if self.fail.load(Ordering::SeqCst) {
            return Err(anyhow!("server refused the query"));
        }
        if node.get_optional_child("usync").is_some() {
            self.usync_queries.fetch_add(1, Ordering::SeqCst);
            Ok(self.usync_response(&node))
        } else if node.get_optional_child("key").is_some() {
            self.key_fetches.fetch_add(1, Ordering::SeqCst);
            Ok(self.prekey_response(&node))
        } else {
            Err(anyhow!("unsupported query <{}>", node.tag))
        }
    }
}

/// Fixed group metadata.
#[derive(Default)]
pub struct StaticGroups {
    groups: Mutex<HashMap<Jid, GroupInfo>>,
    fetches: AtomicUsize,
}

impl StaticGroups {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, group: &Jid, info: GroupInfo) {
        lock(&self.groups).insert(group.clone(), info);
    }

    pub fn fetches(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl GroupMetadataProvider for StaticGroups {
    async fn group_metadata(&self, group: &Jid) -> Result<GroupInfo, anyhow::Error> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        lock(&self.groups)
            .get(group)
            .cloned()
            .ok_or_else(|| anyhow!("unknown group {group}"))
    }
}

/// LID directory over a fixed set of pairs.
#[derive(Default)]
pub struct StaticLidDirectory {
    pairs: Mutex<Vec<(Jid, Jid)>>,
    lookups: AtomicUsize,
}

impl StaticLidDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, pn: Jid, lid: Jid) {
        lock(&self.pairs).push((pn.to_non_ad(), lid.to_non_ad()));
    }

    pub fn lookups(&self) -> usize {
        self.lookups.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LidDirectory for StaticLidDirectory {
    async fn lid_for_pn(&self, pn: &Jid) -> Result<Option<Jid>, anyhow::Error> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        let pn = pn.to_non_ad();
        Ok(lock(&self.pairs)
            .iter()
            .find(|(p, _)| *p == pn)
            .map(|(_, lid)| lid.clone()))
    }

    async fn pn_for_lid(&self, lid: &Jid) -> Result<Option<Jid>, anyhow::Error> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        let lid = lid.to_non_ad();
        Ok(lock(&self.pairs)
            .iter()
            .find(|(_, l)| *l == lid)
            .map(|(pn, _)| pn.clone()))
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct LoopbackSession {
    pending_prekey: bool,
    messages: u64,
}

const NONCE_LEN: usize = 12;
const PAIRWISE_INFO: &[u8] = b"whatsapp-relay loopback pairwise";

type GroupEncryptor = cbc::Encryptor<Aes256>;
type GroupDecryptor = cbc::Decryptor<Aes256>;

pub struct LoopbackRatchet {
    key: [u8; 32],
}

impl Default for LoopbackRatchet {
    fn default() -> Self {
        Self::new()
    }
}

impl LoopbackRatchet {
    pub fn new() -> Self {
        let mut key = [0u8; 32];
        hkdf::Hkdf::<Sha256>::new(None, b"loopback")
            .expand(PAIRWISE_INFO, &mut key)
            .expect("32 bytes is a valid HKDF-SHA256 output length");
        Self { key }
    }

    /// A stored session. With `pending_prekey` the next message to the
    /// address is a `pkmsg`.
    pub fn session_record(pending_prekey: bool) -> Vec<u8> {
        encode_value(&LoopbackSession {
            pending_prekey,
            messages: 0,
        })
        .unwrap_or_default()
    }

    /// Encrypts a pairwise payload without touching any session.
    pub fn seal(&self, plaintext: &[u8]) -> Result<Vec<u8>, SignalError> {
        let mut nonce = [0u8; NONCE_LEN];
        rand::rng().fill(&mut nonce);
        let sealed = self
            .cipher()?
            .encrypt(aes_gcm::Nonce::from_slice(&nonce), plaintext)
            .map_err(|_| SignalError::Cipher("seal failed".into()))?;
        Ok([nonce.as_slice(), &sealed].concat())
    }

    /// Decrypts a payload produced by [`seal`](Self::seal) or by
    /// [`encrypt_message`](SignalRepository::encrypt_message).
    pub fn open(&self, ciphertext: &[u8]) -> Result<Vec<u8>, SignalError> {
        if ciphertext.len() < NONCE_LEN {
            return Err(SignalError::InvalidMessage("ciphertext too short".into()));
        }
        let (nonce, sealed) = ciphertext.split_at(NONCE_LEN);
        self.cipher()?
            .decrypt(aes_gcm::Nonce::from_slice(nonce), sealed)
            .map_err(|_| SignalError::Cipher("open failed".into()))
    }

    fn cipher(&self) -> Result<Aes256Gcm, SignalError> {
        Aes256Gcm::new_from_slice(&self.key).map_err(|e| SignalError::Cipher(e.to_string()))
    }

    async fn load(keys: &dyn KeyStore, address: &ProtocolAddress) -> Result<Option<LoopbackSession>, SignalError> {
        match keys.get_one(KeyCategory::Session, &address.to_string()).await? {
            Some(raw) => Ok(Some(decode_value(&raw)?)),
            None => Ok(None),
        }
    }

    async fn store(keys: &dyn KeyStore, address: &ProtocolAddress, session: &LoopbackSession) -> Result<(), SignalError> {
        keys.put_one(KeyCategory::Session, &address.to_string(), encode_value(session)?)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl SignalRepository for LoopbackRatchet {
    async fn encrypt_message(
        &self,
        keys: &dyn KeyStore,
        address: &ProtocolAddress,
        plaintext: &[u8],
    ) -> Result<(CiphertextType, Vec<u8>), SignalError> {
        let mut session = Self::load(keys, address)
            .await?
            .ok_or_else(|| SignalError::NoSession(address.to_string()))?;
        let kind = if session.pending_prekey {
            CiphertextType::Pkmsg
        } else {
            CiphertextType::Msg
        };
        session.pending_prekey = false;
        session.messages += 1;
        Self::store(keys, address, &session).await?;
        Ok((kind, self.seal(plaintext)?))
    }

    async fn decrypt_message(
        &self,
        keys: &dyn KeyStore,
        address: &ProtocolAddress,
        kind: CiphertextType,
        ciphertext: &[u8],
    ) -> Result<Vec<u8>, SignalError> {
        let session = match kind {
            CiphertextType::Pkmsg => LoopbackSession {
                pending_prekey: false,
                messages: 1,
            },
            CiphertextType::Msg => {
                let mut session = Self::load(keys, address)
                    .await?
                    .ok_or_else(|| SignalError::NoSession(address.to_string()))?;
                session.messages += 1;
                session
            }
            CiphertextType::Skmsg => {
                return Err(SignalError::InvalidMessage("skmsg is not a pairwise message".into()));
            }
        };
        let plaintext = self.open(ciphertext)?;
        Self::store(keys, address, &session).await?;
        Ok(plaintext)
    }

    async fn inject_session(
        &self,
        keys: &dyn KeyStore,
        address: &ProtocolAddress,
        bundle: &PreKeyBundle,
    ) -> Result<(), SignalError> {
        log::trace!(
            target: "Loopback",
            "session with {address} from bundle {}",
            bundle.registration_id
        );
        if bundle.signed_pre_key_signature.iter().all(|&b| b == 0) {
            return Err(SignalError::InvalidMessage(format!(
                "invalid signed pre-key signature from {address}"
            )));
        }
        Self::store(
            keys,
            address,
            &LoopbackSession {
                pending_prekey: true,
                messages: 0,
            },
        )
        .await
    }

    fn encrypt_group(&self, key: &SenderMessageKey, plaintext: &[u8]) -> Result<Vec<u8>, SignalError> {
        let enc = GroupEncryptor::new_from_slices(key.cipher_key(), key.iv())
            .map_err(|e| SignalError::Cipher(e.to_string()))?;
        Ok(enc.encrypt_padded_vec_mut::<Pkcs7>(plaintext))
    }

    fn decrypt_group(&self, key: &SenderMessageKey, ciphertext: &[u8]) -> Result<Vec<u8>, SignalError> {
        let dec = GroupDecryptor::new_from_slices(key.cipher_key(), key.iv())
            .map_err(|e| SignalError::Cipher(e.to_string()))?;
        dec.decrypt_padded_vec_mut::<Pkcs7>(ciphertext)
            .map_err(|_| SignalError::Cipher("group message padding".into()))
    }
}
