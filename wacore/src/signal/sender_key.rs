//! Sender-key chain ratchet used for multicast group encryption.
//!
//! Each `(group, sender)` pair owns a forward-only chain. Every step yields a
//! message key and the next chain key; earlier keys cannot be derived from a
//! later chain position. Receivers that get ahead of the chain keep a bounded
//! set of skipped keys so out-of-order messages still decrypt once.

use crate::proto::signal as wire;
use crate::signal::{Result, SignalError};
use crate::store::{KeyCategory, KeyStore, decode_value, encode_value};
use hmac::{Hmac, Mac};
use prost::Message;
use rand::Rng;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::collections::VecDeque;

pub const SENDERKEY_MESSAGE_CURRENT_VERSION: u8 = 3;
pub const MAX_SENDER_KEY_STATES: usize = 5;
const KDF_INFO: &[u8] = b"WhisperGroup";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SenderKeyLimits {
    pub max_forward_jumps: u32,
    pub max_skipped_keys: usize,
}

impl Default for SenderKeyLimits {
    fn default() -> Self {
        Self {
            max_forward_jumps: 2000,
            max_skipped_keys: 2000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SenderMessageKey {
    iteration: u32,
    seed: [u8; 32],
    iv: [u8; 16],
    cipher_key: [u8; 32],
}

impl SenderMessageKey {
    pub fn new(iteration: u32, seed: [u8; 32]) -> Self {
        let mut derived = [0u8; 48];
        hkdf::Hkdf::<Sha256>::new(None, &seed)
            .expand(KDF_INFO, &mut derived)
            .expect("48 bytes is a valid HKDF-SHA256 output length");
        let mut iv = [0u8; 16];
        let mut cipher_key = [0u8; 32];
        iv.copy_from_slice(&derived[..16]);
        cipher_key.copy_from_slice(&derived[16..]);
        Self {
            iteration,
            seed,
            iv,
            cipher_key,
        }
    }

    pub fn iteration(&self) -> u32 {
        self.iteration
    }

    pub fn iv(&self) -> &[u8; 16] {
        &self.iv
    }

    pub fn cipher_key(&self) -> &[u8; 32] {
        &self.cipher_key
    }

    pub fn seed(&self) -> &[u8; 32] {
        &self.seed
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SenderChainKey {
    iteration: u32,
    seed: [u8; 32],
}

impl SenderChainKey {
    const MESSAGE_KEY_SEED: u8 = 0x01;
    const CHAIN_KEY_SEED: u8 = 0x02;

    pub fn new(iteration: u32, seed: [u8; 32]) -> Self {
        Self { iteration, seed }
    }

    pub fn iteration(&self) -> u32 {
        self.iteration
    }

    pub fn seed(&self) -> &[u8; 32] {
        &self.seed
    }

    pub fn next(&self) -> Result<SenderChainKey> {
        let iteration = self
            .iteration
            .checked_add(1)
            .ok_or(SignalError::ChainExhausted)?;
        Ok(SenderChainKey::new(
            iteration,
            self.derivative(Self::CHAIN_KEY_SEED),
        ))
    }

    pub fn message_key(&self) -> SenderMessageKey {
        SenderMessageKey::new(self.iteration, self.derivative(Self::MESSAGE_KEY_SEED))
    }

    fn derivative(&self, label: u8) -> [u8; 32] {
        let mut mac = Hmac::<Sha256>::new_from_slice(&self.seed)
            .expect("HMAC-SHA256 should accept any size key");
        mac.update(&[label]);
        mac.finalize().into_bytes().into()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SenderKeyState {
    key_id: u32,
    chain_key: SenderChainKey,
    skipped: VecDeque<SenderMessageKey>,
}

impl SenderKeyState {
    pub fn new(key_id: u32, chain_key: SenderChainKey) -> Self {
        Self {
            key_id,
            chain_key,
            skipped: VecDeque::new(),
        }
    }

    pub fn key_id(&self) -> u32 {
        self.key_id
    }

    pub fn chain_key(&self) -> &SenderChainKey {
        &self.chain_key
    }

    /// Key for the current chain position, advancing the chain past it.
    pub fn next_message_key(&mut self) -> Result<SenderMessageKey> {
        let key = self.chain_key.message_key();
        self.chain_key = self.chain_key.next()?;
        Ok(key)
    }

    /// Key for an incoming message at `iteration`.
    pub fn message_key_for(
        &mut self,
        iteration: u32,
        limits: SenderKeyLimits,
    ) -> Result<SenderMessageKey> {
        let current = self.chain_key.iteration();

        if current > iteration {
            if let Some(pos) = self.skipped.iter().position(|k| k.iteration == iteration) {
                if let Some(key) = self.skipped.remove(pos) {
                    return Ok(key);
                }
            }
            log::debug!("SenderKey duplicate message for iteration {iteration}");
            return Err(SignalError::DuplicatedMessage {
                current,
                received: iteration,
            });
        }

        if iteration - current > limits.max_forward_jumps {
            return Err(SignalError::TooFarInFuture {
                current,
                received: iteration,
            });
        }

        while self.chain_key.iteration() < iteration {
            let key = self.next_message_key()?;
            self.skipped.push_back(key);
            if self.skipped.len() > limits.max_skipped_keys {
                self.skipped.pop_front();
            }
        }

        self.next_message_key()
    }
}

/// All known chains for one `(group, sender)` pair, newest first.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SenderKeyRecord {
    states: VecDeque<SenderKeyState>,
}

impl SenderKeyRecord {
    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    pub fn current_state_mut(&mut self) -> Option<&mut SenderKeyState> {
        self.states.front_mut()
    }

    pub fn state_for_key_id(&mut self, key_id: u32) -> Option<&mut SenderKeyState> {
        self.states.iter_mut().find(|s| s.key_id == key_id)
    }

    pub fn add_state(&mut self, state: SenderKeyState) {
        self.states.retain(|s| s.key_id != state.key_id);
        self.states.push_front(state);
        self.states.truncate(MAX_SENDER_KEY_STATES);
    }

    pub fn key_ids(&self) -> Vec<u32> {
        self.states.iter().map(|s| s.key_id).collect()
    }
}

/// Storage identity of a sender-key record.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SenderKeyName {
    group: String,
    sender: String,
}

impl SenderKeyName {
    /// `sender` is the author's protocol address string.
    pub fn new(group: impl Into<String>, sender: impl Into<String>) -> Self {
        Self {
            group: group.into(),
            sender: sender.into(),
        }
    }

    pub fn group(&self) -> &str {
        &self.group
    }

    pub fn sender(&self) -> &str {
        &self.sender
    }

    pub fn store_id(&self) -> String {
        format!("{}::{}", self.group, self.sender)
    }
}

fn check_version(data: &[u8]) -> Result<&[u8]> {
    let (&version, body) = data
        .split_first()
        .ok_or_else(|| SignalError::InvalidMessage("empty sender key payload".into()))?;
    if version >> 4 != SENDERKEY_MESSAGE_CURRENT_VERSION {
        return Err(SignalError::UnrecognizedVersion(version >> 4));
    }
    Ok(body)
}

fn version_byte() -> u8 {
    (SENDERKEY_MESSAGE_CURRENT_VERSION << 4) | SENDERKEY_MESSAGE_CURRENT_VERSION
}

fn seed_from(bytes: Option<Vec<u8>>) -> Result<[u8; 32]> {
    bytes
        .unwrap_or_default()
        .try_into()
        .map_err(|v: Vec<u8>| {
            SignalError::InvalidMessage(format!("chain key must be 32 bytes, got {}", v.len()))
        })
}

/// Hands the current chain position of a sender to a recipient device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SenderKeyDistribution {
    pub key_id: u32,
    pub iteration: u32,
    pub chain_key: [u8; 32],
}

impl SenderKeyDistribution {
    pub fn serialize(&self) -> Vec<u8> {
        let body = wire::SenderKeyDistributionMessage {
            id: Some(self.key_id),
            iteration: Some(self.iteration),
            chain_key: Some(self.chain_key.to_vec()),
            signing_key: None,
        };
        let mut out = vec![version_byte()];
        out.extend(body.encode_to_vec());
        out
    }

    pub fn parse(data: &[u8]) -> Result<Self> {
        let body = wire::SenderKeyDistributionMessage::decode(check_version(data)?)?;
        Ok(Self {
            key_id: body
                .id
                .ok_or_else(|| SignalError::InvalidMessage("distribution without id".into()))?,
            iteration: body.iteration.unwrap_or_default(),
            chain_key: seed_from(body.chain_key)?,
        })
    }
}

/// Group ciphertext as carried in an `skmsg` node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SenderKeyMessage {
    pub key_id: u32,
    pub iteration: u32,
    pub ciphertext: Vec<u8>,
}

impl SenderKeyMessage {
    pub fn serialize(&self) -> Vec<u8> {
        let body = wire::SenderKeyMessage {
            id: Some(self.key_id),
            iteration: Some(self.iteration),
            ciphertext: Some(self.ciphertext.clone()),
        };
        let mut out = vec![version_byte()];
        out.extend(body.encode_to_vec());
        out
    }

    pub fn parse(data: &[u8]) -> Result<Self> {
        let body = wire::SenderKeyMessage::decode(check_version(data)?)?;
        Ok(Self {
            key_id: body
                .id
                .ok_or_else(|| SignalError::InvalidMessage("sender key message without id".into()))?,
            iteration: body.iteration.unwrap_or_default(),
            ciphertext: body.ciphertext.unwrap_or_default(),
        })
    }
}

pub async fn load_sender_key(
    keys: &dyn KeyStore,
    name: &SenderKeyName,
) -> Result<Option<SenderKeyRecord>> {
    match keys.get_one(KeyCategory::SenderKey, &name.store_id()).await? {
        Some(data) => Ok(Some(decode_value(&data)?)),
        None => Ok(None),
    }
}

pub async fn store_sender_key(
    keys: &dyn KeyStore,
    name: &SenderKeyName,
    record: &SenderKeyRecord,
) -> Result<()> {
    keys.put_one(KeyCategory::SenderKey, &name.store_id(), encode_value(record)?)
        .await?;
    Ok(())
}

/// Drops every chain of `name`, so the next send starts a fresh one.
pub async fn forget_sender_key(keys: &dyn KeyStore, name: &SenderKeyName) -> Result<()> {
    keys.delete_one(KeyCategory::SenderKey, &name.store_id())
        .await?;
    Ok(())
}

/// Output of one outgoing group step.
#[derive(Debug, Clone)]
pub struct GroupSendKey {
    pub message_key: SenderMessageKey,
    pub key_id: u32,
    /// Chain position before this step, for devices that lack the chain.
    pub distribution: SenderKeyDistribution,
    /// A new chain was created; previous distributions are void.
    pub fresh_chain: bool,
}

pub async fn next_group_send_key(keys: &dyn KeyStore, name: &SenderKeyName) -> Result<GroupSendKey> {
    let mut record = load_sender_key(keys, name).await?.unwrap_or_default();
    let fresh_chain = record.is_empty();
    if fresh_chain {
        let mut rng = rand::rng();
        // 31-bit ids, as other libsignal implementations expect
        let key_id = rng.random::<u32>() >> 1;
        let seed: [u8; 32] = rng.random();
        log::info!(
            "Creating SenderKey chain {key_id} for group {} sender {}",
            name.group(),
            name.sender()
        );
        record.add_state(SenderKeyState::new(key_id, SenderChainKey::new(0, seed)));
    }

    let state = record
        .current_state_mut()
        .ok_or_else(|| SignalError::NoSenderKeyState {
            group: name.group().to_string(),
            sender: name.sender().to_string(),
        })?;
    let distribution = SenderKeyDistribution {
        key_id: state.key_id(),
        iteration: state.chain_key().iteration(),
        chain_key: *state.chain_key().seed(),
    };
    let key_id = state.key_id();
    let message_key = state.next_message_key()?;

    store_sender_key(keys, name, &record).await?;
    Ok(GroupSendKey {
        message_key,
        key_id,
        distribution,
        fresh_chain,
    })
}

pub async fn process_sender_key_distribution(
    keys: &dyn KeyStore,
    name: &SenderKeyName,
    distribution: &SenderKeyDistribution,
) -> Result<()> {
    log::info!(
        "Processing SenderKey distribution for group {} from sender {} with chain ID {}",
        name.group(),
        name.sender(),
        distribution.key_id
    );
    let mut record = load_sender_key(keys, name).await?.unwrap_or_default();
    record.add_state(SenderKeyState::new(
        distribution.key_id,
        SenderChainKey::new(distribution.iteration, distribution.chain_key),
    ));
    store_sender_key(keys, name, &record).await
}

pub async fn group_receive_key(
    keys: &dyn KeyStore,
    name: &SenderKeyName,
    message: &SenderKeyMessage,
    limits: SenderKeyLimits,
) -> Result<SenderMessageKey> {
    let missing = || SignalError::NoSenderKeyState {
        group: name.group().to_string(),
        sender: name.sender().to_string(),
    };
    let mut record = load_sender_key(keys, name).await?.ok_or_else(missing)?;
    let state = match record.state_for_key_id(message.key_id) {
        Some(state) => state,
        None => {
            log::error!(
                "SenderKey could not find chain ID {} (known chain IDs: {:?})",
                message.key_id,
                record.key_ids()
            );
            return Err(missing());
        }
    };
    let key = state.message_key_for(message.iteration, limits)?;
    store_sender_key(keys, name, &record).await?;
    Ok(key)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::KeyUpdates;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::Mutex;

    #[derive(Default)]
    struct MapStore(Mutex<HashMap<(KeyCategory, String), Vec<u8>>>);

    #[async_trait]
    impl KeyStore for MapStore {
        async fn get(
            &self,
            category: KeyCategory,
            ids: &[String],
        ) -> crate::store::Result<HashMap<String, Vec<u8>>> {
            let map = self.0.lock().unwrap();
            Ok(ids
                .iter()
                .filter_map(|id| map.get(&(category, id.clone())).map(|v| (id.clone(), v.clone())))
                .collect())
        }

        async fn set(&self, updates: KeyUpdates) -> crate::store::Result<()> {
            let mut map = self.0.lock().unwrap();
            for (category, id, value) in updates {
                match value {
                    Some(v) => map.insert((category, id), v),
                    None => map.remove(&(category, id)),
                };
            }
            Ok(())
        }
    }

    fn chain() -> SenderChainKey {
        SenderChainKey::new(0, [7u8; 32])
    }

    #[test]
    fn advance_is_deterministic_and_forward_secret() {
        let s = chain();
        let a = s.next().unwrap();
        let b = s.next().unwrap();
        assert_eq!(a, b);
        assert_eq!(a.iteration(), 1);
        assert_ne!(a.message_key().seed(), s.message_key().seed());
        assert_ne!(a.seed(), s.seed());
    }

    #[test]
    fn message_key_splits_iv_and_cipher_key() {
        let key = chain().message_key();
        assert_eq!(key.iteration(), 0);
        assert_ne!(&key.cipher_key()[..16], key.iv());
    }

    #[test]
    fn iteration_overflow_is_an_error() {
        let s = SenderChainKey::new(u32::MAX, [1u8; 32]);
        assert!(matches!(s.next(), Err(SignalError::ChainExhausted)));
    }

    #[test]
    fn receiver_catches_up_and_serves_skipped_keys_once() {
        let mut sender = SenderKeyState::new(9, chain());
        let keys: Vec<_> = (0..4).map(|_| sender.next_message_key().unwrap()).collect();

        let mut receiver = SenderKeyState::new(9, chain());
        let limits = SenderKeyLimits::default();
        assert_eq!(receiver.message_key_for(3, limits).unwrap(), keys[3]);
        assert_eq!(receiver.message_key_for(1, limits).unwrap(), keys[1]);
        assert!(matches!(
            receiver.message_key_for(1, limits),
            Err(SignalError::DuplicatedMessage { .. })
        ));
    }

    #[test]
    fn receiver_rejects_large_jumps() {
        let mut receiver = SenderKeyState::new(1, chain());
        let limits = SenderKeyLimits {
            max_forward_jumps: 10,
            max_skipped_keys: 10,
        };
        assert!(matches!(
            receiver.message_key_for(11, limits),
            Err(SignalError::TooFarInFuture { .. })
        ));
        assert!(receiver.message_key_for(10, limits).is_ok());
    }

    #[test]
    fn record_keeps_newest_states() {
        let mut record = SenderKeyRecord::default();
        for id in 0..7 {
            record.add_state(SenderKeyState::new(id, chain()));
        }
        assert_eq!(record.key_ids(), vec![6, 5, 4, 3, 2]);
        record.add_state(SenderKeyState::new(3, chain()));
        assert_eq!(record.key_ids(), vec![3, 6, 5, 4, 2]);
    }

    #[test]
    fn wire_messages_carry_version() {
        let msg = SenderKeyMessage {
            key_id: 5,
            iteration: 2,
            ciphertext: vec![1, 2, 3],
        };
        let bytes = msg.serialize();
        assert_eq!(bytes[0], 0x33);
        assert_eq!(SenderKeyMessage::parse(&bytes).unwrap(), msg);

        let mut bad = bytes.clone();
        bad[0] = 0x22;
        assert!(matches!(
            SenderKeyMessage::parse(&bad),
            Err(SignalError::UnrecognizedVersion(2))
        ));
    }

    #[test]
    fn distribution_requires_full_chain_key() {
        let body = wire::SenderKeyDistributionMessage {
            id: Some(1),
            iteration: Some(0),
            chain_key: Some(vec![0; 16]),
            signing_key: None,
        };
        let mut bytes = vec![0x33];
        bytes.extend(body.encode_to_vec());
        assert!(SenderKeyDistribution::parse(&bytes).is_err());
    }

    #[tokio::test]
    async fn sender_and_receiver_derive_the_same_keys() {
        let sender_store = MapStore::default();
        let receiver_store = MapStore::default();
        let name = SenderKeyName::new("g1@g.us", "111:3@c.us.0");

        let first = next_group_send_key(&sender_store, &name).await.unwrap();
        assert!(first.fresh_chain);
        assert_eq!(first.message_key.iteration(), 0);
        let second = next_group_send_key(&sender_store, &name).await.unwrap();
        assert!(!second.fresh_chain);
        assert_eq!(second.key_id, first.key_id);
        assert_eq!(second.distribution.iteration, 1);

        let wire = SenderKeyDistribution::parse(&first.distribution.serialize()).unwrap();
        process_sender_key_distribution(&receiver_store, &name, &wire)
            .await
            .unwrap();

        let msg = SenderKeyMessage {
            key_id: second.key_id,
            iteration: second.message_key.iteration(),
            ciphertext: Vec::new(),
        };
        let key = group_receive_key(&receiver_store, &name, &msg, SenderKeyLimits::default())
            .await
            .unwrap();
        assert_eq!(key, second.message_key);

        let stale = SenderKeyMessage { iteration: 0, ..msg.clone() };
        let key = group_receive_key(&receiver_store, &name, &stale, SenderKeyLimits::default())
            .await
            .unwrap();
        assert_eq!(key, first.message_key);
    }

    #[tokio::test]
    async fn receiving_without_distribution_fails() {
        let store = MapStore::default();
        let name = SenderKeyName::new("g1@g.us", "222@c.us.0");
        let msg = SenderKeyMessage {
            key_id: 1,
            iteration: 0,
            ciphertext: Vec::new(),
        };
        assert!(matches!(
            group_receive_key(&store, &name, &msg, SenderKeyLimits::default()).await,
            Err(SignalError::NoSenderKeyState { .. })
        ));

        next_group_send_key(&store, &name).await.unwrap();
        forget_sender_key(&store, &name).await.unwrap();
        assert!(load_sender_key(&store, &name).await.unwrap().is_none());
    }
}
