//! Collaborators the relay engine consumes but does not implement.

use crate::prekeys::PreKeyBundle;
use crate::signal::sender_key::SenderMessageKey;
use crate::signal::{CiphertextType, SignalError};
use crate::store::KeyStore;
use crate::types::jid::ProtocolAddress;
use async_trait::async_trait;
use wacore_binary::jid::Jid;
use wacore_binary::node::Node;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AddressingMode {
    #[default]
    Pn,
    Lid,
}

impl AddressingMode {
    pub fn parse(s: &str) -> Self {
        match s {
            "lid" => AddressingMode::Lid,
            _ => AddressingMode::Pn,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupInfo {
    pub participants: Vec<Jid>,
    pub addressing_mode: AddressingMode,
}

impl GroupInfo {
    pub fn new(participants: Vec<Jid>, addressing_mode: AddressingMode) -> Self {
        Self {
            participants,
            addressing_mode,
        }
    }
}

/// Moves nodes to and from the server.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send_node(&self, node: Node) -> Result<(), anyhow::Error>;

    /// Sends an `iq` and waits for its response.
    async fn query(&self, node: Node) -> Result<Node, anyhow::Error>;
}

#[async_trait]
pub trait GroupMetadataProvider: Send + Sync {
    async fn group_metadata(&self, group: &Jid) -> Result<GroupInfo, anyhow::Error>;
}

/// Directory lookups between the two identities of a user.
#[async_trait]
pub trait LidDirectory: Send + Sync {
    async fn lid_for_pn(&self, pn: &Jid) -> Result<Option<Jid>, anyhow::Error>;

    async fn pn_for_lid(&self, lid: &Jid) -> Result<Option<Jid>, anyhow::Error>;
}

/// The pairwise double-ratchet primitive and the group cipher.
///
/// Pairwise session state lives in the [`KeyStore`] `Session` category under
/// the protocol address string (`222:1@c.us.0`). The relay engine only tests
/// for presence and moves the bytes between addresses during migration.
#[async_trait]
pub trait SignalRepository: Send + Sync {
    async fn encrypt_message(
        &self,
        keys: &dyn KeyStore,
        address: &ProtocolAddress,
        plaintext: &[u8],
    ) -> Result<(CiphertextType, Vec<u8>), SignalError>;

    async fn decrypt_message(
        &self,
        keys: &dyn KeyStore,
        address: &ProtocolAddress,
        kind: CiphertextType,
        ciphertext: &[u8],
    ) -> Result<Vec<u8>, SignalError>;

    /// Creates an outgoing session from a fetched bundle.
    async fn inject_session(
        &self,
        keys: &dyn KeyStore,
        address: &ProtocolAddress,
        bundle: &PreKeyBundle,
    ) -> Result<(), SignalError>;

    fn encrypt_group(&self, key: &SenderMessageKey, plaintext: &[u8]) -> Result<Vec<u8>, SignalError>;

    fn decrypt_group(&self, key: &SenderMessageKey, ciphertext: &[u8]) -> Result<Vec<u8>, SignalError>;
}
