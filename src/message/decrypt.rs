//! Decryption of inbound `message` nodes.
//!
//! Every `enc`/`plaintext` child with a payload is decrypted on its own and
//! the results are merged. A child that fails turns the envelope into a
//! ciphertext stub; the call itself only fails for nodes that cannot be
//! classified at all.

use crate::client::RelayClient;
use crate::encryptor::identity_lock_key;
use crate::error::{DecryptionError, RelayError};
use crate::lid_mapping::MappingPair;
use crate::lid_pn_cache::LearningSource;
use crate::message::rewrite_lid_mentions;
use crate::session::migrate_sessions;
use prost::Message as _;
use wacore::decode::{apply_metadata_children, classify};
use wacore::messages::MessageUtils;
use wacore::proto::whatsapp as wa;
use wacore::signal::sender_key::{self, SenderKeyDistribution, SenderKeyMessage, SenderKeyName};
use wacore::signal::{CiphertextType, SignalError};
use wacore::store::KeyStore;
use wacore::types::jid::JidExt;
use wacore::types::message::{Envelope, MessageKind, MessageStub, NO_MESSAGE_FOUND_ERROR_TEXT};
use wacore_binary::jid::Jid;
use wacore_binary::node::Node;

fn is_decryptable(child: &Node) -> bool {
    matches!(child.tag.as_str(), "enc" | "plaintext") && child.bytes().is_some()
}

impl RelayClient {
    /// Classifies and decrypts an inbound `message` node.
    pub async fn decrypt_message_node(&self, node: &Node) -> Result<Envelope, RelayError> {
        let account = self.require_account()?;
        let classified = classify(node, &account.pn, account.lid.as_ref())?;
        let chat = classified.chat().clone();
        let mut envelope = classified.into_envelope();
        apply_metadata_children(node, &mut envelope);

        let tx = self.keys.begin(&format!("decrypt:{chat}")).await;
        self.learn_sender_mapping(&tx, &envelope).await;

        let children: Vec<&Node> = node
            .children()
            .unwrap_or_default()
            .iter()
            .filter(|c| is_decryptable(c))
            .collect();
        if children.is_empty() {
            envelope.stub = Some(MessageStub::ciphertext(NO_MESSAGE_FOUND_ERROR_TEXT));
        }

        let mut merged: Option<wa::Message> = None;
        for child in children {
            match self.decrypt_child(&tx, &envelope, child).await {
                Ok(message) => match merged.as_mut() {
                    Some(existing) => {
                        if let Err(e) = existing.merge(message.encode_to_vec().as_slice()) {
                            envelope.stub = Some(MessageStub::ciphertext(DecryptionError::from(e).to_string()));
                        }
                    }
                    None => merged = Some(message),
                },
                Err(e) => {
                    log::error!(
                        target: "Relay/Decrypt",
                        "failed to decrypt {} from {}: {e}",
                        envelope.key.id,
                        envelope.author
                    );
                    envelope.stub = Some(MessageStub::ciphertext(e.to_string()));
                }
            }
        }

        if let Some(message) = merged.as_mut()
            && envelope.kind == MessageKind::Group
        {
            rewrite_lid_mentions(&self.mappings, &tx, message).await;
        }
        envelope.message = merged;

        self.commit(tx).await?;
        Ok(envelope)
    }

    async fn decrypt_child(
        &self,
        keys: &dyn KeyStore,
        envelope: &Envelope,
        child: &Node,
    ) -> Result<wa::Message, DecryptionError> {
        let payload = child.bytes().unwrap_or_default();
        let mut message = if child.tag == "plaintext" {
            wa::Message::decode(payload)?
        } else {
            let e2e_type = child.attr("type").unwrap_or_default();
            let kind: CiphertextType = e2e_type
                .parse()
                .map_err(|_| DecryptionError::UnknownE2eType(e2e_type.to_string()))?;
            let plaintext = match kind {
                CiphertextType::Skmsg => self.decrypt_group(keys, envelope, payload).await?,
                CiphertextType::Pkmsg | CiphertextType::Msg => {
                    self.decrypt_pairwise(keys, envelope, kind, payload).await?
                }
            };
            wa::Message::decode(MessageUtils::unpad_message_ref(&plaintext)?)?
        };

        if let Some(inner) = message
            .device_sent_message
            .as_mut()
            .and_then(|sent| sent.message.take())
        {
            message = *inner;
        }

        if let Some(distribution) = message.sender_key_distribution_message.as_ref()
            && let Err(e) = self
                .process_distribution(keys, envelope, distribution)
                .await
        {
            log::warn!(
                target: "Relay/Decrypt",
                "failed to process sender key distribution from {}: {e}",
                envelope.author
            );
        }
        Ok(message)
    }

    async fn decrypt_group(
        &self,
        keys: &dyn KeyStore,
        envelope: &Envelope,
        payload: &[u8],
    ) -> Result<Vec<u8>, SignalError> {
        let name = SenderKeyName::new(
            envelope.sender.to_string(),
            envelope.author.to_protocol_address().to_string(),
        );
        let message = SenderKeyMessage::parse(payload)?;
        let key = sender_key::group_receive_key(keys, &name, &message, self.config.sender_key_limits()).await?;
        self.signal.decrypt_group(&key, &message.ciphertext)
    }

    /// Decrypts under the identity lock of the sender, addressing it by its
    /// LID when one is known.
    async fn decrypt_pairwise(
        &self,
        keys: &dyn KeyStore,
        envelope: &Envelope,
        kind: CiphertextType,
        payload: &[u8],
    ) -> Result<Vec<u8>, SignalError> {
        let sender = pairwise_sender(envelope);
        let lock_key = identity_lock_key(&self.mappings, keys, sender).await?;
        let _guard = self.locks.acquire(lock_key).await;

        let mut address = sender.clone();
        if let Some(lid) = self.mappings.known_lid_for_pn(keys, sender).await? {
            match migrate_sessions(keys, &sender.to_non_ad().to_string(), &[(sender.clone(), lid.clone())]).await {
                Ok(_) => address = lid,
                Err(e) => log::warn!(target: "Relay/Decrypt", "keeping {sender}: {e}"),
            }
        }
        self.signal
            .decrypt_message(keys, &address.to_protocol_address(), kind, payload)
            .await
    }

    async fn process_distribution(
        &self,
        keys: &dyn KeyStore,
        envelope: &Envelope,
        distribution: &wa::SenderKeyDistributionMessage,
    ) -> Result<(), SignalError> {
        let group = distribution
            .group_id
            .clone()
            .unwrap_or_else(|| envelope.key.remote_jid.to_string());
        let raw = distribution
            .axolotl_sender_key_distribution_message
            .as_deref()
            .ok_or_else(|| SignalError::InvalidMessage("distribution without key material".into()))?;
        let name = SenderKeyName::new(group, envelope.author.to_protocol_address().to_string());
        sender_key::process_sender_key_distribution(keys, &name, &SenderKeyDistribution::parse(raw)?).await
    }

    /// Stores the PN/LID pair when the node names the author's other
    /// identity.
    async fn learn_sender_mapping(&self, keys: &dyn KeyStore, envelope: &Envelope) {
        let Some(alt) = envelope.key.participant_alt.as_ref() else {
            return;
        };
        let author = envelope.author.to_non_ad();
        let (pair, source) = if author.is_pn() && alt.is_lid() {
            (MappingPair::new(author, alt.to_non_ad()), LearningSource::PeerPnMessage)
        } else if author.is_lid() && alt.is_pn() {
            (MappingPair::new(alt.to_non_ad(), author), LearningSource::PeerLidMessage)
        } else {
            return;
        };
        if self.mappings.known_lid_for_pn(keys, &pair.pn).await.ok().flatten() == Some(pair.lid.clone()) {
            return;
        }
        if let Err(e) = self.mappings.store_mappings(keys, &[pair], source).await {
            log::warn!(target: "Relay/Decrypt", "failed to store mapping from {}: {e}", envelope.key.id);
        }
    }
}

/// Sender of a pairwise message before LID substitution. Group
/// messages are addressed by their author.
fn pairwise_sender(envelope: &Envelope) -> &Jid {
    if envelope.sender.is_user() {
        &envelope.sender
    } else {
        &envelope.author
    }
}
