use crate::client::{Account, RelayClient};
use crate::error::RelayError;
use crate::store::KeyTransaction;
use prost::Message as _;
use std::collections::{BTreeMap, HashSet};
use wacore::client::context::{AddressingMode, GroupInfo};
use wacore::messages::MessageUtils;
use wacore::payload;
use wacore::proto::whatsapp as wa;
use wacore::proto::whatsapp::protocol_message::Type as ProtocolType;
use wacore::send::{
    StanzaAddress, build_enc_node, build_participants_node, build_plaintext_node, build_stanza_attrs,
    sender_key_distribution_payload, wrap_device_sent,
};
use wacore::signal::CiphertextType;
use wacore::signal::sender_key::{self, SenderKeyMessage, SenderKeyName};
use wacore::stanza::{DecoratorContext, decorate};
use wacore::store::{KeyCategory, KeyStore, decode_value, encode_value};
use wacore::types::jid::JidExt;
use wacore_binary::jid::{Jid, MessageId};
use wacore_binary::node::{Attrs, Node, NodeContent};

/// Per-device "already holds our current sender key" flags of one group.
type SenderKeyMemory = BTreeMap<String, bool>;

#[derive(Debug, Clone)]
pub struct RelayOptions {
    pub message_id: Option<MessageId>,
    /// Send to this one device only.
    pub participant: Option<Jid>,
    pub additional_attributes: Attrs,
    pub additional_nodes: Vec<Node>,
    pub use_user_devices_cache: bool,
    pub use_cached_group_metadata: bool,
    /// Recipients of a status broadcast.
    pub status_jid_list: Vec<Jid>,
}

impl Default for RelayOptions {
    fn default() -> Self {
        Self {
            message_id: None,
            participant: None,
            additional_attributes: Attrs::new(),
            additional_nodes: Vec::new(),
            use_user_devices_cache: true,
            use_cached_group_metadata: true,
            status_jid_list: Vec::new(),
        }
    }
}

impl RelayOptions {
    fn is_peer(&self) -> bool {
        self.additional_attributes
            .get("category")
            .is_some_and(|c| c == "peer")
    }
}

/// Encrypted children of the stanza and whether a pre-key message is
/// among them.
struct Content {
    nodes: Vec<Node>,
    device_identity_required: bool,
}

impl RelayClient {
    /// Encrypts `message` for every device behind `to` and sends the
    /// stanza. Key-store changes are committed only once the transport
    /// accepted it.
    pub async fn relay_message(
        &self,
        to: &Jid,
        message: &wa::Message,
        options: RelayOptions,
    ) -> Result<MessageId, RelayError> {
        let account = self.require_account()?;
        let mut message_id = options
            .message_id
            .clone()
            .unwrap_or_else(|| MessageUtils::generate_message_id(Some(&account.pn)));

        let mut enc_attrs = Attrs::new();
        if let Some(media) = payload::media_type(message) {
            enc_attrs.insert("mediatype".into(), media.as_str().into());
        }
        if payload::is_pin(message) {
            enc_attrs.insert("decrypt-fail".into(), "hide".into());
        }

        let mut additional = options.additional_attributes.clone();
        if options.participant.is_some() && !to.is_group() && !to.is_status_broadcast() {
            additional.insert("device_fanout".into(), "false".into());
        }

        let tx = self.keys.begin(&to.to_string()).await;
        let mut sent_message = message.clone();
        let (content, stanza_type) = if to.is_group() || to.is_status_broadcast() {
            let content = self
                .group_content(&tx, account, to, message, &options, &enc_attrs)
                .await?;
            (content, "text")
        } else if to.is_newsletter() {
            let (id, content, retargeted) = newsletter_content(message, &enc_attrs);
            if let Some(id) = id {
                message_id = id;
            }
            sent_message = retargeted;
            (content, payload::newsletter_stanza_type(&sent_message))
        } else {
            let content = self
                .direct_content(&tx, account, to, message, &options, &enc_attrs)
                .await?;
            (content, "text")
        };

        let mut children = content.nodes;
        let device_identity = content
            .device_identity_required
            .then_some(account.device_identity.as_slice());
        if device_identity.is_some() {
            log::debug!(target: "Relay/Send", "adding device identity for {to}");
        }
        children.extend(decorate(&DecoratorContext {
            destination: to,
            message: &sent_message,
            device_identity,
            additional_nodes: &options.additional_nodes,
        }));

        let me = account.address_for(if to.is_lid() { AddressingMode::Lid } else { AddressingMode::Pn });
        let attrs = build_stanza_attrs(
            &message_id,
            stanza_type,
            &additional,
            &StanzaAddress {
                destination: to,
                participant: options.participant.as_ref(),
                me,
            },
        );
        let stanza = Node::new("message", attrs, Some(NodeContent::Nodes(children)));

        log::debug!(target: "Relay/Send", "sending {message_id} to {to}");
        self.transport
            .send_node(stanza)
            .await
            .map_err(RelayError::Transport)?;
        self.commit(tx).await?;

        if let Some(recent) = &self.recent_messages {
            recent
                .insert((to.to_string(), message_id.clone()), message.clone())
                .await;
        }
        Ok(message_id)
    }

    /// A message recently relayed to `to`, kept for re-encryption on retry.
    pub async fn recent_message(&self, to: &Jid, id: &str) -> Option<wa::Message> {
        let recent = self.recent_messages.as_ref()?;
        recent.get(&(to.to_string(), id.to_string())).await
    }

    /// Asks our own primary device to run a peer data operation.
    pub async fn send_peer_data_operation(
        &self,
        request: wa::PeerDataOperationRequestMessage,
    ) -> Result<MessageId, RelayError> {
        let own = self.require_account()?.pn.to_non_ad();
        let message = wa::Message {
            protocol_message: Some(Box::new(wa::ProtocolMessage {
                r#type: Some(ProtocolType::PeerDataOperationRequestMessage as i32),
                peer_data_operation_request_message: Some(request),
                ..Default::default()
            })),
            ..Default::default()
        };

        let mut additional = Attrs::new();
        additional.insert("category".into(), "peer".into());
        additional.insert("push_priority".into(), "high_force".into());
        self.relay_message(
            &own,
            &message,
            RelayOptions {
                additional_attributes: additional,
                ..Default::default()
            },
        )
        .await
    }

    /// Drops our sender key for `group` so the next send starts a new chain
    /// and distributes it to every device.
    pub async fn reset_group_sender_key(&self, group: &Jid) -> Result<(), RelayError> {
        let account = self.require_account()?;
        let tx = self.keys.begin(&group.to_string()).await;
        for mode in [AddressingMode::Pn, AddressingMode::Lid] {
            let name = sender_key_name(group, account.address_for(mode));
            sender_key::forget_sender_key(&tx, &name).await?;
        }
        tx.delete_one(KeyCategory::SenderKeyMemory, &group.to_string())
            .await?;
        self.commit(tx).await?;
        log::info!(target: "Relay/Send", "reset sender key for {group}");
        Ok(())
    }

    async fn group_content(
        &self,
        tx: &KeyTransaction,
        account: &Account,
        to: &Jid,
        message: &wa::Message,
        options: &RelayOptions,
        enc_attrs: &Attrs,
    ) -> Result<Content, RelayError> {
        let is_status = to.is_status_broadcast();
        let group = if is_status {
            GroupInfo::new(options.status_jid_list.clone(), AddressingMode::Pn)
        } else {
            let use_cache = options.use_cached_group_metadata && self.config.use_cached_group_metadata;
            self.group_info(to, use_cache).await?
        };
        let me = account.address_for(group.addressing_mode);
        let name = sender_key_name(to, me);

        let mut memory = if options.participant.is_some() || is_status {
            SenderKeyMemory::new()
        } else {
            load_sender_key_memory(tx, to).await?
        };

        let devices: Vec<Jid> = match &options.participant {
            Some(participant) => vec![participant.clone()],
            None => self
                .resolver
                .resolve_devices(tx, me, &group.participants, options.use_user_devices_cache, false)
                .await?
                .into_iter()
                .map(|d| d.jid)
                .collect(),
        };

        let send_key = sender_key::next_group_send_key(tx, &name).await?;
        if send_key.fresh_chain {
            memory.clear();
        }
        let ciphertext = self
            .signal
            .encrypt_group(&send_key.message_key, &MessageUtils::encode_padded(message))?;
        let skmsg = SenderKeyMessage {
            key_id: send_key.key_id,
            iteration: send_key.message_key.iteration(),
            ciphertext,
        };

        let mut distribute_to = Vec::new();
        for device in devices {
            let id = device.to_string();
            if options.participant.is_some() || !memory.get(&id).copied().unwrap_or(false) {
                memory.insert(id, true);
                distribute_to.push(device);
            }
        }

        let mut fanout_nodes = Vec::new();
        let mut device_identity_required = false;
        if !distribute_to.is_empty() {
            log::debug!(
                target: "Relay/Send",
                "sending new sender key for {to} to {} devices",
                distribute_to.len()
            );
            self.sessions.ensure_sessions(tx, &distribute_to, false).await?;
            let distribution = MessageUtils::encode_padded(&sender_key_distribution_payload(
                to,
                send_key.distribution.serialize(),
            ));
            let fanout = self
                .encryptor
                .encrypt_for_devices(tx, account, &distribute_to, &distribution, None, enc_attrs)
                .await?;
            fanout_nodes = fanout.nodes;
            device_identity_required = fanout.device_identity_required;
        }

        let mut nodes = vec![build_enc_node(CiphertextType::Skmsg, skmsg.serialize(), &Attrs::new())];
        if !fanout_nodes.is_empty() {
            nodes.push(build_participants_node(fanout_nodes));
        }

        if options.participant.is_none() && !is_status {
            tx.put_one(KeyCategory::SenderKeyMemory, &to.to_string(), encode_value(&memory)?)
                .await?;
        }
        Ok(Content {
            nodes,
            device_identity_required,
        })
    }

    async fn direct_content(
        &self,
        tx: &KeyTransaction,
        account: &Account,
        to: &Jid,
        message: &wa::Message,
        options: &RelayOptions,
        enc_attrs: &Attrs,
    ) -> Result<Content, RelayError> {
        let me = account.address_for(if to.is_lid() { AddressingMode::Lid } else { AddressingMode::Pn });

        let mut devices = Vec::new();
        match &options.participant {
            Some(participant) => devices.push(participant.clone()),
            None => {
                devices.push(to.to_non_ad());
                if !to.is_same_user_as(me) {
                    devices.push(me.to_non_ad());
                }
                if !options.is_peer() {
                    let resolved = self
                        .resolver
                        .resolve_devices(
                            tx,
                            me,
                            &[me.to_non_ad(), to.to_non_ad()],
                            options.use_user_devices_cache,
                            true,
                        )
                        .await?;
                    devices.extend(resolved.into_iter().map(|d| d.jid));
                }
            }
        }

        let mut seen = HashSet::new();
        devices.retain(|d| seen.insert(d.to_string()));
        // own devices first, in a stable order
        let (own, others): (Vec<Jid>, Vec<Jid>) = devices.into_iter().partition(|d| account.is_own(d));
        let devices: Vec<Jid> = own.into_iter().chain(others).collect();

        self.sessions.ensure_sessions(tx, &devices, false).await?;

        let payload = MessageUtils::encode_padded(message);
        let own_payload = MessageUtils::encode_padded(&wrap_device_sent(to, message));
        let fanout = self
            .encryptor
            .encrypt_for_devices(tx, account, &devices, &payload, Some(&own_payload), enc_attrs)
            .await?;

        let nodes = if options.is_peer() {
            fanout
                .nodes
                .into_iter()
                .next()
                .and_then(|to_node| match to_node.content {
                    Some(NodeContent::Nodes(mut inner)) if !inner.is_empty() => Some(inner.remove(0)),
                    _ => None,
                })
                .into_iter()
                .collect()
        } else {
            fanout.nodes
        };
        Ok(Content {
            nodes,
            device_identity_required: fanout.device_identity_required,
        })
    }
}

fn sender_key_name(group: &Jid, me: &Jid) -> SenderKeyName {
    SenderKeyName::new(group.to_string(), me.to_protocol_address().to_string())
}

async fn load_sender_key_memory(keys: &dyn KeyStore, group: &Jid) -> Result<SenderKeyMemory, RelayError> {
    match keys
        .get_one(KeyCategory::SenderKeyMemory, &group.to_string())
        .await?
    {
        Some(raw) => Ok(decode_value(&raw)?),
        None => Ok(SenderKeyMemory::new()),
    }
}

/// Plaintext node of a newsletter post. Edits and revokes re-target the
/// original id, carrying the edited content or nothing at all.
fn newsletter_content(message: &wa::Message, enc_attrs: &Attrs) -> (Option<MessageId>, Content, wa::Message) {
    let protocol = message.protocol_message.as_deref();
    let target_id = || protocol.and_then(|p| p.key.as_ref()).and_then(|k| k.id.clone());

    let (id, body) = match protocol {
        Some(p) if p.edited_message.is_some() => (
            target_id(),
            p.edited_message.as_deref().cloned().unwrap_or_default(),
        ),
        Some(p) if p.r#type == Some(ProtocolType::Revoke as i32) => (target_id(), wa::Message::default()),
        _ => (None, message.clone()),
    };

    let bytes = if body == wa::Message::default() {
        Vec::new()
    } else {
        body.encode_to_vec()
    };
    let node = build_plaintext_node(bytes, enc_attrs.get("mediatype").map(String::as_str));
    (
        id,
        Content {
            nodes: vec![node],
            device_identity_required: false,
        },
        body,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn newsletter_edit_retargets_the_original() {
        let edited = wa::Message {
            conversation: Some("fixed".into()),
            ..Default::default()
        };
        let message = wa::Message {
            protocol_message: Some(Box::new(wa::ProtocolMessage {
                key: Some(wa::MessageKey {
                    id: Some("ORIG".into()),
                    ..Default::default()
                }),
                edited_message: Some(Box::new(edited.clone())),
                ..Default::default()
            })),
            ..Default::default()
        };

        let (id, content, body) = newsletter_content(&message, &Attrs::new());
        assert_eq!(id.as_deref(), Some("ORIG"));
        assert_eq!(body, edited);
        assert_eq!(content.nodes[0].tag, "plaintext");
        assert_eq!(content.nodes[0].bytes(), Some(edited.encode_to_vec().as_slice()));
    }

    #[test]
    fn newsletter_revoke_sends_an_empty_payload() {
        let message = wa::Message {
            protocol_message: Some(Box::new(wa::ProtocolMessage {
                key: Some(wa::MessageKey {
                    id: Some("ORIG".into()),
                    ..Default::default()
                }),
                r#type: Some(ProtocolType::Revoke as i32),
                ..Default::default()
            })),
            ..Default::default()
        };

        let (id, content, _) = newsletter_content(&message, &Attrs::new());
        assert_eq!(id.as_deref(), Some("ORIG"));
        assert_eq!(content.nodes[0].bytes(), Some(&[][..]));
    }

    #[test]
    fn plain_newsletter_post_keeps_its_id_and_media_type() {
        let message = wa::Message {
            conversation: Some("hello".into()),
            ..Default::default()
        };
        let mut attrs = Attrs::new();
        attrs.insert("mediatype".into(), "image".into());

        let (id, content, _) = newsletter_content(&message, &attrs);
        assert!(id.is_none());
        assert_eq!(content.nodes[0].attr("mediatype"), Some("image"));
    }
}
