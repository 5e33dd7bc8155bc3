//! Builders for the outbound `message` stanza and its encrypted children.

use crate::proto::whatsapp as wa;
use crate::signal::CiphertextType;
use wacore_binary::builder::NodeBuilder;
use wacore_binary::jid::{Jid, MessageId};
use wacore_binary::node::{Attrs, Node};

pub const ENC_VERSION: &str = "2";

pub fn build_enc_node(kind: CiphertextType, ciphertext: Vec<u8>, extra_attrs: &Attrs) -> Node {
    NodeBuilder::new("enc")
        .attr("v", ENC_VERSION)
        .attr("type", kind.as_str())
        .attrs(extra_attrs.iter().map(|(k, v)| (k.as_str(), v.as_str())))
        .bytes(ciphertext)
        .build()
}

/// `<to jid>` wrapper around one device's `enc` node.
pub fn build_participant_node(jid: &Jid, enc: Node) -> Node {
    NodeBuilder::new("to").jid_attr("jid", jid).child(enc).build()
}

pub fn build_participants_node(nodes: Vec<Node>) -> Node {
    NodeBuilder::new("participants").children(nodes).build()
}

pub fn build_plaintext_node(bytes: Vec<u8>, media_type: Option<&str>) -> Node {
    NodeBuilder::new("plaintext")
        .optional_attr("mediatype", media_type)
        .bytes(bytes)
        .build()
}

/// Variant delivered to the sender's own other devices.
pub fn wrap_device_sent(destination: &Jid, message: &wa::Message) -> wa::Message {
    wa::Message {
        device_sent_message: Some(Box::new(wa::DeviceSentMessage {
            destination_jid: Some(destination.to_string()),
            message: Some(Box::new(message.clone())),
            phash: None,
        })),
        ..Default::default()
    }
}

pub fn sender_key_distribution_payload(group: &Jid, axolotl: Vec<u8>) -> wa::Message {
    wa::Message {
        sender_key_distribution_message: Some(wa::SenderKeyDistributionMessage {
            group_id: Some(group.to_string()),
            axolotl_sender_key_distribution_message: Some(axolotl),
        }),
        ..Default::default()
    }
}

/// Addressing of the outer stanza.
#[derive(Debug, Clone)]
pub struct StanzaAddress<'a> {
    pub destination: &'a Jid,
    /// Explicit single target device.
    pub participant: Option<&'a Jid>,
    pub me: &'a Jid,
}

/// `id`, `type`, caller attributes, then the addressing attributes.
///
/// A targeted group send keeps `to` on the group and names the device in
/// `participant`; a targeted send to one of our own devices goes `to` that
/// device with the conversation in `recipient`.
pub fn build_stanza_attrs(
    id: &MessageId,
    stanza_type: &str,
    additional_attrs: &Attrs,
    address: &StanzaAddress<'_>,
) -> Attrs {
    let mut attrs = Attrs::new();
    attrs.insert("id".into(), id.clone());
    attrs.insert("type".into(), stanza_type.into());
    for (k, v) in additional_attrs {
        attrs.insert(k.clone(), v.clone());
    }

    match address.participant {
        Some(participant) if address.destination.is_group() => {
            attrs.insert("to".into(), address.destination.to_string());
            attrs.insert("participant".into(), participant.to_string());
        }
        Some(participant) if participant.is_same_user_as(address.me) => {
            attrs.insert("to".into(), participant.to_string());
            attrs.insert("recipient".into(), address.destination.to_string());
        }
        Some(participant) => {
            attrs.insert("to".into(), participant.to_string());
        }
        None => {
            attrs.insert("to".into(), address.destination.to_string());
        }
    }
    attrs
}
