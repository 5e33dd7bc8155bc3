//! Classification of inbound `message` nodes, before any decryption.

use crate::framing::FramingError;
use crate::proto::whatsapp as wa;
use crate::types::message::{
    BotEditType, Envelope, EnvelopeKey, MessageKind, MessageStatus, MsgBotInfo, MsgMetaInfo,
};
use chrono::{DateTime, Utc};
use prost::Message as _;
use wacore_binary::jid::Jid;
use wacore_binary::node::Node;

/// Addressing of an inbound message.
#[derive(Debug, Clone)]
pub struct ClassifiedMessage {
    pub key: EnvelopeKey,
    pub kind: MessageKind,
    pub author: Jid,
    /// Author for direct chats, otherwise the chat.
    pub sender: Jid,
    pub push_name: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub category: Option<String>,
    pub server_id: Option<u64>,
}

impl ClassifiedMessage {
    pub fn chat(&self) -> &Jid {
        &self.key.remote_jid
    }

    pub fn into_envelope(self) -> Envelope {
        let status = if self.key.from_me {
            MessageStatus::ServerAck
        } else {
            MessageStatus::Pending
        };
        let broadcast = self.key.remote_jid.is_broadcast();
        let newsletter = self.kind == MessageKind::Newsletter;
        Envelope {
            key: self.key,
            kind: self.kind,
            author: self.author,
            sender: self.sender,
            push_name: self.push_name,
            timestamp: self.timestamp,
            status,
            category: self.category,
            broadcast,
            newsletter,
            server_id: self.server_id,
            multicast: false,
            verified_name: None,
            meta_info: MsgMetaInfo::default(),
            bot_info: None,
            message: None,
            stub: None,
        }
    }
}

pub fn classify(node: &Node, me: &Jid, me_lid: Option<&Jid>) -> Result<ClassifiedMessage, FramingError> {
    let mut attrs = node.attrs();
    let from = attrs.jid("from");
    let id = attrs.optional_string("id").unwrap_or_default().to_string();
    let participant = attrs.optional_jid("participant");
    let recipient = attrs.optional_jid("recipient");
    let timestamp = attrs.optional_unix_time("t").unwrap_or_default();
    let server_id = attrs.optional_u64("server_id");
    let is_sender = attrs.optional_bool("is_sender");
    attrs.finish()?;
    let from = from.ok_or_else(|| FramingError::malformed("message", "missing from"))?;

    let is_me = |jid: &Jid| jid.is_same_user_as(me);
    let is_me_lid = |jid: &Jid| me_lid.is_some_and(|lid| jid.is_same_user_as(lid));

    let (kind, chat, author) = if from.is_pn() || from.is_lid() {
        let own = if from.is_lid() { is_me_lid(&from) } else { is_me(&from) };
        let chat = match recipient {
            Some(recipient) if own => recipient,
            Some(_) => return Err(FramingError::RecipientNotFromMe),
            None => from.clone(),
        };
        (MessageKind::Chat, chat, from.clone())
    } else if from.is_group() {
        let participant = participant.clone().ok_or(FramingError::MissingParticipant)?;
        (MessageKind::Group, from.clone(), participant)
    } else if from.is_broadcast() {
        let participant = participant.clone().ok_or(FramingError::MissingParticipant)?;
        let ours = is_me(&participant);
        let kind = match (from.is_status_broadcast(), ours) {
            (true, true) => MessageKind::DirectPeerStatus,
            (true, false) => MessageKind::OtherStatus,
            (false, true) => MessageKind::PeerBroadcast,
            (false, false) => MessageKind::OtherBroadcast,
        };
        (kind, from.clone(), participant)
    } else if from.is_newsletter() {
        (MessageKind::Newsletter, from.clone(), from.clone())
    } else {
        return Err(FramingError::UnknownMessageType);
    };

    let origin = participant.as_ref().unwrap_or(&from);
    let from_me = if from.is_newsletter() {
        is_sender
    } else if from.is_lid() {
        is_me_lid(origin)
    } else {
        is_me(origin)
    };

    let participant_alt = ["participant_pn", "participant_lid", "sender_pn", "sender_lid"]
        .iter()
        .find_map(|key| node.attr(key))
        .and_then(|raw| raw.parse().ok());

    let sender = if kind == MessageKind::Chat {
        author.clone()
    } else {
        chat.clone()
    };

    Ok(ClassifiedMessage {
        key: EnvelopeKey {
            remote_jid: chat,
            from_me,
            id,
            participant,
            participant_alt,
        },
        kind,
        author,
        sender,
        push_name: node.attr("notify").map(str::to_string),
        timestamp: DateTime::from_timestamp(timestamp, 0).unwrap_or_default(),
        category: node.attr("category").map(str::to_string),
        server_id: if kind == MessageKind::Newsletter { server_id } else { None },
    })
}

/// Folds the non-payload children (`verified_name`, `multicast`, `meta`,
/// `bot`) into the envelope.
pub fn apply_metadata_children(node: &Node, envelope: &mut Envelope) {
    for child in node.children().unwrap_or_default() {
        match child.tag.as_str() {
            "verified_name" => {
                if let Some(name) = child.bytes().and_then(verified_business_name) {
                    envelope.verified_name = Some(name);
                }
            }
            "multicast" => envelope.multicast = true,
            "meta" => {
                envelope.meta_info = MsgMetaInfo {
                    target_id: child.attr("target_id").map(str::to_string),
                    target_sender: child
                        .attr("target_sender_jid")
                        .and_then(|j| j.parse::<Jid>().ok())
                        .map(|j| j.to_non_ad()),
                };
            }
            "bot" => {
                if let Some(edit) = child.attr("edit") {
                    envelope.bot_info = Some(MsgBotInfo {
                        edit_type: BotEditType::parse(edit),
                        edit_target_id: child.attr("edit_target_id").map(str::to_string),
                        edit_sender_timestamp_ms: child
                            .attr("sender_timestamp_ms")
                            .and_then(|t| t.parse::<i64>().ok())
                            .and_then(DateTime::from_timestamp_millis),
                    });
                }
            }
            _ => {}
        }
    }
}

fn verified_business_name(bytes: &[u8]) -> Option<String> {
    let cert = wa::VerifiedNameCertificate::decode(bytes).ok()?;
    let details = wa::verified_name_certificate::Details::decode(cert.details?.as_slice()).ok()?;
    details.verified_name
}
