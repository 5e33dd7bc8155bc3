use crate::types::message::EnvelopeKey;
use wacore_binary::builder::NodeBuilder;
use wacore_binary::jid::{Jid, MessageId};
use wacore_binary::node::Node;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReceiptType {
    Read,
    ReadSelf,
    Sender,
    Played,
    Inactive,
    PeerMsg,
    HistSync,
}

impl ReceiptType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReceiptType::Read => "read",
            ReceiptType::ReadSelf => "read-self",
            ReceiptType::Sender => "sender",
            ReceiptType::Played => "played",
            ReceiptType::Inactive => "inactive",
            ReceiptType::PeerMsg => "peer_msg",
            ReceiptType::HistSync => "hist_sync",
        }
    }

    fn is_read(&self) -> bool {
        matches!(self, ReceiptType::Read | ReceiptType::ReadSelf)
    }
}

/// Builds a receipt for `ids` (first id in the attrs, the rest as list
/// items). `None` is a plain delivery receipt.
pub fn build_receipt(
    jid: &Jid,
    participant: Option<&Jid>,
    ids: &[MessageId],
    receipt_type: Option<ReceiptType>,
    now_secs: i64,
) -> Option<Node> {
    let (first, rest) = ids.split_first()?;
    let mut builder = NodeBuilder::new("receipt").attr("id", first.as_str());

    if receipt_type.is_some_and(|t| t.is_read()) {
        builder = builder.attr("t", now_secs.to_string());
    }

    match (receipt_type, participant) {
        (Some(ReceiptType::Sender), Some(participant)) if jid.is_user() => {
            builder = builder
                .jid_attr("recipient", jid)
                .jid_attr("to", participant);
        }
        _ => {
            builder = builder.jid_attr("to", jid);
            if let Some(participant) = participant {
                builder = builder.jid_attr("participant", participant);
            }
        }
    }

    if let Some(t) = receipt_type {
        let wire_type = if jid.is_newsletter() {
            ReceiptType::ReadSelf
        } else {
            t
        };
        builder = builder.attr("type", wire_type.as_str());
    }

    if !rest.is_empty() {
        builder = builder.child(
            NodeBuilder::new("list")
                .children(
                    rest.iter()
                        .map(|id| NodeBuilder::new("item").attr("id", id.as_str()).build()),
                )
                .build(),
        );
    }

    Some(builder.build())
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceiptBatch {
    pub jid: Jid,
    pub participant: Option<Jid>,
    pub message_ids: Vec<MessageId>,
}

/// Groups keys of messages not sent by us per `(chat, participant)`,
/// preserving first-seen order.
pub fn aggregate_message_keys_not_from_me(keys: &[EnvelopeKey]) -> Vec<ReceiptBatch> {
    let mut batches: Vec<ReceiptBatch> = Vec::new();
    for key in keys.iter().filter(|k| !k.from_me) {
        match batches
            .iter_mut()
            .find(|b| b.jid == key.remote_jid && b.participant == key.participant)
        {
            Some(batch) => batch.message_ids.push(key.id.clone()),
            None => batches.push(ReceiptBatch {
                jid: key.remote_jid.clone(),
                participant: key.participant.clone(),
                message_ids: vec![key.id.clone()],
            }),
        }
    }
    batches
}
