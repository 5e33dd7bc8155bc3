use crate::client::RelayClient;
use crate::error::RelayError;
use std::time::Duration;
use wacore::stanza::build_receipt;
use wacore::stanza::receipt::{ReceiptType, aggregate_message_keys_not_from_me};
use wacore::types::message::EnvelopeKey;
use wacore_binary::jid::{Jid, MessageId};
use wacore_binary::node::Node;

impl RelayClient {
    /// Sends one receipt covering `ids`. `None` is a delivery receipt.
    pub async fn send_receipt(
        &self,
        jid: &Jid,
        participant: Option<&Jid>,
        ids: &[MessageId],
        receipt_type: Option<ReceiptType>,
    ) -> Result<(), RelayError> {
        let now = chrono::Utc::now().timestamp();
        let Some(node) = build_receipt(jid, participant, ids, receipt_type, now) else {
            return Ok(());
        };
        log::debug!(
            target: "Relay/Receipt",
            "sending {} receipt for {} messages to {jid}",
            receipt_type.map_or("delivery", |t| t.as_str()),
            ids.len()
        );
        self.transport
            .send_node(node)
            .await
            .map_err(RelayError::Transport)
    }

    /// One receipt per chat and participant for the messages in `keys`
    /// that were not sent by us.
    pub async fn send_receipts(
        &self,
        keys: &[EnvelopeKey],
        receipt_type: Option<ReceiptType>,
    ) -> Result<(), RelayError> {
        for batch in aggregate_message_keys_not_from_me(keys) {
            self.send_receipt(&batch.jid, batch.participant.as_ref(), &batch.message_ids, receipt_type)
                .await?;
        }
        Ok(())
    }

    /// Waits for the server to deliver a receipt for message `id`.
    pub async fn wait_for_receipt(&self, id: &str, timeout: Duration) -> Result<Node, RelayError> {
        self.receipt_waiters.wait_for(id.to_string(), timeout).await
    }

    /// Feeds an inbound `receipt` node to anyone waiting on its ids.
    pub fn handle_receipt(&self, node: &Node) -> usize {
        let mut ids: Vec<&str> = node.attr("id").into_iter().collect();
        if let Some(list) = node.get_optional_child("list") {
            ids.extend(list.get_children_by_tag("item").filter_map(|item| item.attr("id")));
        }
        ids.into_iter()
            .map(|id| self.receipt_waiters.notify(&id.to_string(), node.clone()))
            .sum()
    }
}
