// Integration test: classification and decryption of inbound message nodes.

use std::sync::Arc;
use wacore::framing::FramingError;
use wacore::messages::MessageUtils;
use wacore::proto::whatsapp as wa;
use wacore::send::wrap_device_sent;
use wacore::store::KeyCategory;
use wacore::types::message::{MessageKind, NO_MESSAGE_FOUND_ERROR_TEXT};
use wacore_binary::builder::NodeBuilder;
use wacore_binary::jid::Jid;
use wacore_binary::node::Node;
use whatsapp_relay::loopback::{LoopbackRatchet, LoopbackServer, StaticGroups};
use whatsapp_relay::store::MemoryKeyStore;
use whatsapp_relay::{Account, RelayClient, RelayError};

fn client(keys: Arc<MemoryKeyStore>) -> RelayClient {
    RelayClient::builder()
        .with_transport(Arc::new(LoopbackServer::new()))
        .with_signal(Arc::new(LoopbackRatchet::new()))
        .with_groups(Arc::new(StaticGroups::new()))
        .with_key_store(keys)
        .with_account(Account::new(
            Jid::pn("111").with_device(3),
            Some(Jid::lid("500").with_device(3)),
            vec![],
        ))
        .build()
        .unwrap()
}

fn text(body: &str) -> wa::Message {
    wa::Message {
        conversation: Some(body.to_string()),
        ..Default::default()
    }
}

fn sealed(message: &wa::Message) -> Vec<u8> {
    LoopbackRatchet::new()
        .seal(&MessageUtils::encode_padded(message))
        .unwrap()
}

fn enc(kind: &str, bytes: Vec<u8>) -> Node {
    NodeBuilder::new("enc")
        .attr("v", "2")
        .attr("type", kind)
        .bytes(bytes)
        .build()
}

fn inbound(from: &str, id: &str, children: Vec<Node>) -> NodeBuilder {
    NodeBuilder::new("message")
        .attr("from", from)
        .attr("id", id)
        .attr("t", "1700000000")
        .attr("type", "text")
        .children(children)
}

#[tokio::test]
async fn prekey_then_regular_message() {
    let keys = Arc::new(MemoryKeyStore::new());
    let client = client(keys.clone());

    let first = client
        .decrypt_message_node(
            &inbound("222@s.whatsapp.net", "A", vec![enc("pkmsg", sealed(&text("first")))]).build(),
        )
        .await
        .unwrap();
    assert_eq!(first.kind, MessageKind::Chat);
    assert_eq!(first.message.unwrap().conversation.as_deref(), Some("first"));
    assert!(keys.ids(KeyCategory::Session).await.contains(&"222@c.us.0".to_string()));

    let second = client
        .decrypt_message_node(
            &inbound("222@s.whatsapp.net", "B", vec![enc("msg", sealed(&text("second")))]).build(),
        )
        .await
        .unwrap();
    assert!(second.stub.is_none());
    assert_eq!(second.message.unwrap().conversation.as_deref(), Some("second"));
}

#[tokio::test]
async fn message_without_session_becomes_a_stub() {
    let client = client(Arc::new(MemoryKeyStore::new()));
    let envelope = client
        .decrypt_message_node(
            &inbound("333@s.whatsapp.net", "A", vec![enc("msg", sealed(&text("lost")))]).build(),
        )
        .await
        .unwrap();

    assert!(envelope.message.is_none());
    assert!(envelope.stub.unwrap().reason().unwrap().starts_with("No session for"));
}

#[tokio::test]
async fn unknown_enc_type_becomes_a_stub() {
    let client = client(Arc::new(MemoryKeyStore::new()));
    let envelope = client
        .decrypt_message_node(&inbound("222@s.whatsapp.net", "A", vec![enc("X", vec![1, 2, 3])]).build())
        .await
        .unwrap();

    assert_eq!(envelope.stub.unwrap().reason(), Some("Unknown e2e type: X"));
}

#[tokio::test]
async fn node_without_payload_gets_the_absent_stub() {
    let client = client(Arc::new(MemoryKeyStore::new()));
    let envelope = client
        .decrypt_message_node(&inbound("222@s.whatsapp.net", "A", vec![]).build())
        .await
        .unwrap();

    assert_eq!(envelope.stub.unwrap().reason(), Some(NO_MESSAGE_FOUND_ERROR_TEXT));
}

#[tokio::test]
async fn group_message_without_participant_is_rejected() {
    let client = client(Arc::new(MemoryKeyStore::new()));
    let err = client
        .decrypt_message_node(&inbound("120363000000000001@g.us", "A", vec![]).build())
        .await
        .unwrap_err();

    assert!(matches!(err, RelayError::Framing(FramingError::MissingParticipant)));
}

#[tokio::test]
async fn plaintext_children_pass_through() {
    let client = client(Arc::new(MemoryKeyStore::new()));
    let body = prost::Message::encode_to_vec(&text("news"));
    let node = NodeBuilder::new("message")
        .attr("from", "120363000000000002@newsletter")
        .attr("id", "N1")
        .attr("server_id", "42")
        .attr("t", "1700000000")
        .child(NodeBuilder::new("plaintext").bytes(body).build())
        .build();

    let envelope = client.decrypt_message_node(&node).await.unwrap();
    assert_eq!(envelope.kind, MessageKind::Newsletter);
    assert_eq!(envelope.server_id, Some(42));
    assert_eq!(envelope.message.unwrap().conversation.as_deref(), Some("news"));
}

#[tokio::test]
async fn own_device_copies_are_unwrapped() {
    let client = client(Arc::new(MemoryKeyStore::new()));
    let wrapped = wrap_device_sent(&Jid::pn("222"), &text("sent elsewhere"));
    let envelope = client
        .decrypt_message_node(
            &inbound("111:5@s.whatsapp.net", "A", vec![enc("pkmsg", sealed(&wrapped))])
                .attr("recipient", "222@s.whatsapp.net")
                .build(),
        )
        .await
        .unwrap();

    assert!(envelope.key.from_me);
    assert_eq!(envelope.key.remote_jid, Jid::pn("222"));
    let message = envelope.message.unwrap();
    assert!(message.device_sent_message.is_none());
    assert_eq!(message.conversation.as_deref(), Some("sent elsewhere"));
}

#[tokio::test]
async fn sender_lid_attribute_is_learned_and_used() {
    let keys = Arc::new(MemoryKeyStore::new());
    let client = client(keys.clone());

    client
        .decrypt_message_node(
            &inbound("222@s.whatsapp.net", "A", vec![enc("pkmsg", sealed(&text("hi")))])
                .attr("sender_lid", "900@lid")
                .build(),
        )
        .await
        .unwrap();

    assert_eq!(client.mappings().cache().current_lid("222").await.as_deref(), Some("900"));
    assert_eq!(keys.ids(KeyCategory::Session).await, ["900@lid.0"]);
}
