// Integration test: recipients whose phone number maps to a linked identity
// are addressed by the LID, with phone-number sessions moved over.

use std::sync::Arc;
use wacore::proto::whatsapp as wa;
use wacore::store::{KeyCategory, KeyStore};
use wacore_binary::jid::Jid;
use wacore_binary::node::Node;
use whatsapp_relay::lid_mapping::MappingPair;
use whatsapp_relay::lid_pn_cache::LearningSource;
use whatsapp_relay::loopback::{LoopbackRatchet, LoopbackServer, StaticGroups, StaticLidDirectory};
use whatsapp_relay::store::MemoryKeyStore;
use whatsapp_relay::{Account, RelayClient, RelayOptions};

struct World {
    server: Arc<LoopbackServer>,
    keys: Arc<MemoryKeyStore>,
    client: RelayClient,
}

async fn world() -> World {
    let server = Arc::new(LoopbackServer::new());
    server.add_devices(&Jid::pn("222"), &[0]);
    let keys = Arc::new(MemoryKeyStore::new());
    let client = RelayClient::builder()
        .with_transport(server.clone())
        .with_signal(Arc::new(LoopbackRatchet::new()))
        .with_groups(Arc::new(StaticGroups::new()))
        .with_key_store(keys.clone())
        .with_account(Account::new(Jid::pn("111").with_device(3), None, vec![]))
        .build()
        .unwrap();
    client
        .mappings()
        .store_mappings(
            keys.as_ref(),
            &[MappingPair::new(Jid::pn("222"), Jid::lid("900"))],
            LearningSource::Usync,
        )
        .await
        .unwrap();
    World { server, keys, client }
}

fn text(body: &str) -> wa::Message {
    wa::Message {
        conversation: Some(body.to_string()),
        ..Default::default()
    }
}

fn targets(stanza: &Node) -> Vec<(String, String)> {
    stanza
        .get_children_by_tag("to")
        .filter_map(|to| {
            let kind = to.get_optional_child("enc")?.attr("type")?;
            Some((to.attr("jid")?.to_string(), kind.to_string()))
        })
        .collect()
}

#[tokio::test]
async fn migration_miss_fetches_the_lid() {
    let w = world().await;
    w.client
        .relay_message(&Jid::pn("222"), &text("hi"), RelayOptions::default())
        .await
        .unwrap();

    let requested = w.server.requested_key_jids();
    assert!(requested.contains(&Jid::lid("900")));
    assert!(!requested.contains(&Jid::pn("222")));

    let stanza = &w.server.sent_nodes()[0];
    assert!(targets(stanza).contains(&("900@lid".to_string(), "pkmsg".to_string())));
    assert!(w.keys.contains(KeyCategory::Session, "900@lid.0").await.unwrap());
}

#[tokio::test]
async fn existing_pn_session_is_moved_to_the_lid() {
    let w = world().await;
    w.keys
        .put_one(KeyCategory::Session, "222@c.us.0", LoopbackRatchet::session_record(false))
        .await
        .unwrap();

    w.client
        .relay_message(&Jid::pn("222"), &text("hi"), RelayOptions::default())
        .await
        .unwrap();

    assert!(!w.server.requested_key_jids().iter().any(|j| j.user == "222" || j.user == "900"));
    let stanza = &w.server.sent_nodes()[0];
    assert!(targets(stanza).contains(&("900@lid".to_string(), "msg".to_string())));
    assert!(!w.keys.contains(KeyCategory::Session, "222@c.us.0").await.unwrap());
    assert!(w.keys.contains(KeyCategory::Session, "900@lid.0").await.unwrap());
}

#[tokio::test]
async fn mapping_from_the_directory_is_cached() {
    let directory = Arc::new(StaticLidDirectory::new());
    directory.insert(Jid::pn("444"), Jid::lid("777"));
    let keys = MemoryKeyStore::new();
    let client = RelayClient::builder()
        .with_transport(Arc::new(LoopbackServer::new()))
        .with_signal(Arc::new(LoopbackRatchet::new()))
        .with_groups(Arc::new(StaticGroups::new()))
        .with_lid_directory(directory.clone())
        .build()
        .unwrap();

    let first = client.mappings().lid_for_pn(&keys, &Jid::pn("444")).await.unwrap();
    let second = client.mappings().pn_for_lid(&keys, &Jid::lid("777")).await.unwrap();

    assert_eq!(first, Some(Jid::lid("777")));
    assert_eq!(second, Some(Jid::pn("444")));
    assert_eq!(directory.lookups(), 1);
}
