use crate::framing::FramingError;
use std::collections::HashMap;
use wacore_binary::builder::NodeBuilder;
use wacore_binary::jid::{Jid, SERVER_JID};
use wacore_binary::node::Node;

/// Public key material needed to open a session with one device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreKeyBundle {
    pub registration_id: u32,
    pub device_id: u32,
    pub pre_key: Option<(u32, [u8; 32])>,
    pub signed_pre_key_id: u32,
    pub signed_pre_key: [u8; 32],
    pub signed_pre_key_signature: [u8; 64],
    pub identity_key: [u8; 32],
}

pub struct PreKeyUtils;

impl PreKeyUtils {
    pub fn build_fetch_prekeys_request(jids: &[Jid], reason: Option<&str>) -> Node {
        let user_nodes = jids.iter().map(|jid| {
            NodeBuilder::new("user")
                .jid_attr("jid", jid)
                .optional_attr("reason", reason)
                .build()
        });

        NodeBuilder::new("key").children(user_nodes).build()
    }

    pub fn build_fetch_prekeys_iq(jids: &[Jid]) -> Node {
        NodeBuilder::new("iq")
            .attr("xmlns", "encrypt")
            .attr("type", "get")
            .attr("to", SERVER_JID)
            .child(Self::build_fetch_prekeys_request(jids, None))
            .build()
    }

    /// Bundles by device. Users answered with an `error` child are skipped.
    pub fn parse_prekeys_response(resp_node: &Node) -> Result<HashMap<Jid, PreKeyBundle>, FramingError> {
        let list_node = resp_node
            .get_optional_child("list")
            .ok_or_else(|| FramingError::malformed("pre-key response", "<list> not found"))?;

        let mut bundles = HashMap::new();
        for user_node in list_node.get_children_by_tag("user") {
            let mut attrs = user_node.attrs();
            let Some(jid) = attrs.jid("jid") else {
                log::warn!(target: "prekeys", "user node without a valid jid: {:?}", attrs.finish());
                continue;
            };
            match Self::node_to_pre_key_bundle(&jid, user_node) {
                Ok(bundle) => {
                    bundles.insert(jid, bundle);
                }
                Err(e) => log::warn!(target: "prekeys", "skipping bundle for {jid}: {e}"),
            }
        }

        Ok(bundles)
    }

    fn node_to_pre_key_bundle(jid: &Jid, node: &Node) -> Result<PreKeyBundle, FramingError> {
        if let Some(error_node) = node.get_optional_child("error") {
            return Err(FramingError::malformed(
                "pre-key bundle",
                format!("server error {error_node}"),
            ));
        }

        let registration_id = u32::from_be_bytes(fixed(
            node.get_optional_child("registration"),
            "registration id",
        )?);

        let keys_node = node.get_optional_child("keys").unwrap_or(node);
        let identity_key = fixed(keys_node.get_optional_child("identity"), "identity key")?;

        let pre_key = match keys_node.get_optional_child("key") {
            Some(key_node) => Some(node_to_pre_key(key_node)?),
            None => None,
        };

        let skey = keys_node
            .get_optional_child("skey")
            .ok_or_else(|| FramingError::malformed("pre-key bundle", "missing signed prekey"))?;
        let (signed_pre_key_id, signed_pre_key) = node_to_pre_key(skey)?;
        let signed_pre_key_signature = fixed(skey.get_optional_child("signature"), "signature")?;

        Ok(PreKeyBundle {
            registration_id,
            device_id: u32::from(jid.device()),
            pre_key,
            signed_pre_key_id,
            signed_pre_key,
            signed_pre_key_signature,
            identity_key,
        })
    }
}

fn fixed<const N: usize>(node: Option<&Node>, what: &'static str) -> Result<[u8; N], FramingError> {
    let bytes = node
        .and_then(Node::bytes)
        .ok_or_else(|| FramingError::malformed("pre-key bundle", format!("missing {what}")))?;
    bytes.try_into().map_err(|_| {
        FramingError::malformed(
            "pre-key bundle",
            format!("invalid {what} length: got {}, expected {N}", bytes.len()),
        )
    })
}

fn node_to_pre_key(node: &Node) -> Result<(u32, [u8; 32]), FramingError> {
    let id_bytes = node
        .get_optional_child("id")
        .and_then(Node::bytes)
        .filter(|b| !b.is_empty())
        .ok_or_else(|| FramingError::malformed("pre-key", "missing or empty id"))?;
    let id = match id_bytes {
        [a, b, c] => u32::from_be_bytes([0, *a, *b, *c]),
        other => std::str::from_utf8(other)
            .ok()
            .and_then(|s| u32::from_str_radix(s.trim(), 16).ok())
            .ok_or_else(|| FramingError::malformed("pre-key", "id is not a 3-byte int or hex"))?,
    };
    Ok((id, fixed(node.get_optional_child("value"), "pre-key value")?))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bundle_node(jid: &str, with_one_time_key: bool) -> Node {
        let mut keys = vec![
            NodeBuilder::new("registration").bytes(7u32.to_be_bytes()).build(),
            NodeBuilder::new("identity").bytes([1u8; 32]).build(),
            NodeBuilder::new("skey")
                .children([
                    NodeBuilder::new("id").bytes([0, 0, 2]).build(),
                    NodeBuilder::new("value").bytes([2u8; 32]).build(),
                    NodeBuilder::new("signature").bytes([3u8; 64]).build(),
                ])
                .build(),
        ];
        if with_one_time_key {
            keys.push(
                NodeBuilder::new("key")
                    .children([
                        NodeBuilder::new("id").bytes([0, 1, 0]).build(),
                        NodeBuilder::new("value").bytes([4u8; 32]).build(),
                    ])
                    .build(),
            );
        }
        NodeBuilder::new("user").attr("jid", jid).children(keys).build()
    }

    #[test]
    fn parses_bundles_and_skips_errors() {
        let resp = NodeBuilder::new("iq")
            .child(
                NodeBuilder::new("list")
                    .children([
                        bundle_node("222:1@s.whatsapp.net", true),
                        bundle_node("333@lid", false),
                        NodeBuilder::new("user")
                            .attr("jid", "444@s.whatsapp.net")
                            .child(NodeBuilder::new("error").attr("code", "404").build())
                            .build(),
                    ])
                    .build(),
            )
            .build();

        let bundles = PreKeyUtils::parse_prekeys_response(&resp).unwrap();
        assert_eq!(bundles.len(), 2);

        let b = &bundles[&"222:1@s.whatsapp.net".parse::<Jid>().unwrap()];
        assert_eq!(b.registration_id, 7);
        assert_eq!(b.device_id, 1);
        assert_eq!(b.signed_pre_key_id, 2);
        assert_eq!(b.pre_key, Some((256, [4u8; 32])));

        let lid = &bundles[&Jid::lid("333")];
        assert!(lid.pre_key.is_none());
    }

    #[test]
    fn missing_list_is_malformed() {
        let resp = NodeBuilder::new("iq").build();
        assert!(matches!(
            PreKeyUtils::parse_prekeys_response(&resp),
            Err(FramingError::Malformed { .. })
        ));
    }

    #[test]
    fn fetch_iq_shape() {
        let iq = PreKeyUtils::build_fetch_prekeys_iq(&[Jid::lid("1").with_device(2)]);
        assert_eq!(iq.attr("xmlns"), Some("encrypt"));
        assert_eq!(iq.attr("type"), Some("get"));
        let user = iq.get_optional_child_by_tag(&["key", "user"]).unwrap();
        assert_eq!(user.attr("jid"), Some("1:2@lid"));
    }
}
