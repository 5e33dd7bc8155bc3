use crate::framing::FramingError;
use wacore_binary::builder::NodeBuilder;
use wacore_binary::jid::{Jid, Server};
use wacore_binary::node::Node;

/// A LID mapping learned from a usync response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UsyncLidMapping {
    /// Phone number user part, e.g. `559980000001`.
    pub phone_number: String,
    /// LID user part, e.g. `100000012345678`.
    pub lid: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceListEntry {
    pub id: u16,
    pub key_index: Option<u32>,
}

/// Device list of one user from a usync response.
#[derive(Debug, Clone)]
pub struct UserDeviceList {
    /// User address without a device.
    pub user: Jid,
    pub devices: Vec<DeviceListEntry>,
    /// Participant hash of the device list.
    pub phash: Option<String>,
}

/// One addressable device of a user.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Device {
    pub user: String,
    pub device: u16,
    pub jid: Jid,
}

impl Device {
    pub fn new(jid: Jid) -> Self {
        Self {
            user: jid.user.clone(),
            device: jid.device(),
            jid,
        }
    }

    /// The same device addressed on `server`.
    pub fn on_server(&self, server: Server) -> Self {
        Self {
            user: self.user.clone(),
            device: self.device,
            jid: Jid::new(&self.user, server).with_device(self.device),
        }
    }
}

pub fn build_get_user_devices_query(jids: &[Jid], sid: &str) -> Node {
    let user_nodes = jids
        .iter()
        .map(|jid| NodeBuilder::new("user").jid_attr("jid", &jid.to_non_ad()).build());

    let query_node = NodeBuilder::new("query")
        .child(NodeBuilder::new("devices").attr("version", "2").build())
        .build();

    let list_node = NodeBuilder::new("list").children(user_nodes).build();

    NodeBuilder::new("usync")
        .attrs([
            ("context", "message"),
            ("index", "0"),
            ("last", "true"),
            ("mode", "query"),
            ("sid", sid),
        ])
        .children([query_node, list_node])
        .build()
}

pub fn parse_get_user_devices_response(resp_node: &Node) -> Result<Vec<UserDeviceList>, FramingError> {
    let list_node = resp_node
        .get_optional_child_by_tag(&["usync", "list"])
        .ok_or_else(|| FramingError::malformed("usync response", "<usync> or <list> not found"))?;

    let mut result = Vec::new();

    for user_node in list_node.get_children_by_tag("user") {
        let mut attrs = user_node.attrs();
        let user_jid = attrs.jid("jid");
        attrs.finish()?;
        let Some(user_jid) = user_jid else {
            continue;
        };

        let Some(device_list_node) = user_node.get_optional_child_by_tag(&["devices", "device-list"])
        else {
            log::warn!(target: "usync", "<device-list> not found for user {user_jid}, skipping");
            continue;
        };

        let phash = device_list_node.attr("hash").map(str::to_string);

        let mut devices = Vec::new();
        for device_node in device_list_node.get_children_by_tag("device") {
            let mut attrs = device_node.attrs();
            let id = attrs.optional_u16("id");
            let key_index = attrs.optional_u64("key-index");
            match (id, attrs.finish()) {
                (Some(id), Ok(())) => devices.push(DeviceListEntry {
                    id,
                    key_index: key_index.and_then(|k| u32::try_from(k).ok()),
                }),
                (_, Err(e)) => {
                    log::warn!(target: "usync", "invalid device for user {user_jid}: {e}, skipping")
                }
                (None, Ok(())) => {
                    log::warn!(target: "usync", "device node missing 'id' attribute, skipping")
                }
            }
        }

        result.push(UserDeviceList {
            user: user_jid.to_non_ad(),
            devices,
            phash,
        });
    }

    Ok(result)
}

/// Flattens device lists into addressable devices.
///
/// Excludes the exact originating device (only when `me` names one),
/// companion devices without a `key-index`, and the primary device when
/// `exclude_zero_devices` is set.
pub fn extract_device_jids(lists: &[UserDeviceList], me: &Jid, exclude_zero_devices: bool) -> Vec<Device> {
    let mut out = Vec::new();
    for list in lists {
        for entry in &list.devices {
            if exclude_zero_devices && entry.id == 0 {
                continue;
            }
            if entry.id != 0 && entry.key_index.is_none() {
                continue;
            }
            if me.has_explicit_device() && list.user.is_same_user_as(me) && entry.id == me.device() {
                continue;
            }
            out.push(Device::new(list.user.clone().with_device(entry.id)));
        }
    }
    out
}

/// PN -> LID pairs carried in `<lid val>` children of a usync response.
pub fn parse_lid_mappings_from_response(resp_node: &Node) -> Vec<UsyncLidMapping> {
    let Some(list_node) = resp_node.get_optional_child_by_tag(&["usync", "list"]) else {
        return Vec::new();
    };

    list_node
        .get_children_by_tag("user")
        .filter_map(|user_node| {
            let user_jid: Jid = user_node.attr("jid")?.parse().ok()?;
            if !user_jid.is_pn() {
                return None;
            }
            let lid_jid: Jid = user_node.get_optional_child("lid")?.attr("val")?.parse().ok()?;
            lid_jid.is_lid().then(|| UsyncLidMapping {
                phone_number: user_jid.user.clone(),
                lid: lid_jid.user,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    /// `<iq><usync><list><user jid><devices><device-list hash><device id key-index/>...`
    fn build_usync_response(users: Vec<(&str, Vec<(u16, Option<u32>)>, Option<&str>)>) -> Node {
        let user_nodes: Vec<Node> = users
            .into_iter()
            .map(|(jid, device_ids, phash)| {
                let device_nodes = device_ids.into_iter().map(|(id, key_index)| {
                    NodeBuilder::new("device")
                        .attr("id", id.to_string())
                        .optional_attr("key-index", key_index.map(|k| k.to_string()))
                        .build()
                });

                let device_list = NodeBuilder::new("device-list")
                    .optional_attr("hash", phash)
                    .children(device_nodes)
                    .build();

                NodeBuilder::new("user")
                    .attr("jid", jid)
                    .child(NodeBuilder::new("devices").child(device_list).build())
                    .build()
            })
            .collect();

        let list_node = NodeBuilder::new("list").children(user_nodes).build();
        let usync_node = NodeBuilder::new("usync").child(list_node).build();
        NodeBuilder::new("iq").child(usync_node).build()
    }

    #[test]
    fn test_query_shape() {
        let node = build_get_user_devices_query(&[Jid::pn("1").with_device(3)], "sid-1");
        assert_eq!(node.attr("context"), Some("message"));
        assert_eq!(node.attr("sid"), Some("sid-1"));
        let devices = node.get_optional_child_by_tag(&["query", "devices"]).unwrap();
        assert_eq!(devices.attr("version"), Some("2"));
        let user = node.get_optional_child_by_tag(&["list", "user"]).unwrap();
        assert_eq!(user.attr("jid"), Some("1@s.whatsapp.net"));
    }

    #[test]
    fn test_parse_multiple_users_with_phash() {
        let response = build_usync_response(vec![
            ("1111111111@s.whatsapp.net", vec![(0, None), (1, Some(1))], Some("2:hash1")),
            ("2222222222:5@s.whatsapp.net", vec![(0, None)], None),
        ]);

        let result = parse_get_user_devices_response(&response).unwrap();

        assert_eq!(result.len(), 2);
        assert_eq!(result[0].devices.len(), 2);
        assert_eq!(result[0].devices[1].key_index, Some(1));
        assert_eq!(result[0].phash.as_deref(), Some("2:hash1"));
        assert_eq!(result[1].user, Jid::pn("2222222222"));
        assert_eq!(result[1].phash, None);
    }

    #[test]
    fn test_missing_list_is_malformed() {
        let response = NodeBuilder::new("iq").build();
        assert!(parse_get_user_devices_response(&response).is_err());
    }

    #[test]
    fn test_extract_filters_devices() {
        let response = build_usync_response(vec![
            ("111@s.whatsapp.net", vec![(0, None), (2, Some(1)), (3, Some(2))], None),
            ("222@s.whatsapp.net", vec![(0, None), (1, None), (4, Some(3))], None),
        ]);
        let lists = parse_get_user_devices_response(&response).unwrap();
        let me = Jid::pn("111").with_device(2);

        let jids: Vec<String> = extract_device_jids(&lists, &me, false)
            .into_iter()
            .map(|d| d.jid.to_string())
            .collect();
        assert_eq!(
            jids,
            ["111@s.whatsapp.net", "111:3@s.whatsapp.net", "222@s.whatsapp.net", "222:4@s.whatsapp.net"]
        );

        let without_zero = extract_device_jids(&lists, &me, true);
        assert!(without_zero.iter().all(|d| d.device != 0));
        assert_eq!(without_zero.len(), 2);
    }

    #[test]
    fn test_extract_keeps_own_devices_when_me_has_no_device() {
        let response = build_usync_response(vec![("111@s.whatsapp.net", vec![(0, None)], None)]);
        let lists = parse_get_user_devices_response(&response).unwrap();
        assert_eq!(extract_device_jids(&lists, &Jid::pn("111"), false).len(), 1);
    }

    #[test]
    fn test_lid_mappings() {
        let user = NodeBuilder::new("user")
            .attr("jid", "559980000001@s.whatsapp.net")
            .child(NodeBuilder::new("lid").attr("val", "100000012345678@lid").build())
            .build();
        let resp = NodeBuilder::new("iq")
            .child(
                NodeBuilder::new("usync")
                    .child(NodeBuilder::new("list").child(user).build())
                    .build(),
            )
            .build();
        assert_eq!(
            parse_lid_mappings_from_response(&resp),
            vec![UsyncLidMapping {
                phone_number: "559980000001".into(),
                lid: "100000012345678".into()
            }]
        );
    }
}
