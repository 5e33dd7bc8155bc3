//! Protocol-feature children appended after the encrypted content.
//!
//! Receivers parse these positionally, so [`StanzaDecorator::ORDER`] is
//! fixed and every send goes through [`decorate`].

use crate::payload::{self, ButtonKind};
use crate::proto::whatsapp as wa;
use wacore_binary::builder::NodeBuilder;
use wacore_binary::jid::Jid;
use wacore_binary::node::Node;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StanzaDecorator {
    /// Signed account identity, required when any `pkmsg` was produced.
    DeviceIdentity,
    /// Nodes supplied by the caller.
    AdditionalNodes,
    /// `meta` marker for poll and event creation.
    CreationMeta,
    /// Legacy `creator-timestamp` group ids.
    Multicast,
    /// Business button markers.
    BusinessButtons,
    /// `bot` marker for direct user chats.
    BizBot,
}

impl StanzaDecorator {
    pub const ORDER: [StanzaDecorator; 6] = [
        StanzaDecorator::DeviceIdentity,
        StanzaDecorator::AdditionalNodes,
        StanzaDecorator::CreationMeta,
        StanzaDecorator::Multicast,
        StanzaDecorator::BusinessButtons,
        StanzaDecorator::BizBot,
    ];
}

pub struct DecoratorContext<'a> {
    pub destination: &'a Jid,
    pub message: &'a wa::Message,
    /// Present only when the device identity must be attached.
    pub device_identity: Option<&'a [u8]>,
    pub additional_nodes: &'a [Node],
}

impl StanzaDecorator {
    fn nodes(self, ctx: &DecoratorContext<'_>) -> Vec<Node> {
        match self {
            StanzaDecorator::DeviceIdentity => ctx
                .device_identity
                .map(|bytes| NodeBuilder::new("device-identity").bytes(bytes).build())
                .into_iter()
                .collect(),
            StanzaDecorator::AdditionalNodes => ctx.additional_nodes.to_vec(),
            StanzaDecorator::CreationMeta => creation_meta(ctx.message).into_iter().collect(),
            StanzaDecorator::Multicast => {
                if ctx.destination.is_group() && ctx.destination.user.contains('-') {
                    vec![NodeBuilder::new("multicast").build()]
                } else {
                    Vec::new()
                }
            }
            StanzaDecorator::BusinessButtons => {
                if ctx.destination.is_newsletter()
                    || ctx.additional_nodes.iter().any(|n| n.tag == "biz")
                {
                    return Vec::new();
                }
                button_node(ctx.message).into_iter().collect()
            }
            StanzaDecorator::BizBot => {
                if ctx.destination.is_pn() {
                    vec![NodeBuilder::new("bot").attr("biz_bot", "1").build()]
                } else {
                    Vec::new()
                }
            }
        }
    }
}

/// All decorator nodes for one stanza, in wire order.
pub fn decorate(ctx: &DecoratorContext<'_>) -> Vec<Node> {
    StanzaDecorator::ORDER
        .iter()
        .flat_map(|d| d.nodes(ctx))
        .collect()
}

fn creation_meta(message: &wa::Message) -> Option<Node> {
    if payload::is_poll(message) {
        Some(NodeBuilder::new("meta").attr("polltype", "creation").build())
    } else if payload::is_event(message) {
        Some(NodeBuilder::new("meta").attr("event_type", "creation").build())
    } else {
        None
    }
}

fn native_flow_node(name: &str, version: Option<&str>) -> Node {
    NodeBuilder::new("biz")
        .child(
            NodeBuilder::new("interactive")
                .attr("type", "native_flow")
                .attr("v", "1")
                .child(
                    NodeBuilder::new("native_flow")
                        .attr("name", name)
                        .optional_attr("v", version)
                        .build(),
                )
                .build(),
        )
        .build()
}

pub fn button_node(message: &wa::Message) -> Option<Node> {
    let m = payload::normalize(message);
    let kind = payload::button_kind(m)?;
    let flow_buttons = payload::native_flow(m)
        .map(|nf| nf.buttons.as_slice())
        .unwrap_or_default();
    let first_button = flow_buttons.first().and_then(|b| b.name.as_deref());
    let has_button = |name: &str| flow_buttons.iter().any(|b| b.name.as_deref() == Some(name));

    if first_button == Some("review_and_pay") {
        return Some(
            NodeBuilder::new("biz")
                .attr("native_flow_name", "order_details")
                .build(),
        );
    }
    if has_button("cta_catalog") {
        return Some(native_flow_node("cta_catalog", None));
    }
    if has_button("automated_greeting_message_view_catalog") {
        return Some(native_flow_node("automated_greeting_message_view_catalog", None));
    }

    match kind {
        ButtonKind::NativeFlow | ButtonKind::Buttons => Some(native_flow_node("mixed", Some("9"))),
        ButtonKind::List => Some(
            NodeBuilder::new("biz")
                .child(
                    NodeBuilder::new("list")
                        .attr("type", "product_list")
                        .attr("v", "2")
                        .build(),
                )
                .build(),
        ),
        ButtonKind::Template => Some(
            NodeBuilder::new("biz")
                .child(
                    NodeBuilder::new("hsm")
                        .attr("tag", "AUTHENTICATION")
                        .attr("category", "")
                        .build(),
                )
                .build(),
        ),
    }
}
