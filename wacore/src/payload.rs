//! Closed classification of outgoing message payloads.
//!
//! Everything the relay needs to know about message content (media type
//! attribute, business button marker, poll/event markers, stanza type) is
//! derived here from the normalized message.

use crate::proto::whatsapp as wa;
use crate::proto::whatsapp::protocol_message::Type as ProtocolType;

const MAX_WRAPPER_DEPTH: usize = 5;

/// Strips future-proof wrappers (ephemeral, view once, edits, captioned
/// documents) down to the inner content.
pub fn normalize(message: &wa::Message) -> &wa::Message {
    let mut current = message;
    for _ in 0..MAX_WRAPPER_DEPTH {
        let inner = current
            .ephemeral_message
            .as_deref()
            .or(current.view_once_message.as_deref())
            .or(current.document_with_caption_message.as_deref())
            .or(current.view_once_message_v2.as_deref())
            .or(current.edited_message.as_deref())
            .and_then(|fp| fp.message.as_deref());
        match inner {
            Some(m) => current = m,
            None => break,
        }
    }
    current
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MediaType {
    Image,
    Gif,
    Video,
    Ptt,
    Audio,
    Vcard,
    Document,
    ContactArray,
    LiveLocation,
    Sticker,
    List,
    ListResponse,
    ButtonsResponse,
    Order,
    Product,
    NativeFlowResponse,
    Url,
}

impl MediaType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MediaType::Image => "image",
            MediaType::Gif => "gif",
            MediaType::Video => "video",
            MediaType::Ptt => "ptt",
            MediaType::Audio => "audio",
            MediaType::Vcard => "vcard",
            MediaType::Document => "document",
            MediaType::ContactArray => "contact_array",
            MediaType::LiveLocation => "livelocation",
            MediaType::Sticker => "sticker",
            MediaType::List => "list",
            MediaType::ListResponse => "list_response",
            MediaType::ButtonsResponse => "buttons_response",
            MediaType::Order => "order",
            MediaType::Product => "product",
            MediaType::NativeFlowResponse => "native_flow_response",
            MediaType::Url => "url",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ButtonKind {
    List,
    Buttons,
    Template,
    NativeFlow,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PayloadKind {
    Text,
    Media(MediaType),
    Buttons(ButtonKind),
    Poll,
    Event,
    Reaction,
    Pin,
    Protocol(Option<ProtocolType>),
    SenderKeyDistribution,
    Other,
}

impl PayloadKind {
    pub fn of(message: &wa::Message) -> Self {
        let m = normalize(message);
        if let Some(pm) = &m.protocol_message {
            return PayloadKind::Protocol(pm.r#type.and_then(|t| ProtocolType::try_from(t).ok()));
        }
        if m.reaction_message.is_some() {
            return PayloadKind::Reaction;
        }
        if m.pin_in_chat_message.is_some() {
            return PayloadKind::Pin;
        }
        if is_poll(m) {
            return PayloadKind::Poll;
        }
        if m.event_message.is_some() {
            return PayloadKind::Event;
        }
        if let Some(kind) = button_kind(m) {
            return PayloadKind::Buttons(kind);
        }
        if let Some(media) = media_type(m) {
            return PayloadKind::Media(media);
        }
        if m.conversation.is_some() || m.extended_text_message.is_some() {
            return PayloadKind::Text;
        }
        if m.sender_key_distribution_message.is_some() {
            return PayloadKind::SenderKeyDistribution;
        }
        PayloadKind::Other
    }
}

/// Value of the `mediatype` attribute on `enc` nodes.
pub fn media_type(message: &wa::Message) -> Option<MediaType> {
    let m = normalize(message);
    if m.image_message.is_some() {
        Some(MediaType::Image)
    } else if let Some(video) = &m.video_message {
        Some(if video.gif_playback.unwrap_or(false) {
            MediaType::Gif
        } else {
            MediaType::Video
        })
    } else if let Some(audio) = &m.audio_message {
        Some(if audio.ptt.unwrap_or(false) {
            MediaType::Ptt
        } else {
            MediaType::Audio
        })
    } else if m.contact_message.is_some() {
        Some(MediaType::Vcard)
    } else if m.document_message.is_some() {
        Some(MediaType::Document)
    } else if m.contacts_array_message.is_some() {
        Some(MediaType::ContactArray)
    } else if m.live_location_message.is_some() {
        Some(MediaType::LiveLocation)
    } else if m.sticker_message.is_some() {
        Some(MediaType::Sticker)
    } else if m.list_message.is_some() {
        Some(MediaType::List)
    } else if m.list_response_message.is_some() {
        Some(MediaType::ListResponse)
    } else if m.buttons_response_message.is_some() {
        Some(MediaType::ButtonsResponse)
    } else if m.order_message.is_some() {
        Some(MediaType::Order)
    } else if m.product_message.is_some() {
        Some(MediaType::Product)
    } else if m.interactive_response_message.is_some() {
        Some(MediaType::NativeFlowResponse)
    } else if m.group_invite_message.is_some() {
        Some(MediaType::Url)
    } else {
        None
    }
}

pub fn button_kind(message: &wa::Message) -> Option<ButtonKind> {
    let m = normalize(message);
    if m.list_message.is_some() {
        Some(ButtonKind::List)
    } else if m.buttons_message.is_some() {
        Some(ButtonKind::Buttons)
    } else if m.template_message.is_some() {
        Some(ButtonKind::Template)
    } else if native_flow(m).is_some() {
        Some(ButtonKind::NativeFlow)
    } else {
        None
    }
}

pub(crate) fn native_flow(message: &wa::Message) -> Option<&wa::NativeFlowMessage> {
    message
        .interactive_message
        .as_ref()
        .and_then(|i| i.native_flow_message.as_ref())
}

pub fn is_poll(message: &wa::Message) -> bool {
    let m = normalize(message);
    m.poll_creation_message.is_some()
        || m.poll_creation_message_v2.is_some()
        || m.poll_creation_message_v3.is_some()
}

pub fn is_event(message: &wa::Message) -> bool {
    normalize(message).event_message.is_some()
}

pub fn is_pin(message: &wa::Message) -> bool {
    normalize(message).pin_in_chat_message.is_some()
}

/// Stanza `type` for newsletter sends.
pub fn newsletter_stanza_type(message: &wa::Message) -> &'static str {
    let m = normalize(message);
    if m.reaction_message.is_some() {
        "reaction"
    } else if media_type(m).is_some() {
        "media"
    } else {
        "text"
    }
}

pub fn protocol_type(message: &wa::Message) -> Option<ProtocolType> {
    normalize(message)
        .protocol_message
        .as_ref()
        .and_then(|pm| pm.r#type)
        .and_then(|t| ProtocolType::try_from(t).ok())
}
