//! The subset of the WhatsApp `Message` schema that addressing, framing and
//! payload classification depend on. Field tags follow the upstream schema so
//! payloads produced elsewhere decode here and unknown fields are skipped.

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Message {
    #[prost(string, optional, tag = "1")]
    pub conversation: Option<String>,
    #[prost(message, optional, tag = "2")]
    pub sender_key_distribution_message: Option<SenderKeyDistributionMessage>,
    #[prost(message, optional, tag = "3")]
    pub image_message: Option<ImageMessage>,
    #[prost(message, optional, tag = "4")]
    pub contact_message: Option<ContactMessage>,
    #[prost(message, optional, tag = "6")]
    pub extended_text_message: Option<ExtendedTextMessage>,
    #[prost(message, optional, tag = "7")]
    pub document_message: Option<DocumentMessage>,
    #[prost(message, optional, tag = "8")]
    pub audio_message: Option<AudioMessage>,
    #[prost(message, optional, tag = "9")]
    pub video_message: Option<VideoMessage>,
    #[prost(message, optional, boxed, tag = "12")]
    pub protocol_message: Option<Box<ProtocolMessage>>,
    #[prost(message, optional, tag = "13")]
    pub contacts_array_message: Option<ContactsArrayMessage>,
    #[prost(message, optional, tag = "18")]
    pub live_location_message: Option<LiveLocationMessage>,
    #[prost(message, optional, tag = "25")]
    pub template_message: Option<TemplateMessage>,
    #[prost(message, optional, tag = "26")]
    pub sticker_message: Option<StickerMessage>,
    #[prost(message, optional, tag = "28")]
    pub group_invite_message: Option<GroupInviteMessage>,
    #[prost(message, optional, tag = "30")]
    pub product_message: Option<ProductMessage>,
    #[prost(message, optional, boxed, tag = "31")]
    pub device_sent_message: Option<Box<DeviceSentMessage>>,
    #[prost(message, optional, tag = "36")]
    pub list_message: Option<ListMessage>,
    #[prost(message, optional, boxed, tag = "37")]
    pub view_once_message: Option<Box<FutureProofMessage>>,
    #[prost(message, optional, tag = "38")]
    pub order_message: Option<OrderMessage>,
    #[prost(message, optional, tag = "39")]
    pub list_response_message: Option<ListResponseMessage>,
    #[prost(message, optional, boxed, tag = "40")]
    pub ephemeral_message: Option<Box<FutureProofMessage>>,
    #[prost(message, optional, tag = "42")]
    pub buttons_message: Option<ButtonsMessage>,
    #[prost(message, optional, tag = "43")]
    pub buttons_response_message: Option<ButtonsResponseMessage>,
    #[prost(message, optional, tag = "45")]
    pub interactive_message: Option<InteractiveMessage>,
    #[prost(message, optional, tag = "46")]
    pub reaction_message: Option<ReactionMessage>,
    #[prost(message, optional, tag = "48")]
    pub interactive_response_message: Option<InteractiveResponseMessage>,
    #[prost(message, optional, tag = "49")]
    pub poll_creation_message: Option<PollCreationMessage>,
    #[prost(message, optional, boxed, tag = "53")]
    pub document_with_caption_message: Option<Box<FutureProofMessage>>,
    #[prost(message, optional, boxed, tag = "55")]
    pub view_once_message_v2: Option<Box<FutureProofMessage>>,
    #[prost(message, optional, boxed, tag = "58")]
    pub edited_message: Option<Box<FutureProofMessage>>,
    #[prost(message, optional, tag = "60")]
    pub poll_creation_message_v2: Option<PollCreationMessage>,
    #[prost(message, optional, tag = "63")]
    pub pin_in_chat_message: Option<PinInChatMessage>,
    #[prost(message, optional, tag = "64")]
    pub poll_creation_message_v3: Option<PollCreationMessage>,
    #[prost(message, optional, tag = "75")]
    pub event_message: Option<EventMessage>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct MessageKey {
    #[prost(string, optional, tag = "1")]
    pub remote_jid: Option<String>,
    #[prost(bool, optional, tag = "2")]
    pub from_me: Option<bool>,
    #[prost(string, optional, tag = "3")]
    pub id: Option<String>,
    #[prost(string, optional, tag = "4")]
    pub participant: Option<String>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ContextInfo {
    #[prost(string, optional, tag = "1")]
    pub stanza_id: Option<String>,
    #[prost(string, optional, tag = "2")]
    pub participant: Option<String>,
    #[prost(string, repeated, tag = "15")]
    pub mentioned_jid: Vec<String>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct SenderKeyDistributionMessage {
    #[prost(string, optional, tag = "1")]
    pub group_id: Option<String>,
    #[prost(bytes = "vec", optional, tag = "2")]
    pub axolotl_sender_key_distribution_message: Option<Vec<u8>>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct DeviceSentMessage {
    #[prost(string, optional, tag = "1")]
    pub destination_jid: Option<String>,
    #[prost(message, optional, boxed, tag = "2")]
    pub message: Option<Box<Message>>,
    #[prost(string, optional, tag = "3")]
    pub phash: Option<String>,
}

/// Wrapper used by ephemeral, view-once, captioned document and edit payloads.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct FutureProofMessage {
    #[prost(message, optional, boxed, tag = "1")]
    pub message: Option<Box<Message>>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ExtendedTextMessage {
    #[prost(string, optional, tag = "1")]
    pub text: Option<String>,
    #[prost(message, optional, tag = "17")]
    pub context_info: Option<ContextInfo>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ImageMessage {
    #[prost(string, optional, tag = "1")]
    pub url: Option<String>,
    #[prost(string, optional, tag = "2")]
    pub mimetype: Option<String>,
    #[prost(string, optional, tag = "3")]
    pub caption: Option<String>,
    #[prost(message, optional, tag = "17")]
    pub context_info: Option<ContextInfo>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct VideoMessage {
    #[prost(string, optional, tag = "1")]
    pub url: Option<String>,
    #[prost(string, optional, tag = "2")]
    pub mimetype: Option<String>,
    #[prost(string, optional, tag = "7")]
    pub caption: Option<String>,
    #[prost(bool, optional, tag = "8")]
    pub gif_playback: Option<bool>,
    #[prost(message, optional, tag = "17")]
    pub context_info: Option<ContextInfo>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct AudioMessage {
    #[prost(string, optional, tag = "1")]
    pub url: Option<String>,
    #[prost(string, optional, tag = "2")]
    pub mimetype: Option<String>,
    #[prost(bool, optional, tag = "6")]
    pub ptt: Option<bool>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct DocumentMessage {
    #[prost(string, optional, tag = "1")]
    pub url: Option<String>,
    #[prost(string, optional, tag = "2")]
    pub mimetype: Option<String>,
    #[prost(string, optional, tag = "3")]
    pub title: Option<String>,
    #[prost(message, optional, tag = "17")]
    pub context_info: Option<ContextInfo>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct StickerMessage {
    #[prost(string, optional, tag = "1")]
    pub url: Option<String>,
    #[prost(string, optional, tag = "5")]
    pub mimetype: Option<String>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ContactMessage {
    #[prost(string, optional, tag = "1")]
    pub display_name: Option<String>,
    #[prost(string, optional, tag = "16")]
    pub vcard: Option<String>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ContactsArrayMessage {
    #[prost(string, optional, tag = "1")]
    pub display_name: Option<String>,
    #[prost(message, repeated, tag = "2")]
    pub contacts: Vec<ContactMessage>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct LiveLocationMessage {
    #[prost(double, optional, tag = "1")]
    pub degrees_latitude: Option<f64>,
    #[prost(double, optional, tag = "2")]
    pub degrees_longitude: Option<f64>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct GroupInviteMessage {
    #[prost(string, optional, tag = "1")]
    pub group_jid: Option<String>,
    #[prost(string, optional, tag = "2")]
    pub invite_code: Option<String>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ProductMessage {
    #[prost(string, optional, tag = "2")]
    pub business_owner_jid: Option<String>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct OrderMessage {
    #[prost(string, optional, tag = "1")]
    pub order_id: Option<String>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct TemplateMessage {
    #[prost(string, optional, tag = "9")]
    pub template_id: Option<String>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ListMessage {
    #[prost(string, optional, tag = "1")]
    pub title: Option<String>,
    #[prost(string, optional, tag = "2")]
    pub description: Option<String>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ListResponseMessage {
    #[prost(string, optional, tag = "1")]
    pub title: Option<String>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ButtonsMessage {
    #[prost(string, optional, tag = "6")]
    pub content_text: Option<String>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ButtonsResponseMessage {
    #[prost(string, optional, tag = "1")]
    pub selected_button_id: Option<String>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct NativeFlowButton {
    #[prost(string, optional, tag = "1")]
    pub name: Option<String>,
    #[prost(string, optional, tag = "2")]
    pub button_params_json: Option<String>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct NativeFlowMessage {
    #[prost(message, repeated, tag = "1")]
    pub buttons: Vec<NativeFlowButton>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct InteractiveMessage {
    #[prost(message, optional, tag = "6")]
    pub native_flow_message: Option<NativeFlowMessage>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct InteractiveResponseMessage {
    #[prost(string, optional, tag = "1")]
    pub body: Option<String>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ReactionMessage {
    #[prost(message, optional, tag = "1")]
    pub key: Option<MessageKey>,
    #[prost(string, optional, tag = "2")]
    pub text: Option<String>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct PollOption {
    #[prost(string, optional, tag = "1")]
    pub option_name: Option<String>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct PollCreationMessage {
    #[prost(string, optional, tag = "2")]
    pub name: Option<String>,
    #[prost(message, repeated, tag = "3")]
    pub options: Vec<PollOption>,
    #[prost(uint32, optional, tag = "4")]
    pub selectable_options_count: Option<u32>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct EventMessage {
    #[prost(string, optional, tag = "3")]
    pub name: Option<String>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct PinInChatMessage {
    #[prost(message, optional, tag = "1")]
    pub key: Option<MessageKey>,
    #[prost(int32, optional, tag = "2")]
    pub r#type: Option<i32>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct PeerDataOperationRequestMessage {
    #[prost(int32, optional, tag = "1")]
    pub peer_data_operation_request_type: Option<i32>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ProtocolMessage {
    #[prost(message, optional, tag = "1")]
    pub key: Option<MessageKey>,
    #[prost(enumeration = "protocol_message::Type", optional, tag = "2")]
    pub r#type: Option<i32>,
    #[prost(message, optional, boxed, tag = "14")]
    pub edited_message: Option<Box<Message>>,
    #[prost(message, optional, tag = "16")]
    pub peer_data_operation_request_message: Option<PeerDataOperationRequestMessage>,
}

pub mod protocol_message {
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
    #[repr(i32)]
    pub enum Type {
        Revoke = 0,
        EphemeralSetting = 3,
        HistorySyncNotification = 5,
        AppStateSyncKeyShare = 6,
        MessageEdit = 14,
        PeerDataOperationRequestMessage = 16,
        PeerDataOperationRequestResponseMessage = 17,
    }
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct VerifiedNameCertificate {
    #[prost(bytes = "vec", optional, tag = "1")]
    pub details: Option<Vec<u8>>,
    #[prost(bytes = "vec", optional, tag = "2")]
    pub signature: Option<Vec<u8>>,
}

pub mod verified_name_certificate {
    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct Details {
        #[prost(uint64, optional, tag = "1")]
        pub serial: Option<u64>,
        #[prost(string, optional, tag = "2")]
        pub issuer: Option<String>,
        #[prost(string, optional, tag = "4")]
        pub verified_name: Option<String>,
    }
}
