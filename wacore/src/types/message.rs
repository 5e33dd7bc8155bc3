use crate::proto::whatsapp as wa;
use chrono::{DateTime, Utc};
use wacore_binary::jid::{Jid, MessageId};

pub const MISSING_KEYS_ERROR_TEXT: &str = "Key used already or never filled";
pub const NO_MESSAGE_FOUND_ERROR_TEXT: &str = "Message absent from node";

/// Origin classification of an inbound message node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    Chat,
    Group,
    DirectPeerStatus,
    OtherStatus,
    PeerBroadcast,
    OtherBroadcast,
    Newsletter,
}

impl MessageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageKind::Chat => "chat",
            MessageKind::Group => "group",
            MessageKind::DirectPeerStatus => "direct_peer_status",
            MessageKind::OtherStatus => "other_status",
            MessageKind::PeerBroadcast => "peer_broadcast",
            MessageKind::OtherBroadcast => "other_broadcast",
            MessageKind::Newsletter => "newsletter",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MessageStatus {
    #[default]
    Pending,
    ServerAck,
    DeliveryAck,
    Read,
    Played,
}

/// Identity of a message within a chat. `from_me` is always derived from
/// an identity comparison, never copied from the wire.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EnvelopeKey {
    pub remote_jid: Jid,
    pub from_me: bool,
    pub id: MessageId,
    pub participant: Option<Jid>,
    /// The other identity of the participant when the node carries one.
    pub participant_alt: Option<Jid>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StubType {
    /// The payload could not be decrypted or was absent.
    Ciphertext,
}

impl StubType {
    pub fn as_str(&self) -> &'static str {
        match self {
            StubType::Ciphertext => "CIPHERTEXT",
        }
    }
}

/// Terminal placeholder for a message body that could not be produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageStub {
    pub stub_type: StubType,
    pub parameters: Vec<String>,
}

impl MessageStub {
    pub fn ciphertext(reason: impl Into<String>) -> Self {
        Self {
            stub_type: StubType::Ciphertext,
            parameters: vec![reason.into()],
        }
    }

    pub fn reason(&self) -> Option<&str> {
        self.parameters.first().map(String::as_str)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BotEditType {
    First,
    Inner,
    Last,
}

impl BotEditType {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "first" => Some(Self::First),
            "inner" => Some(Self::Inner),
            "last" => Some(Self::Last),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct MsgBotInfo {
    pub edit_type: Option<BotEditType>,
    pub edit_target_id: Option<MessageId>,
    pub edit_sender_timestamp_ms: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default)]
pub struct MsgMetaInfo {
    pub target_id: Option<MessageId>,
    pub target_sender: Option<Jid>,
}

/// A decoded inbound message.
#[derive(Debug, Clone)]
pub struct Envelope {
    pub key: EnvelopeKey,
    pub kind: MessageKind,
    /// Device that authored the message.
    pub author: Jid,
    /// Address used for pairwise decryption.
    pub sender: Jid,
    pub push_name: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub status: MessageStatus,
    pub category: Option<String>,
    pub broadcast: bool,
    pub newsletter: bool,
    pub server_id: Option<u64>,
    pub multicast: bool,
    pub verified_name: Option<String>,
    pub meta_info: MsgMetaInfo,
    pub bot_info: Option<MsgBotInfo>,
    pub message: Option<wa::Message>,
    pub stub: Option<MessageStub>,
}

impl Envelope {
    pub fn is_stub(&self) -> bool {
        self.stub.is_some()
    }
}

/// Reason codes sent back when an inbound stanza is rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum NackReason {
    ParsingError = 487,
    UnrecognizedStanza = 488,
    UnrecognizedStanzaClass = 489,
    UnrecognizedStanzaType = 490,
    InvalidProtobuf = 491,
    InvalidHostedCompanionStanza = 493,
    MissingMessageSecret = 495,
    SignalErrorOldCounter = 496,
    MessageDeletedOnPeer = 499,
    UnhandledError = 500,
    UnsupportedAdminRevoke = 550,
    UnsupportedLidGroup = 551,
    DbOperationFailed = 552,
}

impl NackReason {
    pub fn code(self) -> u16 {
        self as u16
    }

    pub fn from_code(code: u16) -> Option<Self> {
        use NackReason::*;
        [
            ParsingError,
            UnrecognizedStanza,
            UnrecognizedStanzaClass,
            UnrecognizedStanzaType,
            InvalidProtobuf,
            InvalidHostedCompanionStanza,
            MissingMessageSecret,
            SignalErrorOldCounter,
            MessageDeletedOnPeer,
            UnhandledError,
            UnsupportedAdminRevoke,
            UnsupportedLidGroup,
            DbOperationFailed,
        ]
        .into_iter()
        .find(|r| r.code() == code)
    }
}
