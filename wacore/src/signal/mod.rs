pub mod sender_key;

use crate::store::StoreError;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SignalError {
    #[error("No session for {0}")]
    NoSession(String),
    #[error("No sender key state for group {group} sender {sender}")]
    NoSenderKeyState { group: String, sender: String },
    #[error("Duplicate sender key message: current={current}, received={received}")]
    DuplicatedMessage { current: u32, received: u32 },
    #[error("Sender key message too far in the future: current={current}, received={received}")]
    TooFarInFuture { current: u32, received: u32 },
    #[error("Sender chain is too long")]
    ChainExhausted,
    #[error("Unrecognized message version {0}")]
    UnrecognizedVersion(u8),
    #[error("Invalid message: {0}")]
    InvalidMessage(String),
    #[error("Cipher failure: {0}")]
    Cipher(String),
    #[error("Protobuf decode error: {0}")]
    Protobuf(#[from] prost::DecodeError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

pub type Result<T> = std::result::Result<T, SignalError>;

/// Ciphertext kind carried in the `type` attribute of an `enc` node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CiphertextType {
    /// Pre-key message that bootstraps a new pairwise session.
    Pkmsg,
    /// Step of an established pairwise session.
    Msg,
    /// Group sender-key message.
    Skmsg,
}

impl CiphertextType {
    pub fn as_str(&self) -> &'static str {
        match self {
            CiphertextType::Pkmsg => "pkmsg",
            CiphertextType::Msg => "msg",
            CiphertextType::Skmsg => "skmsg",
        }
    }
}

impl FromStr for CiphertextType {
    type Err = SignalError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "pkmsg" => Ok(CiphertextType::Pkmsg),
            "msg" => Ok(CiphertextType::Msg),
            "skmsg" => Ok(CiphertextType::Skmsg),
            other => Err(SignalError::InvalidMessage(format!(
                "Unknown e2e type: {other}"
            ))),
        }
    }
}

impl fmt::Display for CiphertextType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
