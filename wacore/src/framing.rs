use thiserror::Error;
use wacore_binary::BinaryError;

/// A node whose shape does not match what its tag requires.
#[derive(Debug, Clone, Error)]
pub enum FramingError {
    #[error("No participant in group message")]
    MissingParticipant,
    #[error("receipient present, but msg not from me")]
    RecipientNotFromMe,
    #[error("Unknown message type")]
    UnknownMessageType,
    #[error("invalid attributes: {0}")]
    Attributes(#[from] BinaryError),
    #[error("malformed {context}: {reason}")]
    Malformed {
        context: &'static str,
        reason: String,
    },
}

impl FramingError {
    pub fn malformed(context: &'static str, reason: impl Into<String>) -> Self {
        FramingError::Malformed {
            context,
            reason: reason.into(),
        }
    }
}
