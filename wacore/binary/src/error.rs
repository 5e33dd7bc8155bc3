use crate::jid::JidError;
use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum BinaryError {
    #[error("Attribute parsing failed: {0}")]
    AttrParse(String),
    #[error("Missing required attribute: {0}")]
    MissingAttr(String),
    #[error("JID parsing error: {0}")]
    Jid(#[from] JidError),
    #[error("<{tag}> expected {expected} content")]
    UnexpectedContent { tag: String, expected: &'static str },
    #[error("Multiple attribute parsing errors: {0:?}")]
    AttrList(Vec<BinaryError>),
}

pub type Result<T> = std::result::Result<T, BinaryError>;
