use thiserror::Error;
use wacore::messages::PaddingError;
use wacore::signal::SignalError;

/// Failure of one encrypted child. The pipeline turns it into a stub, and
/// the `Display` text becomes the stub parameter.
#[derive(Debug, Error)]
pub enum DecryptionError {
    #[error("Unknown e2e type: {0}")]
    UnknownE2eType(String),
    #[error("{0}")]
    Signal(#[from] SignalError),
    #[error("{0}")]
    Padding(#[from] PaddingError),
    #[error("failed to decode message: {0}")]
    Decode(#[from] prost::DecodeError),
}
