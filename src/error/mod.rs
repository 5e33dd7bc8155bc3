mod decryption;

pub use decryption::DecryptionError;

use std::time::Duration;
use thiserror::Error;
use wacore::framing::FramingError;
use wacore::signal::SignalError;
use wacore::store::StoreError;

#[derive(Debug, Error)]
pub enum RelayError {
    #[error(transparent)]
    Framing(#[from] FramingError),
    #[error("address resolution failed: {0}")]
    AddressResolution(anyhow::Error),
    #[error("session fetch failed: {0}")]
    SessionFetch(anyhow::Error),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Signal(#[from] SignalError),
    #[error("timed out after {0:?}")]
    Timeout(Duration),
    #[error("not authenticated")]
    NotAuthenticated,
    #[error("transport error: {0}")]
    Transport(anyhow::Error),
    #[error("cannot encode message: {0}")]
    Encode(String),
    #[error("relay client is missing {0}")]
    Build(&'static str),
}

/// Moving a phone-number session onto the linked identity failed. Never
/// leaves the session manager or the encryptor; the phone-number address
/// stays in use.
#[derive(Debug, Error)]
pub enum SessionMigrationError {
    #[error("reading sessions for {user}: {source}")]
    Load { user: String, source: StoreError },
    #[error("writing migrated sessions for {user}: {source}")]
    Commit { user: String, source: StoreError },
}
