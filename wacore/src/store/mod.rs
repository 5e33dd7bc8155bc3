pub mod error;
pub mod traits;

pub use error::{Result, StoreError};
pub use traits::{KeyCategory, KeyStore, KeyUpdates, decode_value, encode_value};
