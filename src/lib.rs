pub use wacore;
pub use wacore_binary;

pub mod client;
pub mod config;
pub mod device_resolver;
pub mod encryptor;
pub mod error;
pub mod keyed_mutex;
pub mod lid_mapping;
pub mod lid_pn_cache;
pub mod loopback;
pub mod message;
pub mod receipt;
pub mod send;
pub mod session;
pub mod store;
pub mod wait;

pub use client::{Account, RelayClient, RelayClientBuilder};
pub use config::RelayConfig;
pub use error::{DecryptionError, RelayError};
pub use send::RelayOptions;
