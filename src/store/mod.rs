pub mod memory;
pub mod transaction;

pub use memory::MemoryKeyStore;
pub use transaction::{KeyTransaction, TransactionalKeyStore};
pub use wacore::store::{KeyCategory, KeyStore, KeyUpdates, StoreError};
