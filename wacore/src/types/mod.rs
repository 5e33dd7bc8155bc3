pub mod jid;
pub mod lid_pn;
pub mod message;

pub use jid::{JidExt, ProtocolAddress};
pub use lid_pn::{LearningSource, LidPnEntry};
