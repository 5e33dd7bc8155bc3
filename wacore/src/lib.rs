pub mod client;
pub mod decode;
pub mod framing;
pub mod messages;
pub mod payload;
pub mod prekeys;
pub mod proto;
pub mod send;
pub mod signal;
pub mod stanza;
pub mod store;
pub mod types;
pub mod usync;

pub use framing::FramingError;
