pub mod attrs;
pub mod builder;
pub mod error;
pub mod jid;
pub mod node;

pub use attrs::AttrParser;
pub use builder::NodeBuilder;
pub use error::{BinaryError, Result};
pub use jid::{Jid, Server};
pub use node::{Attrs, Node, NodeContent};
