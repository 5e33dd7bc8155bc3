//! Stanza pieces appended to or built beside the `message` node.

pub mod decorators;
pub mod receipt;

pub use decorators::{DecoratorContext, StanzaDecorator, decorate};
pub use receipt::build_receipt;
