//! Inbound `message` nodes: classification, decryption and normalization
//! into an [`Envelope`](wacore::types::message::Envelope).

mod decrypt;
mod mentions;

pub use mentions::rewrite_lid_mentions;
