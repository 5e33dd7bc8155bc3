//! Phone-number identity <-> linked identity pairs.
//!
//! Mappings are user-level: device indices never appear in an entry and are
//! carried over by the caller when translating a device address.

use serde::{Deserialize, Serialize};
use wacore_binary::jid::Jid;

/// Where a mapping was learned from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LearningSource {
    /// Device sync (usync) response.
    Usync,
    /// Inbound message from a PN sender carrying `sender_lid`.
    PeerPnMessage,
    /// Inbound message from a LID sender carrying `sender_pn`.
    PeerLidMessage,
    /// Directory lookup made while resolving a recipient or mention.
    RecipientLatestLid,
    /// Own identity learned at pairing.
    Pairing,
    Other,
}

impl LearningSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            LearningSource::Usync => "usync",
            LearningSource::PeerPnMessage => "peer_pn_message",
            LearningSource::PeerLidMessage => "peer_lid_message",
            LearningSource::RecipientLatestLid => "recipient_latest_lid",
            LearningSource::Pairing => "pairing",
            LearningSource::Other => "other",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "usync" => LearningSource::Usync,
            "peer_pn_message" => LearningSource::PeerPnMessage,
            "peer_lid_message" => LearningSource::PeerLidMessage,
            "recipient_latest_lid" => LearningSource::RecipientLatestLid,
            "pairing" => LearningSource::Pairing,
            _ => LearningSource::Other,
        }
    }
}

/// One mapping as held in memory and in the `lid-mapping` store category.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LidPnEntry {
    /// LID user part, e.g. `100000012345678`.
    pub lid: String,
    /// Phone number user part, e.g. `559980000001`.
    pub phone_number: String,
    /// Unix seconds when the pair was first seen.
    pub created_at: i64,
    pub learning_source: LearningSource,
}

impl LidPnEntry {
    pub fn new(lid: String, phone_number: String, learning_source: LearningSource) -> Self {
        Self::with_timestamp(
            lid,
            phone_number,
            chrono::Utc::now().timestamp(),
            learning_source,
        )
    }

    pub fn with_timestamp(
        lid: String,
        phone_number: String,
        created_at: i64,
        learning_source: LearningSource,
    ) -> Self {
        Self {
            lid,
            phone_number,
            created_at,
            learning_source,
        }
    }

    pub fn lid_jid(&self) -> Jid {
        Jid::lid(&self.lid)
    }

    pub fn pn_jid(&self) -> Jid {
        Jid::pn(&self.phone_number)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_learning_source_round_trips_through_strings() {
        for source in [
            LearningSource::Usync,
            LearningSource::PeerPnMessage,
            LearningSource::PeerLidMessage,
            LearningSource::RecipientLatestLid,
            LearningSource::Pairing,
            LearningSource::Other,
        ] {
            assert_eq!(LearningSource::parse(source.as_str()), source);
        }
        assert_eq!(LearningSource::parse("unknown"), LearningSource::Other);
    }

    #[test]
    fn test_entry_builds_user_level_jids() {
        let entry = LidPnEntry::with_timestamp(
            "100000012345678".to_string(),
            "559980000001".to_string(),
            1234567890,
            LearningSource::Pairing,
        );
        assert_eq!(entry.lid_jid().to_string(), "100000012345678@lid");
        assert_eq!(entry.pn_jid().to_string(), "559980000001@s.whatsapp.net");
        assert_eq!(entry.created_at, 1234567890);
    }

    #[test]
    fn test_new_entry_is_timestamped() {
        let entry = LidPnEntry::new("1".into(), "2".into(), LearningSource::Usync);
        assert!(entry.created_at > 0);
    }
}
