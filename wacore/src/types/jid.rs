use std::fmt;
use wacore_binary::jid::Jid;

/// Signal protocol address: a name plus a device id.
///
/// The device is encoded in the name itself, so `device_id` is always 0
/// for addresses built from a [`Jid`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ProtocolAddress {
    name: String,
    device_id: u32,
}

impl ProtocolAddress {
    pub fn new(name: String, device_id: u32) -> Self {
        Self { name, device_id }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn device_id(&self) -> u32 {
        self.device_id
    }
}

impl fmt::Display for ProtocolAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.name, self.device_id)
    }
}

pub trait JidExt {
    fn to_protocol_address(&self) -> ProtocolAddress;

    /// Signal address string: `{user}[:device]@{c.us|lid}`.
    /// The `:device` part is only present when the device is non-zero.
    fn to_signal_address_string(&self) -> String;
}

impl JidExt for Jid {
    fn to_signal_address_string(&self) -> String {
        let device_part = match self.device() {
            0 => String::new(),
            d => format!(":{d}"),
        };
        format!(
            "{}{device_part}@{}",
            self.user,
            self.server.signal_domain()
        )
    }

    fn to_protocol_address(&self) -> ProtocolAddress {
        ProtocolAddress::new(self.to_signal_address_string(), 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_signal_address_string_lid_no_device() {
        let jid = Jid::from_str("123456789@lid").expect("test JID should be valid");
        assert_eq!(jid.to_signal_address_string(), "123456789@lid");
    }

    #[test]
    fn test_signal_address_string_lid_with_device() {
        let jid = Jid::from_str("123456789:33@lid").expect("test JID should be valid");
        assert_eq!(jid.to_signal_address_string(), "123456789:33@lid");
    }

    #[test]
    fn test_signal_address_string_phone_number_uses_legacy_domain() {
        let jid = Jid::from_str("5511999887766@s.whatsapp.net").expect("test JID should be valid");
        assert_eq!(jid.to_signal_address_string(), "5511999887766@c.us");
    }

    #[test]
    fn test_protocol_address_appends_device_id() {
        let jid = Jid::from_str("222:1@s.whatsapp.net").expect("test JID should be valid");
        assert_eq!(jid.to_protocol_address().to_string(), "222:1@c.us.0");

        let explicit_zero = Jid::from_str("222:0@s.whatsapp.net").expect("test JID should be valid");
        assert_eq!(explicit_zero.to_protocol_address().to_string(), "222@c.us.0");
    }
}
