use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

pub const DEFAULT_USER_SERVER: &str = "s.whatsapp.net";
pub const SERVER_JID: &str = "s.whatsapp.net";
pub const LEGACY_USER_SERVER: &str = "c.us";
pub const GROUP_SERVER: &str = "g.us";
pub const BROADCAST_SERVER: &str = "broadcast";
pub const HIDDEN_USER_SERVER: &str = "lid";
pub const NEWSLETTER_SERVER: &str = "newsletter";
pub const STATUS_BROADCAST_USER: &str = "status";

pub type MessageId = String;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum JidError {
    #[error("Invalid JID format: {0}")]
    InvalidFormat(String),
    #[error("Unknown JID server: {0}")]
    UnknownServer(String),
    #[error("Failed to parse component: {0}")]
    Parse(#[from] std::num::ParseIntError),
}

/// The addressing domain of a [`Jid`].
///
/// `User` is the phone-number identity, `Lid` the linked identity that
/// migrated users are addressed by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Server {
    User,
    Group,
    Broadcast,
    Newsletter,
    Lid,
}

impl Server {
    pub fn as_str(&self) -> &'static str {
        match self {
            Server::User => DEFAULT_USER_SERVER,
            Server::Group => GROUP_SERVER,
            Server::Broadcast => BROADCAST_SERVER,
            Server::Newsletter => NEWSLETTER_SERVER,
            Server::Lid => HIDDEN_USER_SERVER,
        }
    }

    /// Server name used in Signal addresses (`c.us` for phone numbers).
    pub fn signal_domain(&self) -> &'static str {
        match self {
            Server::User => LEGACY_USER_SERVER,
            other => other.as_str(),
        }
    }
}

impl FromStr for Server {
    type Err = JidError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            DEFAULT_USER_SERVER | LEGACY_USER_SERVER => Ok(Server::User),
            GROUP_SERVER => Ok(Server::Group),
            BROADCAST_SERVER => Ok(Server::Broadcast),
            NEWSLETTER_SERVER => Ok(Server::Newsletter),
            HIDDEN_USER_SERVER => Ok(Server::Lid),
            other => Err(JidError::UnknownServer(other.to_string())),
        }
    }
}

impl fmt::Display for Server {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A wire address: `user[:device]@server`.
///
/// `device` is `None` when the address names a user rather than one of
/// their devices. An explicit `Some(0)` is kept distinct from `None` in
/// memory even though both print the same way.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Jid {
    pub user: String,
    pub server: Server,
    pub device: Option<u16>,
}

impl Jid {
    pub fn new(user: &str, server: Server) -> Self {
        Self {
            user: user.to_string(),
            server,
            device: None,
        }
    }

    pub fn pn(user: &str) -> Self {
        Self::new(user, Server::User)
    }

    pub fn lid(user: &str) -> Self {
        Self::new(user, Server::Lid)
    }

    pub fn group(id: &str) -> Self {
        Self::new(id, Server::Group)
    }

    pub fn status_broadcast() -> Self {
        Self::new(STATUS_BROADCAST_USER, Server::Broadcast)
    }

    /// The bare `s.whatsapp.net` address used as the target of server queries.
    pub fn server_jid() -> Self {
        Self::new("", Server::User)
    }

    pub fn with_device(mut self, device: u16) -> Self {
        self.device = Some(device);
        self
    }

    /// Device index, treating a user address as its primary device.
    pub fn device(&self) -> u16 {
        self.device.unwrap_or(0)
    }

    pub fn has_explicit_device(&self) -> bool {
        self.device.is_some()
    }

    pub fn to_non_ad(&self) -> Self {
        Self {
            user: self.user.clone(),
            server: self.server,
            device: None,
        }
    }

    /// Same user on another server, keeping the device index.
    pub fn with_server_user(&self, server: Server, user: &str) -> Self {
        Self {
            user: user.to_string(),
            server,
            device: self.device,
        }
    }

    pub fn is_ad(&self) -> bool {
        self.device() > 0 && self.is_user()
    }

    pub fn is_pn(&self) -> bool {
        self.server == Server::User && !self.user.is_empty()
    }

    pub fn is_lid(&self) -> bool {
        self.server == Server::Lid
    }

    /// Phone-number or linked identity of a person (not a group or channel).
    pub fn is_user(&self) -> bool {
        self.is_pn() || self.is_lid()
    }

    pub fn is_group(&self) -> bool {
        self.server == Server::Group
    }

    pub fn is_broadcast(&self) -> bool {
        self.server == Server::Broadcast
    }

    pub fn is_status_broadcast(&self) -> bool {
        self.server == Server::Broadcast && self.user == STATUS_BROADCAST_USER
    }

    pub fn is_broadcast_list(&self) -> bool {
        self.server == Server::Broadcast && self.user != STATUS_BROADCAST_USER
    }

    pub fn is_newsletter(&self) -> bool {
        self.server == Server::Newsletter
    }

    pub fn is_same_user_as(&self, other: &Jid) -> bool {
        self.user == other.user && self.server == other.server
    }
}

impl FromStr for Jid {
    type Err = JidError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (user_part, server) = match s.split_once('@') {
            Some((u, srv)) => (u, srv),
            None => ("", s),
        };
        let server: Server = server.parse()?;

        if user_part.is_empty() {
            return Ok(Jid::new("", server));
        }

        let (user, device) = match user_part.rsplit_once(':') {
            Some((u, d)) => (u, Some(d.parse::<u16>()?)),
            None => (user_part, None),
        };
        if user.is_empty() {
            return Err(JidError::InvalidFormat(s.to_string()));
        }

        Ok(Jid {
            user: user.to_string(),
            server,
            device,
        })
    }
}

impl fmt::Display for Jid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.user.is_empty() {
            return write!(f, "{}", self.server);
        }
        write!(f, "{}", self.user)?;
        if let Some(device) = self.device
            && device > 0
        {
            write!(f, ":{device}")?;
        }
        write!(f, "@{}", self.server)
    }
}

impl From<Jid> for String {
    fn from(jid: Jid) -> Self {
        jid.to_string()
    }
}

impl TryFrom<String> for Jid {
    type Error = JidError;
    fn try_from(value: String) -> Result<Self, Self::Error> {
        Jid::from_str(&value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_device_addresses() {
        let jid: Jid = "5511999887766:12@s.whatsapp.net".parse().unwrap();
        assert_eq!(jid.user, "5511999887766");
        assert_eq!(jid.server, Server::User);
        assert_eq!(jid.device, Some(12));
        assert!(jid.is_ad());
        assert_eq!(jid.to_string(), "5511999887766:12@s.whatsapp.net");
    }

    #[test]
    fn legacy_server_is_phone_number() {
        let jid: Jid = "123@c.us".parse().unwrap();
        assert_eq!(jid.server, Server::User);
        assert_eq!(jid.to_string(), "123@s.whatsapp.net");
    }

    #[test]
    fn explicit_zero_device_is_kept_but_not_printed() {
        let jid: Jid = "123:0@lid".parse().unwrap();
        assert_eq!(jid.device, Some(0));
        assert!(jid.has_explicit_device());
        assert_eq!(jid.to_string(), "123@lid");
        assert!(!"123@lid".parse::<Jid>().unwrap().has_explicit_device());
    }

    #[test]
    fn server_only_addresses() {
        let jid: Jid = "s.whatsapp.net".parse().unwrap();
        assert!(jid.user.is_empty());
        assert_eq!(jid, Jid::server_jid());
        assert_eq!(jid.to_string(), "s.whatsapp.net");
    }

    #[test]
    fn rejects_unknown_servers() {
        assert!(matches!(
            "1@example.com".parse::<Jid>(),
            Err(JidError::UnknownServer(_))
        ));
        assert!(":3@s.whatsapp.net".parse::<Jid>().is_err());
    }

    #[test]
    fn broadcast_classification() {
        let status = Jid::status_broadcast();
        assert!(status.is_status_broadcast());
        assert!(!status.is_broadcast_list());
        let list: Jid = "1234@broadcast".parse().unwrap();
        assert!(list.is_broadcast_list());
        assert!(!list.is_user());
    }

    #[test]
    fn same_user_ignores_device_only() {
        let a: Jid = "111:3@s.whatsapp.net".parse().unwrap();
        let b: Jid = "111@s.whatsapp.net".parse().unwrap();
        let c: Jid = "111@lid".parse().unwrap();
        assert!(a.is_same_user_as(&b));
        assert!(!a.is_same_user_as(&c));
    }
}
