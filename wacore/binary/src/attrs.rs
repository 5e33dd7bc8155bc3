use crate::error::{BinaryError, Result};
use crate::jid::Jid;
use crate::node::{Attrs, Node};

/// Reads typed attributes from a node, collecting every failure so a caller
/// can report all of them at once through [`AttrParser::finish`].
pub struct AttrParser<'a> {
    pub attrs: &'a Attrs,
    pub errors: Vec<BinaryError>,
}

impl<'a> AttrParser<'a> {
    pub fn new(node: &'a Node) -> Self {
        Self {
            attrs: &node.attrs,
            errors: Vec::new(),
        }
    }

    pub fn ok(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn finish(&self) -> Result<()> {
        match self.errors.as_slice() {
            [] => Ok(()),
            [single] => Err(single.clone()),
            _ => Err(BinaryError::AttrList(self.errors.clone())),
        }
    }

    fn get_raw(&mut self, key: &str, require: bool) -> Option<&'a str> {
        let val = self.attrs.get(key).map(String::as_str);
        if require && val.is_none() {
            self.errors.push(BinaryError::MissingAttr(key.to_string()));
        }
        val
    }

    pub fn optional_string(&mut self, key: &str) -> Option<&'a str> {
        self.get_raw(key, false)
    }

    pub fn required_string(&mut self, key: &str) -> Result<&'a str> {
        self.optional_string(key)
            .ok_or_else(|| BinaryError::MissingAttr(key.to_string()))
    }

    pub fn optional_jid(&mut self, key: &str) -> Option<Jid> {
        let raw = self.get_raw(key, false)?;
        match raw.parse::<Jid>() {
            Ok(jid) => Some(jid),
            Err(e) => {
                self.errors.push(BinaryError::AttrParse(format!(
                    "Invalid JID '{raw}' for key '{key}': {e}"
                )));
                None
            }
        }
    }

    /// Required JID. Missing or malformed values are recorded as errors.
    pub fn jid(&mut self, key: &str) -> Option<Jid> {
        self.get_raw(key, true)?;
        self.optional_jid(key)
    }

    pub fn non_ad_jid(&mut self, key: &str) -> Option<Jid> {
        self.jid(key).map(|j| j.to_non_ad())
    }

    pub fn optional_bool(&mut self, key: &str) -> bool {
        match self.get_raw(key, false) {
            None => false,
            Some("true") | Some("1") => true,
            Some("false") | Some("0") => false,
            Some(other) => {
                self.errors.push(BinaryError::AttrParse(format!(
                    "Failed to parse bool from '{other}' for key '{key}'"
                )));
                false
            }
        }
    }

    fn parse_number<T: std::str::FromStr>(&mut self, key: &str, require: bool) -> Option<T>
    where
        T::Err: std::fmt::Display,
    {
        let raw = self.get_raw(key, require)?;
        match raw.parse::<T>() {
            Ok(v) => Some(v),
            Err(e) => {
                self.errors.push(BinaryError::AttrParse(format!(
                    "Failed to parse number from '{raw}' for key '{key}': {e}"
                )));
                None
            }
        }
    }

    pub fn optional_u64(&mut self, key: &str) -> Option<u64> {
        self.parse_number(key, false)
    }

    pub fn optional_u16(&mut self, key: &str) -> Option<u16> {
        self.parse_number(key, false)
    }

    pub fn optional_unix_time(&mut self, key: &str) -> Option<i64> {
        self.parse_number(key, false)
    }

    pub fn unix_time(&mut self, key: &str) -> i64 {
        self.parse_number(key, true).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use crate::builder::NodeBuilder;
    use crate::error::BinaryError;

    #[test]
    fn collects_all_errors() {
        let node = NodeBuilder::new("message")
            .attr("from", "nope@example.org")
            .attr("t", "soon")
            .build();
        let mut attrs = node.attrs();
        assert!(attrs.jid("from").is_none());
        assert_eq!(attrs.unix_time("t"), 0);
        assert!(attrs.jid("participant").is_none());
        match attrs.finish() {
            Err(BinaryError::AttrList(list)) => assert_eq!(list.len(), 3),
            other => panic!("expected attribute list error, got {other:?}"),
        }
    }

    #[test]
    fn single_missing_attr_is_reported_directly() {
        let node = NodeBuilder::new("message").build();
        let mut attrs = node.attrs();
        let _ = attrs.jid("from");
        assert!(matches!(attrs.finish(), Err(BinaryError::MissingAttr(k)) if k == "from"));
    }

    #[test]
    fn optional_values_do_not_fail() {
        let node = NodeBuilder::new("device")
            .attr("id", "3")
            .attr("is_sender", "true")
            .build();
        let mut attrs = node.attrs();
        assert_eq!(attrs.optional_u16("id"), Some(3));
        assert_eq!(attrs.optional_u16("key-index"), None);
        assert!(attrs.optional_bool("is_sender"));
        assert!(attrs.finish().is_ok());
    }
}
