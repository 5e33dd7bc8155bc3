use crate::attrs::AttrParser;
use crate::error::{BinaryError, Result};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Node attributes in insertion order. Values are always strings on the wire.
pub type Attrs = IndexMap<String, String>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum NodeContent {
    Bytes(Vec<u8>),
    String(String),
    Nodes(Vec<Node>),
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Node {
    pub tag: String,
    pub attrs: Attrs,
    pub content: Option<NodeContent>,
}

impl Node {
    pub fn new(tag: &str, attrs: Attrs, content: Option<NodeContent>) -> Self {
        Self {
            tag: tag.to_string(),
            attrs,
            content,
        }
    }

    pub fn children(&self) -> Option<&[Node]> {
        match &self.content {
            Some(NodeContent::Nodes(nodes)) => Some(nodes),
            _ => None,
        }
    }

    /// Mutable child list, turning empty or non-list content into an empty list first.
    pub fn children_mut(&mut self) -> &mut Vec<Node> {
        if !matches!(self.content, Some(NodeContent::Nodes(_))) {
            self.content = Some(NodeContent::Nodes(Vec::new()));
        }
        match &mut self.content {
            Some(NodeContent::Nodes(nodes)) => nodes,
            _ => unreachable!("content was just set to a node list"),
        }
    }

    pub fn attrs(&self) -> AttrParser<'_> {
        AttrParser::new(self)
    }

    pub fn attr(&self, key: &str) -> Option<&str> {
        self.attrs.get(key).map(String::as_str)
    }

    /// Leaf payload bytes, if this node carries binary content.
    pub fn bytes(&self) -> Option<&[u8]> {
        match &self.content {
            Some(NodeContent::Bytes(b)) => Some(b),
            _ => None,
        }
    }

    pub fn require_bytes(&self) -> Result<&[u8]> {
        self.bytes().ok_or_else(|| BinaryError::UnexpectedContent {
            tag: self.tag.clone(),
            expected: "bytes",
        })
    }

    pub fn get_optional_child(&self, tag: &str) -> Option<&Node> {
        self.children()?.iter().find(|c| c.tag == tag)
    }

    /// Walks a path of tags, taking the first matching child at each level.
    pub fn get_optional_child_by_tag(&self, tags: &[&str]) -> Option<&Node> {
        let mut current = self;
        for tag in tags {
            current = current.get_optional_child(tag)?;
        }
        Some(current)
    }

    pub fn get_children_by_tag<'a>(&'a self, tag: &'a str) -> impl Iterator<Item = &'a Node> {
        self.children()
            .unwrap_or_default()
            .iter()
            .filter(move |c| c.tag == tag)
    }
}

impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<{}", self.tag)?;
        for (k, v) in &self.attrs {
            write!(f, " {k}=\"{v}\"")?;
        }
        match &self.content {
            None => write!(f, "/>"),
            Some(NodeContent::Bytes(b)) => write!(f, "><!-- {} bytes --></{}>", b.len(), self.tag),
            Some(NodeContent::String(s)) => write!(f, ">{s}</{}>", self.tag),
            Some(NodeContent::Nodes(nodes)) => {
                write!(f, ">")?;
                for node in nodes {
                    write!(f, "{node}")?;
                }
                write!(f, "</{}>", self.tag)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::NodeBuilder;

    #[test]
    fn child_lookup_by_path() {
        let node = NodeBuilder::new("iq")
            .children([NodeBuilder::new("usync")
                .children([NodeBuilder::new("list").attr("n", "1").build()])
                .build()])
            .build();
        let list = node.get_optional_child_by_tag(&["usync", "list"]).unwrap();
        assert_eq!(list.attr("n"), Some("1"));
        assert!(node.get_optional_child_by_tag(&["usync", "missing"]).is_none());
    }

    #[test]
    fn children_mut_replaces_leaf_content() {
        let mut node = NodeBuilder::new("message").bytes(vec![1, 2]).build();
        node.children_mut().push(NodeBuilder::new("enc").build());
        assert_eq!(node.children().map(<[Node]>::len), Some(1));
    }

    #[test]
    fn display_is_readable() {
        let node = NodeBuilder::new("enc")
            .attr("v", "2")
            .bytes(vec![0; 3])
            .build();
        assert_eq!(node.to_string(), "<enc v=\"2\"><!-- 3 bytes --></enc>");
    }

    #[test]
    fn require_bytes_reports_tag() {
        let node = NodeBuilder::new("plaintext").build();
        let err = node.require_bytes().unwrap_err();
        assert!(err.to_string().contains("plaintext"));
    }
}
