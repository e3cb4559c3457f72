//! A minimal tagged-document tree for directory response bodies.
//!
//! The directory's XML is shallow and always well-formed (a `<body>` with a
//! handful of leaf fields), so this is a tree of tag/text/children rather
//! than a general-purpose DOM: enough to read `res["data"]["body"]["Foo"]`
//! style fields without pulling in a full XML object model.

use quick_xml::events::Event;
use quick_xml::Reader;

use crate::core::error::DirectoryError;

/// One element of a parsed directory response body.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct XmlNode {
    /// Element tag name.
    pub tag: String,
    /// Concatenated text content directly inside this element.
    pub text: String,
    /// Child elements, in document order.
    pub children: Vec<XmlNode>,
}

impl XmlNode {
    /// Parse a complete XML document into its root node.
    pub fn parse(xml: &str) -> Result<XmlNode, DirectoryError> {
        let mut reader = Reader::from_str(xml);
        reader.config_mut().trim_text(true);

        // Stack of (node-in-progress) frames; the bottom frame collects
        // whatever sits outside a single root tag (there shouldn't be
        // anything) so the real root is always `stack[1]` once parsing
        // finishes, or `stack[0]` if the document never opened a tag.
        let mut stack: Vec<XmlNode> = vec![XmlNode::default()];

        loop {
            let event = reader
                .read_event()
                .map_err(|e| DirectoryError::MalformedResponse(format!("XML parse error: {e}")))?;
            match event {
                Event::Start(tag) => {
                    let name = String::from_utf8_lossy(tag.name().as_ref()).into_owned();
                    stack.push(XmlNode {
                        tag: name,
                        ..Default::default()
                    });
                }
                Event::Empty(tag) => {
                    let name = String::from_utf8_lossy(tag.name().as_ref()).into_owned();
                    let node = XmlNode {
                        tag: name,
                        ..Default::default()
                    };
                    stack
                        .last_mut()
                        .expect("root frame is never popped")
                        .children
                        .push(node);
                }
                Event::Text(text) => {
                    let decoded = text.unescape().map_err(|e| {
                        DirectoryError::MalformedResponse(format!("XML text decode error: {e}"))
                    })?;
                    if let Some(top) = stack.last_mut() {
                        top.text.push_str(&decoded);
                    }
                }
                Event::End(_) => {
                    let finished = stack
                        .pop()
                        .ok_or_else(|| DirectoryError::MalformedResponse("unbalanced XML tags".into()))?;
                    stack
                        .last_mut()
                        .expect("root frame is never popped")
                        .children
                        .push(finished);
                }
                Event::Eof => break,
                _ => {}
            }
        }

        let root = stack
            .pop()
            .expect("root frame is never popped")
            .children
            .into_iter()
            .next()
            .ok_or_else(|| DirectoryError::MalformedResponse("no root element".into()))?;
        Ok(root)
    }

    /// The first direct child with the given tag name, if any.
    pub fn child(&self, tag: &str) -> Option<&XmlNode> {
        self.children.iter().find(|c| c.tag == tag)
    }

    /// Shorthand for `self.child(tag).map(|n| n.text.as_str())`.
    pub fn text_of(&self, tag: &str) -> Option<&str> {
        self.child(tag).map(|n| n.text.as_str())
    }

    /// Walk a path of nested tag names, returning the innermost node.
    pub fn path(&self, tags: &[&str]) -> Option<&XmlNode> {
        let mut node = self;
        for tag in tags {
            node = node.child(tag)?;
        }
        Some(node)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_flat_fields() {
        let xml = "<body><US>1.2.3.4:8800</US></body>";
        let root = XmlNode::parse(xml).unwrap();
        assert_eq!(root.tag, "body");
        assert_eq!(root.text_of("US"), Some("1.2.3.4:8800"));
    }

    #[test]
    fn parses_nested_and_multiple_fields() {
        let xml = "<body><Token>abc123</Token><Agent>5.6.7.8:9000</Agent></body>";
        let root = XmlNode::parse(xml).unwrap();
        assert_eq!(root.text_of("Token"), Some("abc123"));
        assert_eq!(root.text_of("Agent"), Some("5.6.7.8:9000"));
    }

    #[test]
    fn path_walks_nesting() {
        let xml = "<response><body><LocalAddr>127.0.0.1:1234</LocalAddr></body></response>";
        let root = XmlNode::parse(xml).unwrap();
        let node = root.path(&["body", "LocalAddr"]).unwrap();
        assert_eq!(node.text, "127.0.0.1:1234");
    }

    #[test]
    fn empty_element_has_no_text() {
        let xml = "<body><Flag/></body>";
        let root = XmlNode::parse(xml).unwrap();
        assert_eq!(root.text_of("Flag"), Some(""));
    }

    #[test]
    fn rejects_unbalanced_tags() {
        let xml = "<body><US>1.2.3.4</body>";
        assert!(XmlNode::parse(xml).is_err());
    }

    #[test]
    fn rejects_empty_document() {
        assert!(XmlNode::parse("").is_err());
    }
}
