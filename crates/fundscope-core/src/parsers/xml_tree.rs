//! Namespace-tolerant XML element tree.
//!
//! Element and attribute names are stored without their namespace prefix, so
//! `<nport:invstOrSec>` and `<invstOrSec>` look the same to callers. Name
//! comparisons are ASCII case-insensitive.

use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;

use crate::lookup::FieldAliases;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct XmlNode {
    pub name: String,
    pub attributes: Vec<(String, String)>,
    pub text: String,
    pub children: Vec<XmlNode>,
}

impl XmlNode {
    fn named(name: &str) -> Self {
        Self {
            name: name.to_owned(),
            ..Self::default()
        }
    }

    /// Parses a document into a synthetic `#document` root.
    pub fn parse(bytes: &[u8]) -> Result<Self, String> {
        let mut reader = Reader::from_reader(bytes);
        reader.config_mut().trim_text(true);

        let mut stack = vec![Self::named("#document")];
        let mut buf = Vec::new();

        loop {
            let event = reader
                .read_event_into(&mut buf)
                .map_err(|err| format!("xml error at byte {}: {err}", reader.buffer_position()))?;

            match event {
                Event::Start(start) => stack.push(element(&start)?),
                Event::Empty(start) => {
                    let node = element(&start)?;
                    attach(&mut stack, node);
                }
                Event::End(_) => {
                    if stack.len() > 1 {
                        if let Some(node) = stack.pop() {
                            attach(&mut stack, node);
                        }
                    }
                }
                Event::Text(text) => {
                    let text = text
                        .unescape()
                        .map_err(|err| format!("xml text error: {err}"))?;
                    append_text(&mut stack, &text);
                }
                Event::CData(data) => {
                    let raw = data.into_inner();
                    append_text(&mut stack, &String::from_utf8_lossy(&raw));
                }
                Event::Eof => break,
                _ => {}
            }
            buf.clear();
        }

        while stack.len() > 1 {
            if let Some(node) = stack.pop() {
                attach(&mut stack, node);
            }
        }

        stack.pop().ok_or_else(|| String::from("empty document"))
    }

    pub fn is(&self, name: &str) -> bool {
        self.name.eq_ignore_ascii_case(name)
    }

    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.trim())
            .filter(|value| !value.is_empty())
    }

    /// Trimmed text content, `None` when blank.
    pub fn text(&self) -> Option<&str> {
        let trimmed = self.text.trim();
        (!trimmed.is_empty()).then_some(trimmed)
    }

    /// Pre-order traversal of every descendant (excluding `self`).
    pub fn descendants(&self) -> Descendants<'_> {
        Descendants {
            stack: self.children.iter().rev().collect(),
        }
    }

    pub fn find(&self, name: &str) -> Option<&XmlNode> {
        self.descendants().find(|node| node.is(name))
    }

    pub fn find_all(&self, name: &str) -> Vec<&XmlNode> {
        self.descendants().filter(|node| node.is(name)).collect()
    }

    /// Value of one key: text of a descendant element with that name (or its
    /// `value` attribute), else an attribute with that name on `self` or any
    /// descendant.
    pub fn value_of(&self, key: &str) -> Option<String> {
        let element = self
            .descendants()
            .filter(|node| node.is(key))
            .find_map(|node| node.text().or_else(|| node.attribute("value")));
        if let Some(value) = element {
            return Some(value.to_owned());
        }

        std::iter::once(self)
            .chain(self.descendants())
            .find_map(|node| node.attribute(key))
            .map(str::to_owned)
    }

    /// First populated key, in alias preference order.
    pub fn first_value(&self, aliases: &FieldAliases) -> Option<String> {
        aliases.first(|key| self.value_of(key))
    }
}

pub struct Descendants<'a> {
    stack: Vec<&'a XmlNode>,
}

impl<'a> Iterator for Descendants<'a> {
    type Item = &'a XmlNode;

    fn next(&mut self) -> Option<Self::Item> {
        let node = self.stack.pop()?;
        self.stack.extend(node.children.iter().rev());
        Some(node)
    }
}

fn element(start: &BytesStart<'_>) -> Result<XmlNode, String> {
    let mut node = XmlNode::named(&String::from_utf8_lossy(start.local_name().as_ref()));
    for attribute in start.attributes() {
        let attribute = attribute.map_err(|err| format!("xml attribute error: {err}"))?;
        let key = String::from_utf8_lossy(attribute.key.local_name().as_ref()).into_owned();
        let value = attribute
            .unescape_value()
            .map_err(|err| format!("xml attribute error: {err}"))?
            .into_owned();
        node.attributes.push((key, value));
    }
    Ok(node)
}

fn attach(stack: &mut [XmlNode], node: XmlNode) {
    if let Some(parent) = stack.last_mut() {
        parent.children.push(node);
    }
}

fn append_text(stack: &mut [XmlNode], text: &str) {
    if let Some(current) = stack.last_mut() {
        if !current.text.is_empty() {
            current.text.push(' ');
        }
        current.text.push_str(text);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DOC: &str = r#"<?xml version="1.0"?>
        <edgarSubmission xmlns="http://www.sec.gov/edgar/nport"
                         xmlns:ncom="http://www.sec.gov/edgar/nportcommon">
          <formData>
            <ncom:invstOrSec>
              <ncom:name>Apple Inc</ncom:name>
              <identifiers><isin value="US0378331005"/></identifiers>
              <currencyConditional curCd="EUR" exchangeRt="1.1"/>
            </ncom:invstOrSec>
          </formData>
        </edgarSubmission>"#;

    #[test]
    fn prefixes_are_stripped_from_names() {
        let root = XmlNode::parse(DOC.as_bytes()).expect("parse");
        let investments = root.find_all("invstOrSec");

        assert_eq!(investments.len(), 1);
        assert_eq!(investments[0].value_of("name").as_deref(), Some("Apple Inc"));
    }

    #[test]
    fn value_of_reads_value_and_named_attributes() {
        let root = XmlNode::parse(DOC.as_bytes()).expect("parse");
        let investment = root.find("INVSTORSEC").expect("case-insensitive find");

        assert_eq!(investment.value_of("isin").as_deref(), Some("US0378331005"));
        assert_eq!(investment.value_of("curCd").as_deref(), Some("EUR"));
        assert_eq!(investment.value_of("missing"), None);
    }

    #[test]
    fn mismatched_tags_are_reported_not_panicked() {
        assert!(XmlNode::parse(b"<a><b></a>").is_err());
    }
}
