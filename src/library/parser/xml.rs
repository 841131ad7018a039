//! Minimal element tree over `quick-xml` events.
//!
//! Only what the package parser needs: qualified element names, attributes,
//! descendant lookup in document order and concatenated text. Names are kept
//! exactly as written (`dc:title` stays `dc:title`); no namespace resolution
//! is done.

use quick_xml::Reader;
use quick_xml::events::{BytesStart, Event};

use crate::library::error::{ExtractError, ExtractResult};

#[derive(Debug, Clone, PartialEq, Eq)]
enum Node {
    Element(Element),
    Text(String),
}

/// An XML element with its attributes and children.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Element {
    name: String,
    attrs: Vec<(String, String)>,
    children: Vec<Node>,
}

impl Element {
    fn new(name: String, attrs: Vec<(String, String)>) -> Self {
        Self {
            name,
            attrs,
            children: Vec::new(),
        }
    }

    /// Qualified name as written in the source.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Attribute value by qualified name.
    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attrs
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    /// All descendants named `name`, in document order.
    pub fn descendants(&self, name: &str) -> Vec<&Element> {
        let mut out = Vec::new();
        self.collect(name, &mut out);
        out
    }

    /// First descendant named `name`.
    pub fn first(&self, name: &str) -> Option<&Element> {
        self.children.iter().find_map(|child| match child {
            Node::Element(el) if el.name == name => Some(el),
            Node::Element(el) => el.first(name),
            Node::Text(_) => None,
        })
    }

    /// Concatenated text of all descendant text nodes.
    pub fn text(&self) -> String {
        let mut out = String::new();
        self.push_text(&mut out);
        out
    }

    fn collect<'a>(&'a self, name: &str, out: &mut Vec<&'a Element>) {
        for child in &self.children {
            if let Node::Element(el) = child {
                if el.name == name {
                    out.push(el);
                }
                el.collect(name, out);
            }
        }
    }

    fn push_text(&self, out: &mut String) {
        for child in &self.children {
            match child {
                Node::Text(text) => out.push_str(text),
                Node::Element(el) => el.push_text(out),
            }
        }
    }
}

fn start_element(e: &BytesStart<'_>) -> Element {
    let name = String::from_utf8_lossy(e.name().as_ref()).into_owned();
    let attrs = e
        .attributes()
        .flatten()
        .map(|attr| {
            let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
            let value = attr
                .unescape_value()
                .map(|v| v.into_owned())
                .unwrap_or_else(|_| String::from_utf8_lossy(&attr.value).into_owned());
            (key, value)
        })
        .collect();
    Element::new(name, attrs)
}

/// Parse `xml` into a document node whose children are the top-level
/// elements. `entry` names the archive entry for error messages.
///
/// Elements still open at end of input are closed implicitly.
pub fn parse(xml: &str, entry: &str) -> ExtractResult<Element> {
    let xml = xml.strip_prefix('\u{feff}').unwrap_or(xml);
    let mut reader = Reader::from_str(xml);
    let mut stack = vec![Element::new(String::new(), Vec::new())];

    let xml_error = |message: String| ExtractError::Xml {
        entry: entry.to_string(),
        message,
    };

    loop {
        match reader.read_event() {
            Ok(Event::Start(ref e)) => stack.push(start_element(e)),
            Ok(Event::Empty(ref e)) => {
                let el = start_element(e);
                if let Some(parent) = stack.last_mut() {
                    parent.children.push(Node::Element(el));
                }
            }
            Ok(Event::End(_)) => {
                if stack.len() > 1 {
                    if let Some(el) = stack.pop() {
                        if let Some(parent) = stack.last_mut() {
                            parent.children.push(Node::Element(el));
                        }
                    }
                }
            }
            Ok(Event::Text(ref e)) => {
                let text = e.unescape().map_err(|err| xml_error(err.to_string()))?;
                if let Some(parent) = stack.last_mut() {
                    parent.children.push(Node::Text(text.into_owned()));
                }
            }
            Ok(Event::CData(ref e)) => {
                if let Some(parent) = stack.last_mut() {
                    parent
                        .children
                        .push(Node::Text(String::from_utf8_lossy(e).into_owned()));
                }
            }
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(err) => {
                return Err(xml_error(format!(
                    "at byte {}: {err}",
                    reader.buffer_position()
                )));
            }
        }
    }

    while stack.len() > 1 {
        if let Some(el) = stack.pop() {
            if let Some(parent) = stack.last_mut() {
                parent.children.push(Node::Element(el));
            }
        }
    }
    stack
        .pop()
        .ok_or_else(|| xml_error("empty element stack".into()))
}
