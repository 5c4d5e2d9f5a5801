//! Minimal owned XML element tree
//!
//! Feed documents are small enough to be held in memory, and both entry
//! formats need random access to nested elements. Elements keep their local
//! name and resolved namespace; attributes are stored by local name.

use crate::error::{IngestError, Result};
use quick_xml::escape::escape;
use quick_xml::events::{BytesStart, Event};
use quick_xml::name::ResolveResult;
use quick_xml::NsReader;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct XmlElement {
    pub name: String,
    pub namespace: Option<String>,
    pub attributes: Vec<(String, String)>,
    /// Concatenated text and CDATA directly inside this element
    pub text: String,
    pub children: Vec<XmlElement>,
}

impl XmlElement {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    fn from_start(start: &BytesStart<'_>, namespace: ResolveResult<'_>) -> Result<Self> {
        let name = String::from_utf8_lossy(start.local_name().as_ref()).into_owned();
        let namespace = match namespace {
            ResolveResult::Bound(ns) => Some(String::from_utf8_lossy(ns.as_ref()).into_owned()),
            _ => None,
        };

        let mut attributes = Vec::new();
        for attr in start.attributes() {
            let attr = attr.map_err(quick_xml::Error::from)?;
            if attr.key.as_namespace_binding().is_some() {
                continue;
            }
            let key = String::from_utf8_lossy(attr.key.local_name().as_ref()).into_owned();
            attributes.push((key, attr.unescape_value()?.into_owned()));
        }

        Ok(Self {
            name,
            namespace,
            attributes,
            ..Self::default()
        })
    }

    pub fn is(&self, name: &str) -> bool {
        self.name == name
    }

    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    /// Trimmed text, `None` when blank
    pub fn text(&self) -> Option<&str> {
        let text = self.text.trim();
        (!text.is_empty()).then_some(text)
    }

    pub fn child(&self, name: &str) -> Option<&XmlElement> {
        self.children.iter().find(|c| c.is(name))
    }

    pub fn children_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a XmlElement> + 'a {
        self.children.iter().filter(move |c| c.is(name))
    }

    /// Follow a `/`-separated path of direct children
    pub fn find(&self, path: &str) -> Option<&XmlElement> {
        path.split('/')
            .filter(|step| !step.is_empty())
            .try_fold(self, |node, step| node.child(step))
    }

    pub fn find_text(&self, path: &str) -> Option<&str> {
        self.find(path).and_then(XmlElement::text)
    }

    /// First element named `name` in document order, this element included
    pub fn descendant(&self, name: &str) -> Option<&XmlElement> {
        self.descendant_outside(name, &[])
    }

    /// Like [`descendant`](Self::descendant) without entering elements named in `skip`
    pub fn descendant_outside(&self, name: &str, skip: &[&str]) -> Option<&XmlElement> {
        if self.is(name) {
            return Some(self);
        }
        self.children
            .iter()
            .filter(|c| !skip.contains(&c.name.as_str()))
            .find_map(|c| c.descendant_outside(name, skip))
    }

    /// Every element named `name` below this one, in document order
    pub fn descendants<'a>(&'a self, name: &str) -> Vec<&'a XmlElement> {
        let mut found = Vec::new();
        self.collect_descendants(name, &mut found);
        found
    }

    fn collect_descendants<'a>(&'a self, name: &str, found: &mut Vec<&'a XmlElement>) {
        for child in &self.children {
            if child.is(name) {
                found.push(child);
            }
            child.collect_descendants(name, found);
        }
    }

    /// Serialize back to markup, namespaces dropped
    pub fn to_xml(&self) -> String {
        let mut out = String::new();
        self.write_xml(&mut out);
        out
    }

    fn write_xml(&self, out: &mut String) {
        out.push('<');
        out.push_str(&self.name);
        for (key, value) in &self.attributes {
            out.push(' ');
            out.push_str(key);
            out.push_str("=\"");
            out.push_str(&escape(value.as_str()));
            out.push('"');
        }
        if self.text.is_empty() && self.children.is_empty() {
            out.push_str("/>");
            return;
        }
        out.push('>');
        out.push_str(&escape(self.text.as_str()));
        for child in &self.children {
            child.write_xml(out);
        }
        out.push_str("</");
        out.push_str(&self.name);
        out.push('>');
    }
}

fn attach(stack: &mut [XmlElement], root: &mut Option<XmlElement>, element: XmlElement) {
    match stack.last_mut() {
        Some(parent) => parent.children.push(element),
        None => {
            if root.is_none() {
                *root = Some(element);
            }
        },
    }
}

/// Parse a complete document into its root element
pub fn parse_document(input: &[u8]) -> Result<XmlElement> {
    let mut reader = NsReader::from_reader(input);
    let mut buf = Vec::new();
    let mut stack: Vec<XmlElement> = Vec::new();
    let mut root: Option<XmlElement> = None;

    loop {
        let (namespace, event) = reader.read_resolved_event_into(&mut buf)?;
        match event {
            Event::Start(start) => {
                stack.push(XmlElement::from_start(&start, namespace)?);
            },
            Event::Empty(start) => {
                let element = XmlElement::from_start(&start, namespace)?;
                attach(&mut stack, &mut root, element);
            },
            Event::End(_) => {
                if let Some(element) = stack.pop() {
                    attach(&mut stack, &mut root, element);
                }
            },
            Event::Text(text) => {
                if let Some(current) = stack.last_mut() {
                    current.text.push_str(&text.unescape()?);
                }
            },
            Event::CData(data) => {
                if let Some(current) = stack.last_mut() {
                    current
                        .text
                        .push_str(&String::from_utf8_lossy(&data.into_inner()));
                }
            },
            Event::Eof => break,
            _ => {},
        }
        buf.clear();
    }

    if let Some(open) = stack.last() {
        return Err(IngestError::MalformedFeed(format!(
            "document ends inside <{}>",
            open.name
        )));
    }

    root.ok_or_else(|| IngestError::MalformedFeed("document has no root element".to_string()))
}
