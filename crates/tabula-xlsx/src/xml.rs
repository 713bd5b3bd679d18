//! Tree codec: parse a part into an owned element tree and serialize it back.
//!
//! Element and attribute names are kept exactly as written (including prefixes and `xmlns`
//! declarations) and attributes keep their source order, so a parsed tree re-serializes without
//! renaming anything. Lookups by local name ignore prefixes.

use std::borrow::Cow;
use std::io::Write;

use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::{Reader, Writer};

use crate::error::XlsxError;

pub(crate) const NS_MAIN: &str = "http://schemas.openxmlformats.org/spreadsheetml/2006/main";
pub(crate) const NS_REL: &str =
    "http://schemas.openxmlformats.org/officeDocument/2006/relationships";

#[derive(Clone, Debug, PartialEq)]
pub enum XmlNode {
    Element(XmlElement),
    Text(String),
}

#[derive(Clone, Debug, PartialEq)]
pub struct XmlElement {
    /// Qualified name as written, e.g. `x:c` or `c`.
    pub name: String,
    pub attrs: Vec<(String, String)>,
    pub children: Vec<XmlNode>,
}

fn local_part(name: &str) -> &str {
    name.rsplit_once(':').map_or(name, |(_, local)| local)
}

impl XmlElement {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            attrs: Vec::new(),
            children: Vec::new(),
        }
    }

    pub fn local_name(&self) -> &str {
        local_part(&self.name)
    }

    /// Attribute value by exact qualified name.
    pub fn attr(&self, key: &str) -> Option<&str> {
        self.attrs
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// The relationship id attribute (`r:id` under whatever prefix the producer chose).
    pub fn rel_id(&self) -> Option<&str> {
        self.attrs
            .iter()
            .find(|(k, _)| k.contains(':') && !k.starts_with("xmlns") && local_part(k) == "id")
            .map(|(_, v)| v.as_str())
    }

    pub fn set_attr(&mut self, key: &str, value: impl Into<String>) {
        let value = value.into();
        match self.attrs.iter_mut().find(|(k, _)| k == key) {
            Some((_, existing)) => *existing = value,
            None => self.attrs.push((key.to_string(), value)),
        }
    }

    pub fn remove_attr(&mut self, key: &str) {
        self.attrs.retain(|(k, _)| k != key);
    }

    pub fn with_attr(mut self, key: &str, value: impl Into<String>) -> Self {
        self.set_attr(key, value);
        self
    }

    pub fn with_child(mut self, child: XmlElement) -> Self {
        self.children.push(XmlNode::Element(child));
        self
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.children.push(XmlNode::Text(text.into()));
        self
    }

    pub fn push(&mut self, child: XmlElement) {
        self.children.push(XmlNode::Element(child));
    }

    pub fn elements(&self) -> impl Iterator<Item = &XmlElement> {
        self.children.iter().filter_map(|node| match node {
            XmlNode::Element(el) => Some(el),
            XmlNode::Text(_) => None,
        })
    }

    pub fn child(&self, local: &str) -> Option<&XmlElement> {
        self.elements().find(|el| el.local_name() == local)
    }

    pub fn child_mut(&mut self, local: &str) -> Option<&mut XmlElement> {
        self.children.iter_mut().find_map(|node| match node {
            XmlNode::Element(el) if el.local_name() == local => Some(el),
            _ => None,
        })
    }

    pub fn children_by_local<'a>(
        &'a self,
        local: &'a str,
    ) -> impl Iterator<Item = &'a XmlElement> + 'a {
        self.elements().filter(move |el| el.local_name() == local)
    }

    /// Concatenated direct text content.
    pub fn text(&self) -> Cow<'_, str> {
        let mut texts = self.children.iter().filter_map(|node| match node {
            XmlNode::Text(t) => Some(t.as_str()),
            XmlNode::Element(_) => None,
        });
        match (texts.next(), texts.next()) {
            (None, _) => Cow::Borrowed(""),
            (Some(one), None) => Cow::Borrowed(one),
            (Some(first), Some(second)) => {
                let mut out = String::from(first);
                out.push_str(second);
                texts.for_each(|t| out.push_str(t));
                Cow::Owned(out)
            }
        }
    }

    /// Parse `bytes` into a tree. `part` names the entry in error messages.
    pub fn parse(bytes: &[u8], part: &str) -> Result<Self, XlsxError> {
        let mut reader = Reader::from_reader(bytes);
        reader.config_mut().trim_text(false);

        let mut buf = Vec::new();
        let mut stack: Vec<XmlElement> = Vec::new();
        let mut root: Option<XmlElement> = None;

        loop {
            let position = reader.buffer_position() as u64;
            let event = reader
                .read_event_into(&mut buf)
                .map_err(|err| XlsxError::from_xml(part, position, err))?;
            match event {
                Event::Start(start) => {
                    stack.push(element_from_start(&start, part, position)?);
                }
                Event::Empty(start) => {
                    let el = element_from_start(&start, part, position)?;
                    attach(&mut stack, &mut root, el, part, position)?;
                }
                Event::End(end) => {
                    let Some(el) = stack.pop() else {
                        return Err(XlsxError::parse(part, position, "unexpected closing tag"));
                    };
                    if end.name().as_ref() != el.name.as_bytes() {
                        return Err(XlsxError::parse(
                            part,
                            position,
                            format!(
                                "mismatched closing tag </{}> for <{}>",
                                String::from_utf8_lossy(end.name().as_ref()),
                                el.name
                            ),
                        ));
                    }
                    attach(&mut stack, &mut root, el, part, position)?;
                }
                Event::Text(text) => {
                    let Some(parent) = stack.last_mut() else {
                        continue;
                    };
                    let value = text
                        .unescape()
                        .map_err(|err| XlsxError::from_xml(part, position, err))?;
                    if value.trim().is_empty() && !preserves_whitespace(parent) {
                        continue;
                    }
                    push_text(parent, &value);
                }
                Event::CData(data) => {
                    if let Some(parent) = stack.last_mut() {
                        push_text(parent, &String::from_utf8_lossy(&data));
                    }
                }
                Event::Eof => break,
                _ => {}
            }
            buf.clear();
        }

        if !stack.is_empty() {
            return Err(XlsxError::parse(
                part,
                reader.buffer_position() as u64,
                "unexpected end of document inside an element",
            ));
        }
        root.ok_or_else(|| XlsxError::parse(part, 0, "document has no root element"))
    }

    /// Serialize with an XML declaration. `pretty` indents nested elements by two spaces.
    pub fn to_xml_bytes(&self, pretty: bool) -> Result<Vec<u8>, XlsxError> {
        let mut writer = if pretty {
            Writer::new_with_indent(Vec::new(), b' ', 2)
        } else {
            Writer::new(Vec::new())
        };
        writer.write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), Some("yes"))))?;
        if !pretty {
            writer.get_mut().push(b'\n');
        }
        write_element(&mut writer, self)?;
        Ok(writer.into_inner())
    }
}

fn preserves_whitespace(el: &XmlElement) -> bool {
    matches!(el.local_name(), "t" | "v" | "f" | "definedName")
        || el.attr("xml:space") == Some("preserve")
}

fn push_text(parent: &mut XmlElement, value: &str) {
    if let Some(XmlNode::Text(existing)) = parent.children.last_mut() {
        existing.push_str(value);
    } else {
        parent.children.push(XmlNode::Text(value.to_string()));
    }
}

fn element_from_start(
    start: &BytesStart<'_>,
    part: &str,
    position: u64,
) -> Result<XmlElement, XlsxError> {
    let mut el = XmlElement::new(String::from_utf8_lossy(start.name().as_ref()).into_owned());
    for attr in start.attributes() {
        let attr = attr.map_err(|err| XlsxError::parse(part, position, err.to_string()))?;
        let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
        let value = attr
            .unescape_value()
            .map_err(|err| XlsxError::from_xml(part, position, err))?
            .into_owned();
        el.attrs.push((key, value));
    }
    Ok(el)
}

fn attach(
    stack: &mut [XmlElement],
    root: &mut Option<XmlElement>,
    el: XmlElement,
    part: &str,
    position: u64,
) -> Result<(), XlsxError> {
    match stack.last_mut() {
        Some(parent) => parent.children.push(XmlNode::Element(el)),
        None if root.is_none() => *root = Some(el),
        None => {
            return Err(XlsxError::parse(
                part,
                position,
                "more than one root element",
            ))
        }
    }
    Ok(())
}

pub(crate) fn write_element<W: Write>(
    writer: &mut Writer<W>,
    el: &XmlElement,
) -> Result<(), XlsxError> {
    let mut start = BytesStart::new(el.name.as_str());
    for (k, v) in &el.attrs {
        start.push_attribute((k.as_str(), v.as_str()));
    }
    if el.children.is_empty() {
        writer.write_event(Event::Empty(start))?;
        return Ok(());
    }
    writer.write_event(Event::Start(start))?;
    for child in &el.children {
        match child {
            XmlNode::Element(child) => write_element(writer, child)?,
            XmlNode::Text(text) => writer.write_event(Event::Text(BytesText::new(text)))?,
        }
    }
    writer.write_event(Event::End(BytesEnd::new(el.name.as_str())))?;
    Ok(())
}
