//! Event codec: a pull-based cursor over XML events and the matching emitter.
//!
//! Neither side materializes a tree. The cursor holds one event buffer that is reused between
//! calls to [`XmlCursor::advance`], so memory stays flat no matter how large the part is.

use std::io::{BufRead, Write};

use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::{Reader, Writer};

use crate::error::XlsxError;
use crate::xml::{write_element, XmlElement};

/// One structural event. Self-closing elements produce an `Open` followed by a `Close`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum XmlEvent {
    Open {
        name: String,
        attrs: Vec<(String, String)>,
    },
    Text(String),
    Close {
        name: String,
    },
}

impl XmlEvent {
    /// Local name of an `Open`/`Close` event.
    pub fn local_name(&self) -> Option<&str> {
        match self {
            XmlEvent::Open { name, .. } | XmlEvent::Close { name } => {
                Some(name.rsplit_once(':').map_or(name.as_str(), |(_, l)| l))
            }
            XmlEvent::Text(_) => None,
        }
    }

    pub fn attr(&self, key: &str) -> Option<&str> {
        match self {
            XmlEvent::Open { attrs, .. } => attrs
                .iter()
                .find(|(k, _)| k == key)
                .map(|(_, v)| v.as_str()),
            _ => None,
        }
    }
}

pub struct XmlCursor<R: BufRead> {
    reader: Reader<R>,
    buf: Vec<u8>,
    part: String,
    pending_close: Option<String>,
    depth: usize,
    done: bool,
}

impl<R: BufRead> XmlCursor<R> {
    pub fn new(inner: R, part: impl Into<String>) -> Self {
        let mut reader = Reader::from_reader(inner);
        reader.config_mut().trim_text(false);
        Self {
            reader,
            buf: Vec::new(),
            part: part.into(),
            pending_close: None,
            depth: 0,
            done: false,
        }
    }

    pub fn part(&self) -> &str {
        &self.part
    }

    /// Byte offset of the next unread event.
    pub fn position(&self) -> u64 {
        self.reader.buffer_position() as u64
    }

    /// Next structural event, or `None` once the document is exhausted.
    pub fn advance(&mut self) -> Result<Option<XmlEvent>, XlsxError> {
        if let Some(name) = self.pending_close.take() {
            return Ok(Some(XmlEvent::Close { name }));
        }
        if self.done {
            return Ok(None);
        }
        loop {
            self.buf.clear();
            let position = self.reader.buffer_position() as u64;
            let event = self
                .reader
                .read_event_into(&mut self.buf)
                .map_err(|err| XlsxError::from_xml(&self.part, position, err))?;
            match event {
                Event::Start(start) => {
                    self.depth += 1;
                    let (name, attrs) = decode_start(&start, &self.part, position)?;
                    return Ok(Some(XmlEvent::Open { name, attrs }));
                }
                Event::Empty(start) => {
                    let (name, attrs) = decode_start(&start, &self.part, position)?;
                    self.pending_close = Some(name.clone());
                    return Ok(Some(XmlEvent::Open { name, attrs }));
                }
                Event::End(end) => {
                    self.depth = self.depth.saturating_sub(1);
                    let name = String::from_utf8_lossy(end.name().as_ref()).into_owned();
                    return Ok(Some(XmlEvent::Close { name }));
                }
                Event::Text(text) => {
                    let value = text
                        .unescape()
                        .map_err(|err| XlsxError::from_xml(&self.part, position, err))?;
                    if value.is_empty() {
                        continue;
                    }
                    return Ok(Some(XmlEvent::Text(value.into_owned())));
                }
                Event::CData(data) => {
                    return Ok(Some(XmlEvent::Text(
                        String::from_utf8_lossy(&data).into_owned(),
                    )));
                }
                Event::Eof => {
                    self.done = true;
                    if self.depth != 0 {
                        return Err(XlsxError::parse(
                            &self.part,
                            position,
                            "unexpected end of document inside an element",
                        ));
                    }
                    return Ok(None);
                }
                _ => continue,
            }
        }
    }

    /// Collect the text content of the element whose `Open` event was just returned, consuming
    /// events up to and including its `Close`. Nested markup contributes its text.
    pub fn read_text(&mut self) -> Result<String, XlsxError> {
        let mut out = String::new();
        let mut depth = 1usize;
        while let Some(event) = self.advance()? {
            match event {
                XmlEvent::Open { .. } => depth += 1,
                XmlEvent::Close { .. } => {
                    depth -= 1;
                    if depth == 0 {
                        return Ok(out);
                    }
                }
                XmlEvent::Text(text) => out.push_str(&text),
            }
        }
        Err(XlsxError::parse(
            &self.part,
            self.position(),
            "unexpected end of document inside an element",
        ))
    }

    /// Skip the rest of the element whose `Open` event was just returned.
    pub fn skip_element(&mut self) -> Result<(), XlsxError> {
        self.read_text().map(|_| ())
    }
}

fn decode_start(
    start: &BytesStart<'_>,
    part: &str,
    position: u64,
) -> Result<(String, Vec<(String, String)>), XlsxError> {
    let name = String::from_utf8_lossy(start.name().as_ref()).into_owned();
    let mut attrs = Vec::new();
    for attr in start.attributes() {
        let attr = attr.map_err(|err| XlsxError::parse(part, position, err.to_string()))?;
        let value = attr
            .unescape_value()
            .map_err(|err| XlsxError::from_xml(part, position, err))?;
        attrs.push((
            String::from_utf8_lossy(attr.key.as_ref()).into_owned(),
            value.into_owned(),
        ));
    }
    Ok((name, attrs))
}

/// Writes XML events straight to a sink.
pub struct XmlEmitter<W: Write> {
    writer: Writer<W>,
}

impl<W: Write> XmlEmitter<W> {
    pub fn new(inner: W) -> Self {
        Self {
            writer: Writer::new(inner),
        }
    }

    pub fn declaration(&mut self) -> Result<(), XlsxError> {
        self.writer
            .write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), Some("yes"))))?;
        self.writer.get_mut().write_all(b"\n")?;
        Ok(())
    }

    pub fn open(&mut self, name: &str, attrs: &[(&str, &str)]) -> Result<(), XlsxError> {
        self.writer.write_event(Event::Start(start_tag(name, attrs)))?;
        Ok(())
    }

    pub fn empty(&mut self, name: &str, attrs: &[(&str, &str)]) -> Result<(), XlsxError> {
        self.writer.write_event(Event::Empty(start_tag(name, attrs)))?;
        Ok(())
    }

    pub fn text(&mut self, text: &str) -> Result<(), XlsxError> {
        self.writer.write_event(Event::Text(BytesText::new(text)))?;
        Ok(())
    }

    pub fn close(&mut self, name: &str) -> Result<(), XlsxError> {
        self.writer.write_event(Event::End(BytesEnd::new(name)))?;
        Ok(())
    }

    /// `<name attrs>text</name>` in one call.
    pub fn text_element(
        &mut self,
        name: &str,
        attrs: &[(&str, &str)],
        text: &str,
    ) -> Result<(), XlsxError> {
        self.open(name, attrs)?;
        self.text(text)?;
        self.close(name)
    }

    /// Write a small subtree built in memory.
    pub fn element(&mut self, el: &XmlElement) -> Result<(), XlsxError> {
        write_element(&mut self.writer, el)
    }

    pub fn into_inner(self) -> W {
        self.writer.into_inner()
    }
}

fn start_tag<'a>(name: &'a str, attrs: &[(&str, &str)]) -> BytesStart<'a> {
    let mut start = BytesStart::new(name);
    for &(k, v) in attrs {
        start.push_attribute((k, v));
    }
    start
}
