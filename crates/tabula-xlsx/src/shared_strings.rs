//! Shared string table codec (`xl/sharedStrings.xml`).
//!
//! Items are rich text; plain strings are rich text without runs. The table is append-only:
//! registering a value that is already present returns its existing index.

use std::collections::HashMap;
use std::io::BufRead;

use tabula_model::{RichText, RichTextRun, RichTextRunStyle};

use crate::error::XlsxError;
use crate::events::{XmlCursor, XmlEvent};
use crate::styles::{build_color_element, format_size_100pt, parse_color, parse_size_100pt};
use crate::xml::{XmlElement, NS_MAIN};

#[derive(Clone, Debug, Default)]
pub struct SharedStrings {
    items: Vec<RichText>,
    index: HashMap<RichText, u32>,
    seeded: usize,
}

impl SharedStrings {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a shared string part incrementally; only the items themselves are retained.
    pub fn parse<R: BufRead>(reader: R, part: &str) -> Result<Self, XlsxError> {
        let mut cursor = XmlCursor::new(reader, part);
        let mut out = Self::default();
        while let Some(event) = cursor.advance()? {
            if matches!(event, XmlEvent::Open { .. }) && event.local_name() == Some("si") {
                let item = read_rich_text(&mut cursor)?;
                out.push(item);
            }
        }
        out.seeded = out.items.len();
        Ok(out)
    }

    fn push(&mut self, item: RichText) -> u32 {
        let idx = self.items.len() as u32;
        self.index.entry(item.clone()).or_insert(idx);
        self.items.push(item);
        idx
    }

    pub fn get(&self, idx: u32) -> Option<&RichText> {
        self.items.get(idx as usize)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Whether items were registered since the table was parsed or created.
    pub fn is_dirty(&self) -> bool {
        self.items.len() > self.seeded
    }

    pub fn register_plain(&mut self, text: &str) -> u32 {
        self.register(&RichText::new(text))
    }

    pub fn register(&mut self, value: &RichText) -> u32 {
        match self.index.get(value) {
            Some(&idx) => idx,
            None => self.push(value.clone()),
        }
    }

    /// Serialize the table. `count` is the number of cell references, when known.
    pub fn to_xml(&self, count: Option<usize>) -> XmlElement {
        let mut root = XmlElement::new("sst").with_attr("xmlns", NS_MAIN);
        if let Some(count) = count {
            root.set_attr("count", count.to_string());
        }
        root.set_attr("uniqueCount", self.items.len().to_string());
        for item in &self.items {
            root.push(rich_text_element("si", item));
        }
        root
    }
}

/// `<si>`/`<is>` element for `value`: a bare `<t>` for plain text, `<r>` runs otherwise.
pub(crate) fn rich_text_element(name: &str, value: &RichText) -> XmlElement {
    let mut el = XmlElement::new(name);
    if value.is_plain() {
        el.push(text_element(&value.text));
        return el;
    }
    for (segment, style) in value.segments() {
        let mut run = XmlElement::new("r");
        if let Some(style) = style.filter(|s| !s.is_empty()) {
            run.push(build_rpr_element(style));
        }
        run.push(text_element(segment));
        el.push(run);
    }
    el
}

fn text_element(text: &str) -> XmlElement {
    let el = XmlElement::new("t");
    let el = if needs_space_preserve(text) {
        el.with_attr("xml:space", "preserve")
    } else {
        el
    };
    if text.is_empty() {
        el
    } else {
        el.with_text(text)
    }
}

fn needs_space_preserve(text: &str) -> bool {
    text.starts_with(char::is_whitespace)
        || text.ends_with(char::is_whitespace)
        || text.contains(['\n', '\r', '\t'])
}

fn build_rpr_element(style: &RichTextRunStyle) -> XmlElement {
    let flag = |name: &str, on: bool| {
        let el = XmlElement::new(name);
        if on {
            el
        } else {
            el.with_attr("val", "0")
        }
    };
    let mut rpr = XmlElement::new("rPr");
    if let Some(font) = &style.font {
        rpr.push(XmlElement::new("rFont").with_attr("val", font.as_str()));
    }
    if let Some(bold) = style.bold {
        rpr.push(flag("b", bold));
    }
    if let Some(italic) = style.italic {
        rpr.push(flag("i", italic));
    }
    if let Some(strike) = style.strike {
        rpr.push(flag("strike", strike));
    }
    if let Some(color) = style.color {
        rpr.push(build_color_element("color", color));
    }
    if let Some(size) = style.size_100pt {
        rpr.push(XmlElement::new("sz").with_attr("val", format_size_100pt(size)));
    }
    if let Some(underline) = style.underline {
        rpr.push(if underline {
            XmlElement::new("u")
        } else {
            XmlElement::new("u").with_attr("val", "none")
        });
    }
    rpr
}

/// Collects `(text, style)` segments and folds them into [`RichText`]; runs are only kept for
/// segments that carry formatting.
#[derive(Default)]
struct Segments(Vec<(String, RichTextRunStyle)>);

impl Segments {
    fn push(&mut self, text: String, style: RichTextRunStyle) {
        self.0.push((text, style));
    }

    fn finish(self) -> RichText {
        let mut text = String::new();
        let mut runs = Vec::new();
        let mut cursor = 0usize;
        for (segment, style) in self.0 {
            let start = cursor;
            cursor += segment.chars().count();
            text.push_str(&segment);
            if !style.is_empty() && cursor > start {
                runs.push(RichTextRun {
                    start,
                    end: cursor,
                    style,
                });
            }
        }
        RichText { text, runs }
    }
}

/// Rich text of the `<si>` or `<is>` element whose `Open` event was just returned, consuming
/// events up to and including its `Close`.
pub(crate) fn read_rich_text<R: BufRead>(
    cursor: &mut XmlCursor<R>,
) -> Result<RichText, XlsxError> {
    let mut segments = Segments::default();
    while let Some(event) = cursor.advance()? {
        match event {
            XmlEvent::Open { .. } => match event.local_name() {
                Some("t") => segments.push(cursor.read_text()?, RichTextRunStyle::default()),
                Some("r") => {
                    let (text, style) = parse_r(cursor)?;
                    segments.push(text, style);
                }
                // Phonetic runs (`rPh`) and extensions are not part of the displayed string.
                _ => cursor.skip_element()?,
            },
            XmlEvent::Close { .. } => return Ok(segments.finish()),
            XmlEvent::Text(_) => {}
        }
    }
    Err(XlsxError::parse(
        cursor.part(),
        cursor.position(),
        "unterminated rich text element",
    ))
}

fn parse_r<R: BufRead>(
    cursor: &mut XmlCursor<R>,
) -> Result<(String, RichTextRunStyle), XlsxError> {
    let mut text = String::new();
    let mut style = RichTextRunStyle::default();
    while let Some(event) = cursor.advance()? {
        match event {
            XmlEvent::Open { .. } => match event.local_name() {
                Some("t") => text.push_str(&cursor.read_text()?),
                Some("rPr") => parse_rpr(cursor, &mut style)?,
                _ => cursor.skip_element()?,
            },
            XmlEvent::Close { .. } => return Ok((text, style)),
            XmlEvent::Text(_) => {}
        }
    }
    Err(XlsxError::parse(
        cursor.part(),
        cursor.position(),
        "unterminated <r>",
    ))
}

fn parse_rpr<R: BufRead>(
    cursor: &mut XmlCursor<R>,
    style: &mut RichTextRunStyle,
) -> Result<(), XlsxError> {
    while let Some(event) = cursor.advance()? {
        match &event {
            XmlEvent::Open { attrs, .. } => {
                apply_rpr_tag(event.local_name().unwrap_or_default(), attrs, style);
                cursor.skip_element()?;
            }
            XmlEvent::Close { .. } => return Ok(()),
            XmlEvent::Text(_) => {}
        }
    }
    Err(XlsxError::parse(
        cursor.part(),
        cursor.position(),
        "unterminated <rPr>",
    ))
}

fn apply_rpr_tag(local: &str, attrs: &[(String, String)], style: &mut RichTextRunStyle) {
    let val = attrs
        .iter()
        .find(|(k, _)| k == "val")
        .map(|(_, v)| v.as_str());
    let flag = || val.map_or(true, |v| !(v == "0" || v.eq_ignore_ascii_case("false")));
    match local {
        "b" => style.bold = Some(flag()),
        "i" => style.italic = Some(flag()),
        "strike" => style.strike = Some(flag()),
        "u" => style.underline = Some(val.map_or(true, |v| v != "none")),
        "color" => style.color = parse_color(attrs),
        "rFont" | "name" => style.font = val.map(str::to_string),
        "sz" => style.size_100pt = val.and_then(parse_size_100pt),
        _ => {}
    }
}

/// Rich text held by an already-parsed `<is>` or `<si>` element.
pub(crate) fn rich_text_from_element(el: &XmlElement) -> RichText {
    let mut segments = Segments::default();
    for child in el.elements() {
        match child.local_name() {
            "t" => segments.push(child.text().into_owned(), RichTextRunStyle::default()),
            "r" => {
                let mut style = RichTextRunStyle::default();
                if let Some(rpr) = child.child("rPr") {
                    for prop in rpr.elements() {
                        apply_rpr_tag(prop.local_name(), &prop.attrs, &mut style);
                    }
                }
                let text: String = child
                    .children_by_local("t")
                    .map(|t| t.text().into_owned())
                    .collect();
                segments.push(text, style);
            }
            _ => {}
        }
    }
    segments.finish()
}
