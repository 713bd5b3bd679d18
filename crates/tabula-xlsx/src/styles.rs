//! Style registry codec for `xl/styles.xml`.
//!
//! Worksheets reference styles by `cellXfs` index; the model stores whole [`Style`] records. The
//! registry keeps the parsed `styles.xml` tree plus a bidirectional map between `xf` indices and
//! canonical styles. Registering a style that is not present yet appends the fonts, fills,
//! borders, number formats and `xf` records it needs, so existing indices never move.

use std::collections::HashMap;

use tabula_model::{
    Alignment, Border, BorderEdge, BorderStyle, Color, Fill, FillPattern, Font,
    HorizontalAlignment, Style, VerticalAlignment,
};

use crate::dates::is_date_format;
use crate::error::XlsxError;
use crate::xml::{XmlElement, XmlNode, NS_MAIN};

/// Number formats the package only names by id are carried as `__builtin_numFmtId:<id>`.
pub(crate) const BUILTIN_NUM_FMT_PLACEHOLDER: &str = "__builtin_numFmtId:";

const FIRST_CUSTOM_NUM_FMT_ID: u32 = 164;

#[derive(Debug, Clone)]
pub struct StyleRegistry {
    root: XmlElement,
    prefix: Option<String>,

    xfs: Vec<Style>,
    xf_index: HashMap<Style, u32>,
    seeded_xfs: usize,

    fonts: Vec<Font>,
    font_index: HashMap<Font, u32>,
    fills: Vec<Fill>,
    fill_index: HashMap<Fill, u32>,
    borders: Vec<Border>,
    border_index: HashMap<Border, u32>,

    num_fmt_by_id: HashMap<u32, String>,
    num_fmt_id_by_code: HashMap<String, u32>,
    next_custom_num_fmt_id: u32,
}

impl Default for StyleRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl StyleRegistry {
    /// A registry holding only the default style at index 0.
    pub fn new() -> Self {
        Self::from_root(default_root(), 0)
    }

    pub fn parse(bytes: &[u8], part: &str) -> Result<Self, XlsxError> {
        let root = XmlElement::parse(bytes, part)?;
        if root.local_name() != "styleSheet" {
            return Err(XlsxError::parse(
                part,
                0,
                format!("expected <styleSheet>, found <{}>", root.name),
            ));
        }
        let seeded = root
            .child("cellXfs")
            .map_or(0, |xfs| xfs.children_by_local("xf").count());
        Ok(Self::from_root(root, seeded))
    }

    fn from_root(root: XmlElement, seeded: usize) -> Self {
        let prefix = root.name.split_once(':').map(|(p, _)| p.to_string());

        let num_fmt_by_id = parse_num_fmts(&root);
        let mut num_fmt_id_by_code = HashMap::new();
        let mut max_custom = FIRST_CUSTOM_NUM_FMT_ID - 1;
        for (id, code) in &num_fmt_by_id {
            num_fmt_id_by_code.entry(code.clone()).or_insert(*id);
            max_custom = max_custom.max(*id);
        }

        let fonts = parse_fonts(&root);
        let fills = parse_fills(&root);
        let borders = parse_borders(&root);

        let mut xfs: Vec<Style> = root
            .child("cellXfs")
            .map(|cell_xfs| {
                cell_xfs
                    .children_by_local("xf")
                    .map(|xf| parse_xf(xf, &fonts, &fills, &borders, &num_fmt_by_id))
                    .collect()
            })
            .unwrap_or_default();
        let mut root = root;
        if xfs.is_empty() {
            // Worksheets always resolve `s="0"`; give it a record.
            let cell_xfs = ensure_styles_child(&mut root, "cellXfs", prefix.as_deref());
            cell_xfs.push(build_xf_element(0, 0, 0, 0, None));
            cell_xfs.set_attr("count", "1");
            xfs.push(Style::default());
        }

        let mut xf_index = HashMap::new();
        for (idx, style) in xfs.iter().enumerate() {
            xf_index.entry(style.clone()).or_insert(idx as u32);
        }

        Self {
            // `fontId="0"` reads as "no font", so explicit fonts never resolve to it.
            font_index: explicit_font_positions(&fonts),
            fill_index: first_positions(&fills),
            border_index: first_positions(&borders),
            root,
            prefix,
            xfs,
            xf_index,
            seeded_xfs: seeded,
            fonts,
            fills,
            borders,
            num_fmt_by_id,
            num_fmt_id_by_code,
            next_custom_num_fmt_id: max_custom + 1,
        }
    }

    /// Number of `cellXfs` records.
    pub fn len(&self) -> usize {
        self.xfs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.xfs.is_empty()
    }

    /// Style of the `cellXfs` record at `xf`.
    pub fn get(&self, xf: u32) -> Option<&Style> {
        self.xfs.get(xf as usize)
    }

    /// Whether records were appended since the registry was created.
    pub fn is_dirty(&self) -> bool {
        self.xfs.len() > self.seeded_xfs.max(1)
    }

    /// Whether the record at `xf` formats numbers as dates or times.
    pub fn is_date_xf(&self, xf: u32) -> bool {
        self.get(xf).is_some_and(is_date_style)
    }

    /// Return the `cellXfs` index of `style`, appending records when it is new.
    ///
    /// Structurally identical styles always receive the same index.
    pub fn register(&mut self, style: &Style) -> u32 {
        let style = canonical_style(style);
        if let Some(&xf) = self.xf_index.get(&style) {
            return xf;
        }

        let num_fmt_id = self.intern_number_format(style.number_format.as_deref());
        let font_id = self.intern_font(style.font.as_ref());
        let fill_id = self.intern_fill(style.fill.as_ref());
        let border_id = self.intern_border(style.border.as_ref());

        let mut xf = build_xf_element(
            num_fmt_id,
            font_id,
            fill_id,
            border_id,
            style.alignment.as_ref(),
        );
        self.qualify(&mut xf);
        let cell_xfs = ensure_styles_child(&mut self.root, "cellXfs", self.prefix.as_deref());
        append_counted(cell_xfs, xf, "xf");

        let idx = self.xfs.len() as u32;
        self.xfs.push(style.clone());
        self.xf_index.insert(style, idx);
        idx
    }

    pub fn to_xml_bytes(&self, pretty: bool) -> Result<Vec<u8>, XlsxError> {
        self.root.to_xml_bytes(pretty)
    }

    fn qualify(&self, el: &mut XmlElement) {
        if let Some(prefix) = &self.prefix {
            apply_prefix(el, prefix);
        }
    }

    fn intern_font(&mut self, font: Option<&Font>) -> u32 {
        let Some(font) = font else {
            return 0;
        };
        if let Some(&existing) = self.font_index.get(font) {
            return existing;
        }
        let mut el = build_font_element(font);
        self.qualify(&mut el);
        let fonts_el = ensure_styles_child(&mut self.root, "fonts", self.prefix.as_deref());
        let idx = append_counted(fonts_el, el, "font");
        self.fonts.push(font.clone());
        self.font_index.insert(font.clone(), idx);
        idx
    }

    fn intern_fill(&mut self, fill: Option<&Fill>) -> u32 {
        let Some(fill) = fill else {
            return 0;
        };
        if let Some(&existing) = self.fill_index.get(fill) {
            return existing;
        }
        let mut el = build_fill_element(fill);
        self.qualify(&mut el);
        let fills_el = ensure_styles_child(&mut self.root, "fills", self.prefix.as_deref());
        let idx = append_counted(fills_el, el, "fill");
        self.fills.push(fill.clone());
        self.fill_index.insert(fill.clone(), idx);
        idx
    }

    fn intern_border(&mut self, border: Option<&Border>) -> u32 {
        let Some(border) = border else {
            return 0;
        };
        if let Some(&existing) = self.border_index.get(border) {
            return existing;
        }
        let mut el = build_border_element(border);
        self.qualify(&mut el);
        let borders_el = ensure_styles_child(&mut self.root, "borders", self.prefix.as_deref());
        let idx = append_counted(borders_el, el, "border");
        self.borders.push(border.clone());
        self.border_index.insert(border.clone(), idx);
        idx
    }

    fn intern_number_format(&mut self, fmt: Option<&str>) -> u32 {
        let Some(fmt) = fmt else {
            return 0;
        };
        if let Some(id) = parse_builtin_placeholder(fmt) {
            return id;
        }
        if let Some(&id) = self.num_fmt_id_by_code.get(fmt) {
            return id;
        }
        if let Some(id) = builtin_num_fmt_id_for_code(fmt) {
            return id;
        }

        let id = self.next_custom_num_fmt_id;
        self.next_custom_num_fmt_id += 1;
        self.num_fmt_by_id.insert(id, fmt.to_string());
        self.num_fmt_id_by_code.insert(fmt.to_string(), id);

        let mut el = XmlElement::new("numFmt")
            .with_attr("numFmtId", id.to_string())
            .with_attr("formatCode", fmt);
        self.qualify(&mut el);
        let num_fmts = ensure_styles_child(&mut self.root, "numFmts", self.prefix.as_deref());
        append_counted(num_fmts, el, "numFmt");
        id
    }
}

/// Whether `style` formats numbers as dates or times.
pub(crate) fn is_date_style(style: &Style) -> bool {
    match style.number_format.as_deref() {
        None => false,
        Some(code) => match parse_builtin_placeholder(code) {
            Some(id) => is_date_format(id, None),
            None => is_date_format(0, Some(code)),
        },
    }
}

/// Drop components equal to their defaults so equal-looking styles share one key.
fn canonical_style(style: &Style) -> Style {
    Style {
        font: style.font.clone().filter(|f| f != &Font::default()),
        fill: style.fill.clone().filter(|f| f != &Fill::default()),
        border: style.border.clone().filter(|b| b != &Border::default()),
        alignment: style.alignment.clone().filter(|a| a != &Alignment::default()),
        number_format: style
            .number_format
            .clone()
            .filter(|code| !code.eq_ignore_ascii_case("general")),
    }
}

fn first_positions<T: Clone + Eq + std::hash::Hash>(items: &[T]) -> HashMap<T, u32> {
    let mut out = HashMap::new();
    for (idx, item) in items.iter().enumerate() {
        out.entry(item.clone()).or_insert(idx as u32);
    }
    out
}

fn explicit_font_positions(fonts: &[Font]) -> HashMap<Font, u32> {
    let mut out = HashMap::new();
    for (idx, font) in fonts.iter().enumerate().skip(1) {
        out.entry(font.clone()).or_insert(idx as u32);
    }
    out
}

fn append_counted(parent: &mut XmlElement, child: XmlElement, local: &str) -> u32 {
    let idx = parent.children_by_local(local).count();
    parent.push(child);
    parent.set_attr("count", (idx + 1).to_string());
    idx as u32
}

fn default_root() -> XmlElement {
    let font = XmlElement::new("font")
        .with_child(XmlElement::new("sz").with_attr("val", "11"))
        .with_child(XmlElement::new("color").with_attr("theme", "1"))
        .with_child(XmlElement::new("name").with_attr("val", "Calibri"))
        .with_child(XmlElement::new("family").with_attr("val", "2"))
        .with_child(XmlElement::new("scheme").with_attr("val", "minor"));
    let pattern = |kind: &str| {
        XmlElement::new("fill")
            .with_child(XmlElement::new("patternFill").with_attr("patternType", kind))
    };
    let border = ["left", "right", "top", "bottom", "diagonal"]
        .into_iter()
        .fold(XmlElement::new("border"), |el, edge| {
            el.with_child(XmlElement::new(edge))
        });
    let style_xf = XmlElement::new("xf")
        .with_attr("numFmtId", "0")
        .with_attr("fontId", "0")
        .with_attr("fillId", "0")
        .with_attr("borderId", "0");

    XmlElement::new("styleSheet")
        .with_attr("xmlns", NS_MAIN)
        .with_child(XmlElement::new("fonts").with_attr("count", "1").with_child(font))
        .with_child(
            XmlElement::new("fills")
                .with_attr("count", "2")
                .with_child(pattern("none"))
                .with_child(pattern("gray125")),
        )
        .with_child(XmlElement::new("borders").with_attr("count", "1").with_child(border))
        .with_child(
            XmlElement::new("cellStyleXfs")
                .with_attr("count", "1")
                .with_child(style_xf),
        )
        .with_child(
            XmlElement::new("cellXfs")
                .with_attr("count", "1")
                .with_child(build_xf_element(0, 0, 0, 0, None)),
        )
        .with_child(
            XmlElement::new("cellStyles").with_attr("count", "1").with_child(
                XmlElement::new("cellStyle")
                    .with_attr("name", "Normal")
                    .with_attr("xfId", "0")
                    .with_attr("builtinId", "0"),
            ),
        )
        .with_child(XmlElement::new("dxfs").with_attr("count", "0"))
        .with_child(
            XmlElement::new("tableStyles")
                .with_attr("count", "0")
                .with_attr("defaultTableStyle", "TableStyleMedium9")
                .with_attr("defaultPivotStyle", "PivotStyleLight16"),
        )
}

fn parse_num_fmts(root: &XmlElement) -> HashMap<u32, String> {
    let mut out = HashMap::new();
    let Some(num_fmts) = root.child("numFmts") else {
        return out;
    };
    for num_fmt in num_fmts.children_by_local("numFmt") {
        let id = num_fmt.attr("numFmtId").and_then(|v| v.parse::<u32>().ok());
        if let (Some(id), Some(code)) = (id, num_fmt.attr("formatCode")) {
            out.insert(id, code.to_string());
        }
    }
    out
}

fn parse_fonts(root: &XmlElement) -> Vec<Font> {
    let mut parsed: Vec<Font> = root
        .child("fonts")
        .map(|fonts| fonts.children_by_local("font").map(parse_font).collect())
        .unwrap_or_default();
    if parsed.is_empty() {
        parsed.push(Font::default());
    }
    parsed
}

fn parse_font(el: &XmlElement) -> Font {
    Font {
        name: el
            .child("name")
            .and_then(|n| n.attr("val"))
            .map(str::to_string),
        size_100pt: el
            .child("sz")
            .and_then(|sz| sz.attr("val"))
            .and_then(parse_size_100pt),
        bold: el.child("b").is_some_and(bool_val),
        italic: el.child("i").is_some_and(bool_val),
        underline: el
            .child("u")
            .is_some_and(|u| u.attr("val").map_or(true, |v| v != "none")),
        strike: el.child("strike").is_some_and(bool_val),
        color: el.child("color").and_then(|c| parse_color(&c.attrs)),
    }
}

/// `<b/>` means true; `val="0"`/`"false"` turns the flag off.
fn bool_val(el: &XmlElement) -> bool {
    el.attr("val")
        .map_or(true, |v| !(v == "0" || v.eq_ignore_ascii_case("false")))
}

pub(crate) fn parse_size_100pt(val: &str) -> Option<u16> {
    let points: f64 = val.trim().parse().ok()?;
    let scaled = (points * 100.0).round();
    (0.0..=f64::from(u16::MAX))
        .contains(&scaled)
        .then_some(scaled as u16)
}

pub(crate) fn format_size_100pt(size: u16) -> String {
    if size % 100 == 0 {
        (size / 100).to_string()
    } else {
        let out = format!("{}.{:02}", size / 100, size % 100);
        out.trim_end_matches('0').to_string()
    }
}

fn parse_fills(root: &XmlElement) -> Vec<Fill> {
    let out: Vec<Fill> = root
        .child("fills")
        .map(|fills| fills.children_by_local("fill").map(parse_fill).collect())
        .unwrap_or_default();
    if out.is_empty() {
        return vec![Fill::default()];
    }
    out
}

fn parse_fill(el: &XmlElement) -> Fill {
    let Some(pattern_fill) = el.child("patternFill") else {
        return Fill::default();
    };
    let pattern = match pattern_fill.attr("patternType").unwrap_or("none") {
        "none" => FillPattern::None,
        "gray125" => FillPattern::Gray125,
        "solid" => FillPattern::Solid,
        other => FillPattern::Other(other.to_string()),
    };
    Fill {
        pattern,
        fg_color: pattern_fill
            .child("fgColor")
            .and_then(|c| parse_color(&c.attrs)),
        bg_color: pattern_fill
            .child("bgColor")
            .and_then(|c| parse_color(&c.attrs)),
    }
}

fn parse_borders(root: &XmlElement) -> Vec<Border> {
    let out: Vec<Border> = root
        .child("borders")
        .map(|borders| borders.children_by_local("border").map(parse_border).collect())
        .unwrap_or_default();
    if out.is_empty() {
        return vec![Border::default()];
    }
    out
}

fn parse_border(el: &XmlElement) -> Border {
    let flag = |name: &str| {
        el.attr(name)
            .is_some_and(|v| v == "1" || v.eq_ignore_ascii_case("true"))
    };
    Border {
        left: parse_border_edge(el.child("left").or_else(|| el.child("start"))),
        right: parse_border_edge(el.child("right").or_else(|| el.child("end"))),
        top: parse_border_edge(el.child("top")),
        bottom: parse_border_edge(el.child("bottom")),
        diagonal: parse_border_edge(el.child("diagonal")),
        diagonal_up: flag("diagonalUp"),
        diagonal_down: flag("diagonalDown"),
    }
}

fn parse_border_edge(edge: Option<&XmlElement>) -> BorderEdge {
    let Some(edge) = edge else {
        return BorderEdge::default();
    };
    let style = match edge.attr("style").unwrap_or("none") {
        "thin" | "hair" => BorderStyle::Thin,
        "medium" => BorderStyle::Medium,
        "thick" => BorderStyle::Thick,
        "dashed" | "mediumDashed" | "dashDot" | "mediumDashDot" | "dashDotDot"
        | "mediumDashDotDot" | "slantDashDot" => BorderStyle::Dashed,
        "dotted" => BorderStyle::Dotted,
        "double" => BorderStyle::Double,
        _ => BorderStyle::None,
    };
    BorderEdge {
        style,
        color: edge.child("color").and_then(|c| parse_color(&c.attrs)),
    }
}

fn parse_xf(
    xf: &XmlElement,
    fonts: &[Font],
    fills: &[Fill],
    borders: &[Border],
    num_fmts: &HashMap<u32, String>,
) -> Style {
    let id = |name: &str| {
        xf.attr(name)
            .and_then(|v| v.parse::<u32>().ok())
            .unwrap_or(0)
    };
    let (font_id, fill_id, border_id) = (id("fontId"), id("fillId"), id("borderId"));

    let font = match font_id {
        0 => None,
        n => fonts.get(n as usize).cloned(),
    };
    let fill = fills.get(fill_id as usize).cloned();
    let border = borders.get(border_id as usize).cloned();
    let alignment = xf.child("alignment").map(parse_alignment);

    let num_fmt_id = id("numFmtId");
    let number_format = if num_fmt_id == 0 {
        None
    } else if let Some(code) = num_fmts.get(&num_fmt_id) {
        Some(code.clone())
    } else if let Some(code) = builtin_num_fmt_code(num_fmt_id) {
        Some(code.to_string())
    } else {
        Some(format!("{BUILTIN_NUM_FMT_PLACEHOLDER}{num_fmt_id}"))
    };

    canonical_style(&Style {
        font,
        fill,
        border,
        alignment,
        number_format,
    })
}

fn parse_alignment(el: &XmlElement) -> Alignment {
    Alignment {
        horizontal: el.attr("horizontal").and_then(|v| match v {
            "general" => Some(HorizontalAlignment::General),
            "left" => Some(HorizontalAlignment::Left),
            "center" | "centerContinuous" => Some(HorizontalAlignment::Center),
            "right" => Some(HorizontalAlignment::Right),
            "fill" => Some(HorizontalAlignment::Fill),
            "justify" | "distributed" => Some(HorizontalAlignment::Justify),
            _ => None,
        }),
        vertical: el.attr("vertical").and_then(|v| match v {
            "top" => Some(VerticalAlignment::Top),
            "center" => Some(VerticalAlignment::Center),
            "bottom" => Some(VerticalAlignment::Bottom),
            _ => None,
        }),
        wrap_text: el
            .attr("wrapText")
            .is_some_and(|v| v == "1" || v.eq_ignore_ascii_case("true")),
        rotation: el
            .attr("textRotation")
            .and_then(|v| v.parse::<i16>().ok())
            .filter(|r| *r != 0),
        indent: el
            .attr("indent")
            .and_then(|v| v.parse::<u16>().ok())
            .filter(|i| *i != 0),
    }
}

/// Parse a `CT_Color` attribute set (`auto`, `rgb`, `theme`+`tint`, `indexed`).
pub(crate) fn parse_color(attrs: &[(String, String)]) -> Option<Color> {
    let attr = |key: &str| attrs.iter().find(|(k, _)| k == key).map(|(_, v)| v.as_str());

    if attr("auto").is_some_and(|v| v == "1" || v.eq_ignore_ascii_case("true")) {
        return Some(Color::Auto);
    }
    if let Some(rgb) = attr("rgb") {
        return tabula_model::parse_argb_hex(rgb).map(Color::argb);
    }
    if let Some(theme) = attr("theme").and_then(|v| v.parse::<u16>().ok()) {
        let tint = attr("tint")
            .and_then(|v| v.parse::<f64>().ok())
            .map(|v| (v.clamp(-1.0, 1.0) * 1000.0).round() as i16)
            .filter(|t| *t != 0);
        return Some(Color::Theme { theme, tint });
    }
    attr("indexed")
        .and_then(|v| v.parse::<u16>().ok())
        .map(|index| Color::Indexed { index })
}

pub(crate) fn build_color_element(name: &str, color: Color) -> XmlElement {
    let el = XmlElement::new(name);
    match color {
        Color::Argb { argb } => el.with_attr("rgb", format!("{argb:08X}")),
        Color::Theme { theme, tint } => {
            let el = el.with_attr("theme", theme.to_string());
            match tint {
                Some(tint) => el.with_attr("tint", format!("{}", f64::from(tint) / 1000.0)),
                None => el,
            }
        }
        Color::Indexed { index } => el.with_attr("indexed", index.to_string()),
        Color::Auto => el.with_attr("auto", "1"),
    }
}

fn build_xf_element(
    num_fmt_id: u32,
    font_id: u32,
    fill_id: u32,
    border_id: u32,
    alignment: Option<&Alignment>,
) -> XmlElement {
    let mut xf = XmlElement::new("xf")
        .with_attr("numFmtId", num_fmt_id.to_string())
        .with_attr("fontId", font_id.to_string())
        .with_attr("fillId", fill_id.to_string())
        .with_attr("borderId", border_id.to_string())
        .with_attr("xfId", "0");
    for (id, flag) in [
        (num_fmt_id, "applyNumberFormat"),
        (font_id, "applyFont"),
        (fill_id, "applyFill"),
        (border_id, "applyBorder"),
    ] {
        if id != 0 {
            xf.set_attr(flag, "1");
        }
    }
    if let Some(alignment) = alignment {
        xf.set_attr("applyAlignment", "1");
        xf.push(build_alignment_element(alignment));
    }
    xf
}

fn build_font_element(font: &Font) -> XmlElement {
    let mut el = XmlElement::new("font");
    for (on, name) in [
        (font.bold, "b"),
        (font.italic, "i"),
        (font.strike, "strike"),
        (font.underline, "u"),
    ] {
        if on {
            el.push(XmlElement::new(name));
        }
    }
    if let Some(size) = font.size_100pt {
        el.push(XmlElement::new("sz").with_attr("val", format_size_100pt(size)));
    }
    if let Some(color) = font.color {
        el.push(build_color_element("color", color));
    }
    if let Some(name) = &font.name {
        el.push(XmlElement::new("name").with_attr("val", name.as_str()));
    }
    el
}

fn build_fill_element(fill: &Fill) -> XmlElement {
    let pattern_type = match &fill.pattern {
        FillPattern::None => "none",
        FillPattern::Gray125 => "gray125",
        FillPattern::Solid => "solid",
        FillPattern::Other(value) => value.as_str(),
    };
    let mut pattern_fill = XmlElement::new("patternFill").with_attr("patternType", pattern_type);
    if let Some(color) = fill.fg_color {
        pattern_fill.push(build_color_element("fgColor", color));
    }
    if let Some(color) = fill.bg_color {
        pattern_fill.push(build_color_element("bgColor", color));
    }
    XmlElement::new("fill").with_child(pattern_fill)
}

fn build_border_element(border: &Border) -> XmlElement {
    let mut el = XmlElement::new("border");
    if border.diagonal_up {
        el.set_attr("diagonalUp", "1");
    }
    if border.diagonal_down {
        el.set_attr("diagonalDown", "1");
    }
    for (name, edge) in [
        ("left", &border.left),
        ("right", &border.right),
        ("top", &border.top),
        ("bottom", &border.bottom),
        ("diagonal", &border.diagonal),
    ] {
        el.push(build_border_edge_element(name, edge));
    }
    el
}

fn build_border_edge_element(name: &str, edge: &BorderEdge) -> XmlElement {
    let mut el = XmlElement::new(name);
    let style = match edge.style {
        BorderStyle::None => None,
        BorderStyle::Thin => Some("thin"),
        BorderStyle::Medium => Some("medium"),
        BorderStyle::Thick => Some("thick"),
        BorderStyle::Dashed => Some("dashed"),
        BorderStyle::Dotted => Some("dotted"),
        BorderStyle::Double => Some("double"),
    };
    if let Some(style) = style {
        el.set_attr("style", style);
    }
    if let Some(color) = edge.color {
        el.push(build_color_element("color", color));
    }
    el
}

fn build_alignment_element(alignment: &Alignment) -> XmlElement {
    let mut el = XmlElement::new("alignment");
    if let Some(horizontal) = alignment.horizontal {
        let value = match horizontal {
            HorizontalAlignment::General => "general",
            HorizontalAlignment::Left => "left",
            HorizontalAlignment::Center => "center",
            HorizontalAlignment::Right => "right",
            HorizontalAlignment::Fill => "fill",
            HorizontalAlignment::Justify => "justify",
        };
        el.set_attr("horizontal", value);
    }
    if let Some(vertical) = alignment.vertical {
        let value = match vertical {
            VerticalAlignment::Top => "top",
            VerticalAlignment::Center => "center",
            VerticalAlignment::Bottom => "bottom",
        };
        el.set_attr("vertical", value);
    }
    if alignment.wrap_text {
        el.set_attr("wrapText", "1");
    }
    if let Some(rotation) = alignment.rotation {
        el.set_attr("textRotation", rotation.to_string());
    }
    if let Some(indent) = alignment.indent {
        el.set_attr("indent", indent.to_string());
    }
    el
}

fn builtin_num_fmt_code(id: u32) -> Option<&'static str> {
    let code = match id {
        1 => "0",
        2 => "0.00",
        3 => "#,##0",
        4 => "#,##0.00",
        9 => "0%",
        10 => "0.00%",
        11 => "0.00E+00",
        12 => "# ?/?",
        13 => "# ??/??",
        14 => "mm-dd-yy",
        15 => "d-mmm-yy",
        16 => "d-mmm",
        17 => "mmm-yy",
        18 => "h:mm AM/PM",
        19 => "h:mm:ss AM/PM",
        20 => "h:mm",
        21 => "h:mm:ss",
        22 => "m/d/yy h:mm",
        37 => "#,##0 ;(#,##0)",
        38 => "#,##0 ;[Red](#,##0)",
        39 => "#,##0.00;(#,##0.00)",
        40 => "#,##0.00;[Red](#,##0.00)",
        45 => "mm:ss",
        46 => "[h]:mm:ss",
        47 => "mmss.0",
        48 => "##0.0E+0",
        49 => "@",
        _ => return None,
    };
    Some(code)
}

fn builtin_num_fmt_id_for_code(code: &str) -> Option<u32> {
    (1..=49).find(|&id| builtin_num_fmt_code(id) == Some(code))
}

fn parse_builtin_placeholder(code: &str) -> Option<u32> {
    code.strip_prefix(BUILTIN_NUM_FMT_PLACEHOLDER)?
        .parse::<u32>()
        .ok()
}

fn apply_prefix(el: &mut XmlElement, prefix: &str) {
    if !el.name.contains(':') {
        el.name = format!("{prefix}:{}", el.name);
    }
    for child in &mut el.children {
        if let XmlNode::Element(child) = child {
            apply_prefix(child, prefix);
        }
    }
}

fn ensure_styles_child<'a>(
    root: &'a mut XmlElement,
    local: &str,
    prefix: Option<&str>,
) -> &'a mut XmlElement {
    let existing = root
        .children
        .iter()
        .position(|child| matches!(child, XmlNode::Element(el) if el.local_name() == local));
    let idx = match existing {
        Some(idx) => idx,
        None => {
            let idx = insertion_index(root, local);
            let name = match prefix {
                Some(prefix) => format!("{prefix}:{local}"),
                None => local.to_string(),
            };
            root.children
                .insert(idx, XmlNode::Element(XmlElement::new(name).with_attr("count", "0")));
            idx
        }
    };
    match &mut root.children[idx] {
        XmlNode::Element(el) => el,
        XmlNode::Text(_) => unreachable!("styles child index points at an element"),
    }
}

fn insertion_index(root: &XmlElement, local: &str) -> usize {
    const ORDER: [&str; 10] = [
        "numFmts",
        "fonts",
        "fills",
        "borders",
        "cellStyleXfs",
        "cellXfs",
        "cellStyles",
        "dxfs",
        "tableStyles",
        "extLst",
    ];
    let Some(target_pos) = ORDER.iter().position(|name| *name == local) else {
        return root.children.len();
    };
    root.children
        .iter()
        .position(|child| match child {
            XmlNode::Element(el) => ORDER
                .iter()
                .position(|name| *name == el.local_name())
                .is_some_and(|pos| pos > target_pos),
            XmlNode::Text(_) => false,
        })
        .unwrap_or(root.children.len())
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn bold_red() -> Style {
        Style {
            font: Some(Font {
                bold: true,
                color: Some(Color::argb(0xFFFF_0000)),
                ..Font::default()
            }),
            fill: Some(Fill::solid(Color::argb(0xFFFF_FF00))),
            ..Style::default()
        }
    }

    #[test]
    fn default_style_is_index_zero() {
        let mut registry = StyleRegistry::new();
        assert_eq!(registry.register(&Style::default()), 0);
        assert_eq!(registry.len(), 1);
        assert!(!registry.is_dirty());
    }

    #[test]
    fn identical_styles_share_an_index() {
        let mut registry = StyleRegistry::new();
        let a = registry.register(&bold_red());
        let b = registry.register(&bold_red());
        assert_eq!(a, b);
        assert_eq!(a, 1);
        assert!(registry.is_dirty());
    }

    #[test]
    fn default_components_do_not_split_keys() {
        let mut registry = StyleRegistry::new();
        let explicit = Style {
            font: Some(Font::default()),
            alignment: Some(Alignment::default()),
            number_format: Some("General".to_string()),
            ..Style::default()
        };
        assert_eq!(registry.register(&explicit), 0);
    }

    #[test]
    fn registered_styles_survive_serialization() {
        let mut registry = StyleRegistry::new();
        let date = Style {
            number_format: Some("yyyy-mm-dd".to_string()),
            alignment: Some(Alignment {
                horizontal: Some(HorizontalAlignment::Center),
                wrap_text: true,
                ..Alignment::default()
            }),
            border: Some(Border {
                bottom: BorderEdge {
                    style: BorderStyle::Double,
                    color: Some(Color::Theme {
                        theme: 4,
                        tint: Some(-250),
                    }),
                },
                ..Border::default()
            }),
            ..Style::default()
        };
        let first = registry.register(&bold_red());
        let second = registry.register(&date);

        let bytes = registry.to_xml_bytes(false).unwrap();
        let reparsed = StyleRegistry::parse(&bytes, "xl/styles.xml").unwrap();
        assert_eq!(reparsed.get(first), Some(&bold_red()));
        assert_eq!(reparsed.get(second), Some(&date));
        assert!(reparsed.is_date_xf(second));
        assert!(!reparsed.is_date_xf(first));
        assert!(!reparsed.is_dirty());
    }

    #[test]
    fn custom_formats_start_at_164_and_builtins_keep_their_ids() {
        let mut registry = StyleRegistry::new();
        let custom = registry.register(&Style {
            number_format: Some("0.000".to_string()),
            ..Style::default()
        });
        let builtin = registry.register(&Style {
            number_format: Some("0.00%".to_string()),
            ..Style::default()
        });
        let xml = String::from_utf8(registry.to_xml_bytes(false).unwrap()).unwrap();
        assert!(xml.contains(r#"<numFmt numFmtId="164" formatCode="0.000"/>"#), "{xml}");
        assert!(xml.contains(r#"numFmtId="10""#), "{xml}");
        assert_eq!((custom, builtin), (1, 2));
        // numFmts precedes fonts.
        assert!(xml.find("<numFmts").unwrap() < xml.find("<fonts").unwrap());
    }

    #[test]
    fn parse_keeps_existing_indices_and_unknown_content() {
        let xml = br#"<x:styleSheet xmlns:x="http://schemas.openxmlformats.org/spreadsheetml/2006/main">
  <x:numFmts count="1"><x:numFmt numFmtId="170" formatCode="0.0"/></x:numFmts>
  <x:fonts count="2">
    <x:font><x:sz val="11"/><x:name val="Calibri"/></x:font>
    <x:font><x:b/><x:sz val="11"/><x:name val="Calibri"/></x:font>
  </x:fonts>
  <x:fills count="1"><x:fill><x:patternFill patternType="none"/></x:fill></x:fills>
  <x:borders count="1"><x:border/></x:borders>
  <x:cellXfs count="3">
    <x:xf numFmtId="0" fontId="0" fillId="0" borderId="0"/>
    <x:xf numFmtId="170" fontId="1" fillId="0" borderId="0" applyFont="1"/>
    <x:xf numFmtId="27" fontId="0" fillId="0" borderId="0"/>
  </x:cellXfs>
  <x:extLst><x:ext uri="{keep}"/></x:extLst>
</x:styleSheet>"#;
        let mut registry = StyleRegistry::parse(xml, "xl/styles.xml").unwrap();
        assert_eq!(registry.len(), 3);
        let bold = registry.get(1).cloned().unwrap();
        assert_eq!(bold.number_format.as_deref(), Some("0.0"));
        assert!(bold.font.as_ref().unwrap().bold);
        assert_eq!(bold.font.as_ref().unwrap().name.as_deref(), Some("Calibri"));
        assert_eq!(bold.font.as_ref().unwrap().size_100pt, Some(1100));
        assert_eq!(
            registry.get(2).unwrap().number_format.as_deref(),
            Some("__builtin_numFmtId:27")
        );

        assert_eq!(registry.register(&bold), 1);
        let new = registry.register(&Style {
            number_format: Some("0.0000".to_string()),
            ..Style::default()
        });
        assert_eq!(new, 3);

        let out = String::from_utf8(registry.to_xml_bytes(false).unwrap()).unwrap();
        assert!(out.contains(r#"<x:numFmt numFmtId="171" formatCode="0.0000"/>"#), "{out}");
        assert!(out.contains(r#"<x:ext uri="{keep}"/>"#));
        assert!(out.contains(r#"<x:cellXfs count="4">"#));
    }

    #[test]
    fn explicit_default_font_gets_its_own_record() {
        let mut registry = StyleRegistry::new();
        let explicit = Style {
            font: Some(Font {
                name: Some("Calibri".to_string()),
                size_100pt: Some(1100),
                color: Some(Color::Theme {
                    theme: 1,
                    tint: None,
                }),
                ..Font::default()
            }),
            ..Style::default()
        };
        let xf = registry.register(&explicit);
        assert_eq!(xf, 1);

        let bytes = registry.to_xml_bytes(false).unwrap();
        let mut reparsed = StyleRegistry::parse(&bytes, "xl/styles.xml").unwrap();
        assert_eq!(reparsed.get(xf), Some(&explicit));
        assert_eq!(reparsed.get(0), Some(&Style::default()));
        assert_eq!(reparsed.register(&explicit), xf);
        assert!(!reparsed.is_dirty());
    }

    #[test]
    fn sizes_format_without_trailing_zeros() {
        assert_eq!(format_size_100pt(1100), "11");
        assert_eq!(format_size_100pt(1050), "10.5");
        assert_eq!(format_size_100pt(1025), "10.25");
        assert_eq!(parse_size_100pt("10.5"), Some(1050));
    }
}
