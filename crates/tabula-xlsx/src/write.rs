//! Whole-document writer.
//!
//! Every part is regenerated from the model. Cells are emitted in row-major order and every
//! registry is filled in that same order, so writing the same workbook twice yields the same
//! archive bytes.

use std::collections::{BTreeMap, HashMap};
use std::io::{BufWriter, Cursor, Seek, Write};
use std::path::Path;

use log::debug;
use tabula_model::{
    Cell, CellRef, Comment, DateSystem, DefinedName, Hyperlink, RichText, SheetVisibility,
    Workbook, Worksheet,
};
use tempfile::NamedTempFile;

use crate::cells::{needs_date_format, CellTarget, EncodedCell};
use crate::container::ContainerWriter;
use crate::content_types::{
    ContentTypes, CONTENT_TYPES_PART, CT_COMMENTS, CT_SHARED_STRINGS, CT_STYLES, CT_WORKBOOK,
    CT_WORKSHEET,
};
use crate::dates::IMPLICIT_DATE_FORMAT;
use crate::document::XlsxDocument;
use crate::error::XlsxError;
use crate::options::WriteOptions;
use crate::relationships::{self, rels_part_for, relative_target, Relationships};
use crate::shared_strings::{rich_text_element, SharedStrings};
use crate::styles::StyleRegistry;
use crate::surgical;
use crate::xml::{XmlElement, NS_MAIN, NS_REL};

pub(crate) const PACKAGE_RELS_PART: &str = "_rels/.rels";
pub(crate) const WORKBOOK_PART: &str = "xl/workbook.xml";
pub(crate) const STYLES_PART: &str = "xl/styles.xml";
pub(crate) const SHARED_STRINGS_PART: &str = "xl/sharedStrings.xml";

/// Write `doc` to `path`.
///
/// The archive is assembled in a temporary file next to `path` and renamed into place once
/// complete, so a failed write never leaves a partial document behind. Writing over the file the
/// document was read from is allowed.
pub fn write(
    doc: &XlsxDocument,
    path: impl AsRef<Path>,
    options: &WriteOptions,
) -> Result<(), XlsxError> {
    let path = path.as_ref();
    let mut tmp = NamedTempFile::new_in(staging_dir(path))?;
    {
        let sink = write_document(doc, BufWriter::new(tmp.as_file_mut()), options)?;
        let file = sink.into_inner().map_err(|err| err.into_error())?;
        file.sync_all()?;
    }
    tmp.persist(path).map_err(|err| XlsxError::Io(err.error))?;
    debug!("wrote {}", path.display());
    Ok(())
}

/// Directory that temporary output for `path` is staged in, so the final rename stays on one
/// filesystem.
pub(crate) fn staging_dir(path: &Path) -> &Path {
    match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => Path::new("."),
    }
}

/// Write `doc` into memory.
pub fn write_to_vec(doc: &XlsxDocument, options: &WriteOptions) -> Result<Vec<u8>, XlsxError> {
    Ok(write_document(doc, Cursor::new(Vec::new()), options)?.into_inner())
}

/// Write `doc` to any seekable sink, surgically when it carries a source and the options ask
/// for it.
pub fn write_document<W: Write + Seek>(
    doc: &XlsxDocument,
    writer: W,
    options: &WriteOptions,
) -> Result<W, XlsxError> {
    match doc.source() {
        Some(source) if options.surgical => {
            surgical::write_surgical(doc.workbook(), source, writer, options)
        }
        _ => write_workbook(doc.workbook(), writer, options),
    }
}

/// Regenerate every part of `workbook` into `writer`.
pub fn write_workbook<W: Write + Seek>(
    workbook: &Workbook,
    writer: W,
    options: &WriteOptions,
) -> Result<W, XlsxError> {
    if workbook.sheets.is_empty() {
        return Err(XlsxError::InvalidWorkbook(
            "a workbook needs at least one sheet".to_string(),
        ));
    }

    let mut pass = WritePass::new(
        workbook,
        StyleRegistry::new(),
        SharedStrings::new(),
        options.pretty_print,
    );
    let mut content_types = ContentTypes::new_package();
    content_types.set_override(WORKBOOK_PART, CT_WORKBOOK);
    let mut workbook_rels = Relationships::new();
    let mut sheet_rel_ids = Vec::with_capacity(workbook.sheets.len());
    let mut rendered = Vec::with_capacity(workbook.sheets.len());
    let mut next_comments = 1;

    for (idx, sheet) in workbook.sheets.iter().enumerate() {
        let part = format!("xl/worksheets/sheet{}.xml", idx + 1);
        let comments_part = format!("xl/comments{next_comments}.xml");
        let out = pass.render_sheet(sheet, idx, &part, &comments_part)?;
        if out.comments.is_some() {
            next_comments += 1;
            content_types.set_override(&comments_part, CT_COMMENTS);
        }
        content_types.set_override(&part, CT_WORKSHEET);
        sheet_rel_ids.push(workbook_rels.add(
            relationships::WORKSHEET,
            relative_target(WORKBOOK_PART, &part),
            false,
        ));
        rendered.push((part, comments_part, out));
    }

    workbook_rels.add(
        relationships::STYLES,
        relative_target(WORKBOOK_PART, STYLES_PART),
        false,
    );
    content_types.set_override(STYLES_PART, CT_STYLES);
    let write_strings = pass.string_refs > 0 || !options.omit_empty_shared_strings;
    if write_strings {
        workbook_rels.add(
            relationships::SHARED_STRINGS,
            relative_target(WORKBOOK_PART, SHARED_STRINGS_PART),
            false,
        );
        content_types.set_override(SHARED_STRINGS_PART, CT_SHARED_STRINGS);
    }

    let pretty = options.pretty_print;
    let manifest = workbook_manifest(workbook, &sheet_rel_ids);

    let mut out = ContainerWriter::new(writer, options.compression);
    out.write_entry(CONTENT_TYPES_PART, &content_types.to_xml().to_xml_bytes(pretty)?)?;
    out.write_entry(PACKAGE_RELS_PART, &package_rels().to_xml().to_xml_bytes(pretty)?)?;
    out.write_entry(WORKBOOK_PART, &manifest.to_xml_bytes(pretty)?)?;
    out.write_entry(
        &rels_part_for(WORKBOOK_PART),
        &workbook_rels.to_xml().to_xml_bytes(pretty)?,
    )?;
    out.write_entry(STYLES_PART, &pass.styles.to_xml_bytes(pretty)?)?;
    if write_strings {
        out.write_entry(
            SHARED_STRINGS_PART,
            &pass
                .strings
                .to_xml(Some(pass.string_refs))
                .to_xml_bytes(pretty)?,
        )?;
    }
    for (part, comments_part, sheet) in &rendered {
        out.write_entry(part, &sheet.xml)?;
        if !sheet.rels.is_empty() {
            out.write_entry(&rels_part_for(part), &sheet.rels.to_xml().to_xml_bytes(pretty)?)?;
        }
        if let Some(comments) = &sheet.comments {
            out.write_entry(comments_part, comments)?;
        }
    }
    out.finish()
}

pub(crate) fn package_rels() -> Relationships {
    let mut rels = Relationships::new();
    rels.add(relationships::OFFICE_DOCUMENT, WORKBOOK_PART, false);
    rels
}

/// Registries and caches shared by every sheet regenerated in one write.
pub(crate) struct WritePass<'a> {
    workbook: &'a Workbook,
    pub(crate) styles: StyleRegistry,
    pub(crate) strings: SharedStrings,
    /// Number of cells referencing the shared string table.
    pub(crate) string_refs: usize,
    xf_cache: HashMap<(u32, bool), u32>,
    pretty: bool,
}

/// One regenerated worksheet: its part bytes, its relationships, and its comments part.
pub(crate) struct RenderedSheet {
    pub(crate) xml: Vec<u8>,
    pub(crate) rels: Relationships,
    pub(crate) comments: Option<Vec<u8>>,
}

impl<'a> WritePass<'a> {
    pub(crate) fn new(
        workbook: &'a Workbook,
        styles: StyleRegistry,
        strings: SharedStrings,
        pretty: bool,
    ) -> Self {
        Self {
            workbook,
            styles,
            strings,
            string_refs: 0,
            xf_cache: HashMap::new(),
            pretty,
        }
    }

    /// `cellXfs` index for a model style, with the implicit date format added for date-times
    /// whose style has no number format.
    fn xf_for(&mut self, style_id: u32, date: bool) -> u32 {
        if let Some(&xf) = self.xf_cache.get(&(style_id, date)) {
            return xf;
        }
        let mut style = self
            .workbook
            .styles
            .get(style_id)
            .cloned()
            .unwrap_or_default();
        if date && style.number_format.is_none() {
            style.number_format = Some(IMPLICIT_DATE_FORMAT.to_string());
        }
        let xf = if style.is_default() {
            0
        } else {
            self.styles.register(&style)
        };
        self.xf_cache.insert((style_id, date), xf);
        xf
    }

    fn encode(&mut self, cell: &Cell) -> EncodedCell {
        CellTarget::Document {
            strings: &mut self.strings,
            date_system: self.workbook.date_system,
            references: &mut self.string_refs,
        }
        .encode(&cell.value)
    }

    pub(crate) fn render_sheet(
        &mut self,
        sheet: &Worksheet,
        index: usize,
        part: &str,
        comments_part: &str,
    ) -> Result<RenderedSheet, XlsxError> {
        let mut rels = Relationships::new();
        let mut root = XmlElement::new("worksheet")
            .with_attr("xmlns", NS_MAIN)
            .with_attr("xmlns:r", NS_REL);

        let dimension = sheet
            .used_range()
            .map_or_else(|| "A1".to_string(), |range| range.to_string());
        root.push(XmlElement::new("dimension").with_attr("ref", dimension));

        let mut view = XmlElement::new("sheetView");
        if index == self.workbook.active_sheet {
            view.set_attr("tabSelected", "1");
        }
        view.set_attr("workbookViewId", "0");
        root.push(XmlElement::new("sheetViews").with_child(view));
        root.push(XmlElement::new("sheetFormatPr").with_attr("defaultRowHeight", "15"));

        if let Some(cols) = cols_element(sheet) {
            root.push(cols);
        }
        root.push(self.sheet_data(sheet));

        if !sheet.merged_ranges.is_empty() {
            let mut merges = XmlElement::new("mergeCells")
                .with_attr("count", sheet.merged_ranges.len().to_string());
            for range in &sheet.merged_ranges {
                merges.push(XmlElement::new("mergeCell").with_attr("ref", range.to_string()));
            }
            root.push(merges);
        }

        let cells = sheet.sorted_cells();
        let links: Vec<(CellRef, &Hyperlink)> = cells
            .iter()
            .filter_map(|(at, cell)| Some((*at, cell.hyperlink.as_ref()?)))
            .collect();
        if !links.is_empty() {
            let mut hyperlinks = XmlElement::new("hyperlinks");
            for (at, link) in links {
                let el = XmlElement::new("hyperlink").with_attr("ref", at.to_a1());
                let el = match link {
                    Hyperlink::External(target) => el.with_attr(
                        "r:id",
                        rels.add(relationships::HYPERLINK, target.as_str(), true),
                    ),
                    Hyperlink::Internal(location) => el.with_attr("location", location.as_str()),
                };
                hyperlinks.push(el);
            }
            root.push(hyperlinks);
        }

        let notes: Vec<(CellRef, &Comment)> = cells
            .iter()
            .filter_map(|(at, cell)| Some((*at, cell.comment.as_ref()?)))
            .collect();
        let comments = if notes.is_empty() {
            None
        } else {
            rels.add(
                relationships::COMMENTS,
                relative_target(part, comments_part),
                false,
            );
            Some(comments_element(&notes).to_xml_bytes(self.pretty)?)
        };

        Ok(RenderedSheet {
            xml: root.to_xml_bytes(self.pretty)?,
            rels,
            comments,
        })
    }

    fn sheet_data(&mut self, sheet: &Worksheet) -> XmlElement {
        let mut rows: BTreeMap<u32, Vec<XmlElement>> = sheet
            .row_heights
            .keys()
            .map(|&row| (row, Vec::new()))
            .collect();
        for (at, cell) in sheet.sorted_cells() {
            let xf = self.xf_for(cell.style_id, needs_date_format(&cell.value));
            if cell.value.is_empty() && xf == 0 {
                continue;
            }
            let encoded = self.encode(cell);
            rows.entry(at.row)
                .or_default()
                .push(cell_element(at, xf, encoded));
        }

        let mut data = XmlElement::new("sheetData");
        for (row, cells) in rows {
            let mut el = XmlElement::new("row").with_attr("r", (row + 1).to_string());
            if let Some(height) = sheet.row_heights.get(&row) {
                el.set_attr("ht", height.to_string());
                el.set_attr("customHeight", "1");
            }
            for c in cells {
                el.push(c);
            }
            data.push(el);
        }
        data
    }
}

fn cell_element(at: CellRef, xf: u32, encoded: EncodedCell) -> XmlElement {
    let mut c = XmlElement::new("c").with_attr("r", at.to_a1());
    if xf != 0 {
        c.set_attr("s", xf.to_string());
    }
    if let Some(kind) = encoded.kind {
        c.set_attr("t", kind);
    }
    if let Some(formula) = encoded.formula {
        c.push(XmlElement::new("f").with_text(formula));
    }
    if let Some(value) = encoded.value {
        c.push(XmlElement::new("v").with_text(value));
    }
    if let Some(inline) = &encoded.inline {
        c.push(rich_text_element("is", inline));
    }
    c
}

/// `<cols>` with runs of equal widths collapsed into one `<col min max>`.
fn cols_element(sheet: &Worksheet) -> Option<XmlElement> {
    let mut runs: Vec<(u32, u32, f64)> = Vec::new();
    for (&col, &width) in &sheet.col_widths {
        match runs.last_mut() {
            Some((_, max, w)) if *max + 1 == col && *w == width => *max = col,
            _ => runs.push((col, col, width)),
        }
    }
    if runs.is_empty() {
        return None;
    }
    let mut cols = XmlElement::new("cols");
    for (min, max, width) in runs {
        cols.push(
            XmlElement::new("col")
                .with_attr("min", (min + 1).to_string())
                .with_attr("max", (max + 1).to_string())
                .with_attr("width", width.to_string())
                .with_attr("customWidth", "1"),
        );
    }
    Some(cols)
}

fn comments_element(notes: &[(CellRef, &Comment)]) -> XmlElement {
    let mut authors: Vec<&str> = Vec::new();
    let mut list = XmlElement::new("commentList");
    for (at, note) in notes {
        let author_id = match authors.iter().position(|a| *a == note.author) {
            Some(id) => id,
            None => {
                authors.push(&note.author);
                authors.len() - 1
            }
        };
        list.push(
            XmlElement::new("comment")
                .with_attr("ref", at.to_a1())
                .with_attr("authorId", author_id.to_string())
                .with_child(rich_text_element("text", &RichText::new(note.text.as_str()))),
        );
    }
    let authors = authors.into_iter().fold(XmlElement::new("authors"), |el, a| {
        el.with_child(XmlElement::new("author").with_text(a))
    });
    XmlElement::new("comments")
        .with_attr("xmlns", NS_MAIN)
        .with_child(authors)
        .with_child(list)
}

/// `xl/workbook.xml` for `workbook`; `rel_ids[i]` is the relationship id of sheet `i`.
pub(crate) fn workbook_manifest(workbook: &Workbook, rel_ids: &[String]) -> XmlElement {
    let mut pr = XmlElement::new("workbookPr");
    if workbook.date_system == DateSystem::Excel1904 {
        pr.set_attr("date1904", "1");
    }
    let mut root = XmlElement::new("workbook")
        .with_attr("xmlns", NS_MAIN)
        .with_attr("xmlns:r", NS_REL)
        .with_child(pr)
        .with_child(
            XmlElement::new("bookViews").with_child(
                XmlElement::new("workbookView")
                    .with_attr("activeTab", workbook.active_sheet.to_string()),
            ),
        );

    let mut sheets = XmlElement::new("sheets");
    for (idx, (sheet, rel_id)) in workbook.sheets.iter().zip(rel_ids).enumerate() {
        sheets.push(sheet_element("sheet", sheet, idx as u32 + 1, rel_id));
    }
    root.push(sheets);
    if let Some(names) = defined_names_element("", &workbook.defined_names) {
        root.push(names);
    }
    root
}

/// `<sheet>` entry of the manifest; `name` is the qualified element name.
pub(crate) fn sheet_element(
    name: &str,
    sheet: &Worksheet,
    sheet_id: u32,
    rel_id: &str,
) -> XmlElement {
    let mut el = XmlElement::new(name)
        .with_attr("name", sheet.name.as_str())
        .with_attr("sheetId", sheet_id.to_string());
    match sheet.visibility {
        SheetVisibility::Visible => {}
        SheetVisibility::Hidden => el.set_attr("state", "hidden"),
        SheetVisibility::VeryHidden => el.set_attr("state", "veryHidden"),
    }
    el.with_attr("r:id", rel_id)
}

/// `<definedNames>` for `names`, or `None` when there are none.
pub(crate) fn defined_names_element(prefix: &str, names: &[DefinedName]) -> Option<XmlElement> {
    if names.is_empty() {
        return None;
    }
    let mut el = XmlElement::new(format!("{prefix}definedNames"));
    for name in names {
        let mut entry = XmlElement::new(format!("{prefix}definedName"))
            .with_attr("name", name.name.as_str());
        if let Some(sheet) = name.local_sheet {
            entry.set_attr("localSheetId", sheet.to_string());
        }
        if name.hidden {
            entry.set_attr("hidden", "1");
        }
        el.push(entry.with_text(name.refers_to.as_str()));
    }
    Some(el)
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;
    use pretty_assertions::assert_eq;
    use tabula_model::{CellValue, Color, Fill, Font, Formula, Range, Style};

    use super::*;
    use crate::options::ReadOptions;
    use crate::read::read_from_bytes;

    fn at(a1: &str) -> CellRef {
        CellRef::from_a1(a1).unwrap()
    }

    fn write_bytes(workbook: &Workbook) -> Vec<u8> {
        write_to_vec(&XlsxDocument::new(workbook.clone()), &WriteOptions::default()).unwrap()
    }

    fn read_back(bytes: Vec<u8>) -> Workbook {
        read_from_bytes(bytes, &ReadOptions::default())
            .unwrap()
            .0
            .into_workbook()
    }

    fn sample() -> Workbook {
        let mut workbook = Workbook::new();
        let idx = workbook.add_sheet("Sales").unwrap();
        let bold = workbook.intern_style(Style {
            font: Some(Font {
                bold: true,
                ..Font::default()
            }),
            ..Style::default()
        });
        let shaded = workbook.intern_style(Style {
            fill: Some(Fill::solid(Color::argb(0xFFFF_FF00))),
            number_format: Some("0.00".to_string()),
            ..Style::default()
        });
        let sheet = workbook.sheet_mut(idx).unwrap();
        sheet.set_cell(at("A1"), Cell::new("Product").with_style(bold));
        sheet.set_cell(at("B1"), Cell::new("Price").with_style(bold));
        sheet.set_value(at("A2"), "Widget");
        sheet.set_cell(at("B2"), Cell::new(19.99).with_style(shaded));
        sheet.set_value(
            at("C2"),
            NaiveDate::from_ymd_opt(2024, 2, 29)
                .unwrap()
                .and_hms_opt(13, 30, 0)
                .unwrap(),
        );
        sheet.set_value(at("D2"), Formula::new("B2*2").with_cached(39.98));
        sheet.set_value(at("E2"), Formula::new("A2&\"!\"").with_cached("Widget!"));
        sheet.set_cell(
            at("A3"),
            Cell::new("see docs")
                .with_hyperlink(Hyperlink::External("https://example.com/docs".into()))
                .with_comment(Comment::new("Ann", " spaced note ")),
        );
        sheet.set_cell(
            at("B3"),
            Cell::default().with_hyperlink(Hyperlink::Internal("Sales!A1".into())),
        );
        sheet.merge(Range::from_a1("F1:G2").unwrap());
        sheet.col_widths.insert(0, 18.0);
        sheet.col_widths.insert(1, 18.0);
        sheet.row_heights.insert(9, 24.5);
        workbook
    }

    #[test]
    fn round_trip_preserves_cells_and_annotations() {
        let workbook = sample();
        assert_eq!(read_back(write_bytes(&workbook)), workbook);
    }

    #[test]
    fn output_is_byte_stable() {
        let workbook = sample();
        assert_eq!(write_bytes(&workbook), write_bytes(&workbook));
    }

    #[test]
    fn empty_workbook_is_rejected() {
        let err = write_to_vec(&XlsxDocument::new(Workbook::new()), &WriteOptions::default())
            .unwrap_err();
        assert!(matches!(err, XlsxError::InvalidWorkbook(_)));
    }

    #[test]
    fn workbook_metadata_round_trips() {
        let mut workbook = Workbook::new();
        workbook.add_sheet("One").unwrap();
        workbook.add_sheet("Two").unwrap();
        workbook.sheets[1].visibility = SheetVisibility::VeryHidden;
        workbook.sheets[0].set_value(at("A1"), 1.0);
        workbook.active_sheet = 1;
        workbook.date_system = DateSystem::Excel1904;
        workbook.defined_names.push(DefinedName {
            name: "Scoped".into(),
            refers_to: "Two!$A$1".into(),
            local_sheet: Some(1),
            hidden: true,
        });
        assert_eq!(read_back(write_bytes(&workbook)), workbook);
    }

    #[test]
    fn shared_strings_are_deduplicated_and_omitted_when_unused() {
        let mut workbook = Workbook::new();
        workbook.add_sheet("S").unwrap();
        workbook.sheets[0].set_value(at("A1"), 42.0);
        let bytes = write_bytes(&workbook);
        let container = crate::container::Container::from_reader(
            Cursor::new(bytes),
            &ReadOptions::default(),
        )
        .unwrap();
        assert!(!container.contains(SHARED_STRINGS_PART).unwrap());

        workbook.sheets[0].set_value(at("A2"), "dup");
        workbook.sheets[0].set_value(at("A3"), "dup");
        let bytes = write_bytes(&workbook);
        let mut container = crate::container::Container::from_reader(
            Cursor::new(bytes),
            &ReadOptions::default(),
        )
        .unwrap();
        let sst = String::from_utf8(container.read_entry(SHARED_STRINGS_PART).unwrap()).unwrap();
        assert!(sst.contains(r#"count="2" uniqueCount="1""#), "{sst}");
    }

    #[test]
    fn non_finite_numbers_become_num_errors() {
        let mut workbook = Workbook::new();
        workbook.add_sheet("S").unwrap();
        workbook.sheets[0].set_value(at("A1"), f64::NAN);
        let back = read_back(write_bytes(&workbook));
        assert_eq!(
            back.sheets[0].value(at("A1")),
            &CellValue::Error(tabula_model::ErrorValue::Num)
        );
    }

    #[test]
    fn atomic_write_replaces_the_destination() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("book.xlsx");
        std::fs::write(&path, b"stale").unwrap();
        let doc = XlsxDocument::new(sample());
        write(&doc, &path, &WriteOptions::default()).unwrap();
        let (back, _) = crate::read::read(&path, &ReadOptions::default()).unwrap();
        assert_eq!(back.workbook(), doc.workbook());
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
    }
}
