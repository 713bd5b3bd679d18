//! Whole-document reader.
//!
//! Parts are located through the [`PartRegistry`], shared parts are decoded once, and every
//! worksheet is parsed into a tree and folded into the model.

use std::collections::HashMap;
use std::io::{Read, Seek};
use std::path::Path;
use std::sync::Arc;

use log::debug;
use tabula_model::{
    Cell, CellRef, CellValue, Comment, DateSystem, DefinedName, Hyperlink, Range, Style,
    StyleTable, Workbook, Worksheet, MAX_COL, MAX_ROW,
};

use crate::cells::{CellDecoder, RawCell, RawFormula};
use crate::container::{Container, ContainerSource};
use crate::dates::IMPLICIT_DATE_FORMAT;
use crate::document::{SourceContext, XlsxDocument};
use crate::error::{ReadWarning, XlsxError};
use crate::options::ReadOptions;
use crate::parts::{PartRegistry, SheetEntry};
use crate::relationships::{self, rels_part_for, resolve_target, Relationships};
use crate::shared_strings::{rich_text_from_element, SharedStrings};
use crate::styles::{is_date_style, StyleRegistry};
use crate::xml::XmlElement;

/// Read the document at `path`. The result remembers its source for surgical writes.
pub fn read(
    path: impl AsRef<Path>,
    options: &ReadOptions,
) -> Result<(XlsxDocument, Vec<ReadWarning>), XlsxError> {
    read_source(ContainerSource::Path(path.as_ref().to_path_buf()), options)
}

/// Read a document held in memory.
pub fn read_from_bytes(
    bytes: impl Into<Vec<u8>>,
    options: &ReadOptions,
) -> Result<(XlsxDocument, Vec<ReadWarning>), XlsxError> {
    read_source(ContainerSource::Bytes(Arc::from(bytes.into())), options)
}

/// Read a workbook from any seekable reader, without keeping a source context.
pub fn read_workbook<R: Read + Seek>(
    reader: R,
    options: &ReadOptions,
) -> Result<(Workbook, Vec<ReadWarning>), XlsxError> {
    let mut container = Container::from_reader(reader, options)?;
    read_container(&mut container)
}

fn read_source(
    source: ContainerSource,
    options: &ReadOptions,
) -> Result<(XlsxDocument, Vec<ReadWarning>), XlsxError> {
    let (workbook, warnings) = {
        let mut container = source.open(options)?;
        read_container(&mut container)?
    };
    let context = SourceContext::new(source, options.clone(), workbook.sheets.len());
    Ok((XlsxDocument::with_source(workbook, context), warnings))
}

pub(crate) fn read_container<R: Read + Seek>(
    container: &mut Container<R>,
) -> Result<(Workbook, Vec<ReadWarning>), XlsxError> {
    let registry = PartRegistry::discover(container)?;
    let mut warnings = registry.warnings.clone();

    let styles = match &registry.styles_part {
        Some(part) => StyleRegistry::parse(&container.read_entry(part)?, part)?,
        None => StyleRegistry::new(),
    };
    let strings = match &registry.shared_strings_part {
        Some(part) => SharedStrings::parse(container.read_entry(part)?.as_slice(), part)?,
        None => SharedStrings::new(),
    };

    let mut workbook = Workbook::new();
    let manifest_positions = manifest_positions(&registry);
    read_workbook_properties(
        &registry.manifest,
        &manifest_positions,
        &mut workbook,
        &mut warnings,
        registry.workbook_part(),
    );

    let mut resolver = StyleResolver::new(&styles);
    for entry in registry.sheets() {
        if workbook.sheet_index(&entry.name).is_some() {
            return Err(XlsxError::malformed(format!(
                "duplicate sheet name {}",
                entry.name
            )));
        }
        let decoder = CellDecoder {
            part: &entry.part,
            strings: &strings,
            date_system: workbook.date_system,
        };
        let sheet = read_sheet(
            container,
            entry,
            &decoder,
            &mut resolver,
            &mut workbook.styles,
            &mut warnings,
        )?;
        workbook.sheets.push(sheet);
    }
    if workbook.active_sheet >= workbook.sheets.len() {
        workbook.active_sheet = 0;
    }
    Ok((workbook, warnings))
}

/// Model index of each `<sheet>` listed in the manifest; non-worksheet entries map to `None`.
fn manifest_positions(registry: &PartRegistry) -> Vec<Option<usize>> {
    let Some(listed) = registry.manifest.child("sheets") else {
        return Vec::new();
    };
    listed
        .children_by_local("sheet")
        .map(|sheet| {
            let rel_id = sheet.rel_id()?;
            registry.sheets().iter().position(|s| s.rel_id == rel_id)
        })
        .collect()
}

fn read_workbook_properties(
    manifest: &XmlElement,
    positions: &[Option<usize>],
    workbook: &mut Workbook,
    warnings: &mut Vec<ReadWarning>,
    part: &str,
) {
    if let Some(pr) = manifest.child("workbookPr") {
        if pr
            .attr("date1904")
            .is_some_and(|v| v == "1" || v.eq_ignore_ascii_case("true"))
        {
            workbook.date_system = DateSystem::Excel1904;
        }
    }

    let active_tab = manifest
        .child("bookViews")
        .and_then(|views| views.child("workbookView"))
        .and_then(|view| view.attr("activeTab"))
        .and_then(|tab| tab.parse::<usize>().ok());
    if let Some(tab) = active_tab {
        workbook.active_sheet = positions.get(tab).copied().flatten().unwrap_or(0);
    }

    let Some(names) = manifest.child("definedNames") else {
        return;
    };
    for name in names.children_by_local("definedName") {
        let Some(label) = name.attr("name") else {
            continue;
        };
        let local_sheet = match name.attr("localSheetId").map(str::parse::<usize>) {
            None => None,
            Some(Ok(idx)) => match positions.get(idx).copied().flatten() {
                Some(model_idx) => Some(model_idx),
                None => {
                    warnings.push(ReadWarning::unsupported(
                        part,
                        format!("defined name {label} scoped to a non-worksheet sheet"),
                    ));
                    continue;
                }
            },
            Some(Err(_)) => continue,
        };
        workbook.defined_names.push(DefinedName {
            name: label.to_string(),
            refers_to: name.text().trim_start_matches('=').to_string(),
            local_sheet,
            hidden: name
                .attr("hidden")
                .is_some_and(|v| v == "1" || v.eq_ignore_ascii_case("true")),
        });
    }
}

/// Maps `cellXfs` indices to model style ids, interning styles on first use.
pub(crate) struct StyleResolver<'a> {
    registry: &'a StyleRegistry,
    resolved: HashMap<u32, (u32, bool)>,
    implicit_dates: HashMap<u32, u32>,
}

impl<'a> StyleResolver<'a> {
    pub(crate) fn new(registry: &'a StyleRegistry) -> Self {
        Self {
            registry,
            resolved: HashMap::new(),
            implicit_dates: HashMap::new(),
        }
    }

    /// Model style id and date flag of `xf`.
    pub(crate) fn resolve(&mut self, xf: u32, table: &mut StyleTable) -> (u32, bool) {
        if let Some(&hit) = self.resolved.get(&xf) {
            return hit;
        }
        let resolved = match self.registry.get(xf) {
            Some(style) => (table.intern(style.clone()), is_date_style(style)),
            None => {
                debug!("cell references missing cellXfs record {xf}");
                (0, false)
            }
        };
        self.resolved.insert(xf, resolved);
        resolved
    }

    /// Style id for a date-time read through `xf`. The writer's implicit date format is
    /// dropped so that such cells read back with the style they were written with.
    pub(crate) fn resolve_datetime(&mut self, xf: u32, table: &mut StyleTable) -> u32 {
        if let Some(&hit) = self.implicit_dates.get(&xf) {
            return hit;
        }
        let (style_id, _) = self.resolve(xf, table);
        let id = match table.get(style_id) {
            Some(style) if style.number_format.as_deref() == Some(IMPLICIT_DATE_FORMAT) => {
                table.intern(Style {
                    number_format: None,
                    ..style.clone()
                })
            }
            _ => style_id,
        };
        self.implicit_dates.insert(xf, id);
        id
    }
}

fn read_sheet<R: Read + Seek>(
    container: &mut Container<R>,
    entry: &SheetEntry,
    decoder: &CellDecoder<'_>,
    resolver: &mut StyleResolver<'_>,
    table: &mut StyleTable,
    warnings: &mut Vec<ReadWarning>,
) -> Result<Worksheet, XlsxError> {
    let part = entry.part.as_str();
    let root = XmlElement::parse(&container.read_entry(part)?, part)?;
    if root.local_name() != "worksheet" {
        return Err(XlsxError::parse(
            part,
            0,
            format!("expected <worksheet>, found <{}>", root.name),
        ));
    }
    let rels_part = rels_part_for(part);
    let rels = match container.read_entry_optional(&rels_part)? {
        Some(bytes) => Relationships::parse(&bytes, &rels_part)?,
        None => Relationships::new(),
    };

    let mut sheet = Worksheet::new(entry.name.as_str());
    sheet.visibility = entry.visibility;

    if let Some(cols) = root.child("cols") {
        read_cols(cols, &mut sheet);
    }
    if let Some(data) = root.child("sheetData") {
        read_sheet_data(data, part, decoder, resolver, table, &mut sheet, warnings)?;
    }
    if let Some(merges) = root.child("mergeCells") {
        for merge in merges.children_by_local("mergeCell") {
            let Some(reference) = merge.attr("ref") else {
                continue;
            };
            let range = Range::from_a1(reference).map_err(|err| {
                XlsxError::parse(part, 0, format!("bad merge range {reference}: {err}"))
            })?;
            sheet.merge(range);
        }
    }
    if let Some(links) = root.child("hyperlinks") {
        read_hyperlinks(links, &rels, part, &mut sheet, warnings)?;
    }

    let comments_rel = rels
        .iter()
        .find(|r| r.is_kind(relationships::COMMENTS) && !r.is_external());
    if let Some(rel) = comments_rel {
        let target = resolve_target(part, &rel.target);
        match container.read_entry_optional(&target)? {
            Some(bytes) => read_comments(&bytes, &target, &mut sheet)?,
            None => debug!("comments part {target} referenced by {part} is missing"),
        }
    }

    for (child, feature) in [
        ("drawing", "drawings"),
        ("tableParts", "tables"),
        ("conditionalFormatting", "conditional formatting"),
        ("dataValidations", "data validation"),
        ("autoFilter", "auto-filter"),
        ("sheetProtection", "sheet protection"),
    ] {
        if root.child(child).is_some() {
            warnings.push(ReadWarning::unsupported(part, feature));
        }
    }
    if root.child("legacyDrawing").is_some() && comments_rel.is_none() {
        warnings.push(ReadWarning::unsupported(part, "legacy drawing"));
    }

    Ok(sheet)
}

fn read_cols(cols: &XmlElement, sheet: &mut Worksheet) {
    for col in cols.children_by_local("col") {
        let bound = |name: &str| col.attr(name).and_then(|v| v.parse::<u32>().ok());
        let (Some(min), Some(max)) = (bound("min"), bound("max")) else {
            continue;
        };
        let Some(width) = col.attr("width").and_then(|v| v.parse::<f64>().ok()) else {
            continue;
        };
        if min == 0 || max < min {
            continue;
        }
        for idx in min..=max.min(MAX_COL + 1) {
            sheet.col_widths.insert(idx - 1, width);
        }
    }
}

fn read_sheet_data(
    data: &XmlElement,
    part: &str,
    decoder: &CellDecoder<'_>,
    resolver: &mut StyleResolver<'_>,
    table: &mut StyleTable,
    sheet: &mut Worksheet,
    warnings: &mut Vec<ReadWarning>,
) -> Result<(), XlsxError> {
    let mut next_row = 0u32;
    for row in data.children_by_local("row") {
        let row_idx = match row.attr("r") {
            Some(r) => r
                .parse::<u32>()
                .ok()
                .filter(|r| (1..=MAX_ROW + 1).contains(r))
                .map(|r| r - 1)
                .ok_or_else(|| XlsxError::parse(part, 0, format!("bad row index {r:?}")))?,
            None if next_row > MAX_ROW => {
                return Err(XlsxError::parse(
                    part,
                    0,
                    format!("implicit row index past row {}", MAX_ROW + 1),
                ));
            }
            None => next_row,
        };
        next_row = row_idx + 1;

        if let Some(height) = row.attr("ht").and_then(|v| v.parse::<f64>().ok()) {
            if row
                .attr("customHeight")
                .is_some_and(|v| v == "1" || v.eq_ignore_ascii_case("true"))
            {
                sheet.row_heights.insert(row_idx, height);
            }
        }

        let mut next_col = 0u32;
        for c in row.children_by_local("c") {
            let raw = raw_cell(c);
            let at = match raw.reference.as_deref() {
                Some(reference) => CellRef::from_a1(reference).map_err(|err| {
                    XlsxError::parse(part, 0, format!("bad cell reference {reference}: {err}"))
                })?,
                None if next_col > MAX_COL => {
                    return Err(XlsxError::parse(
                        part,
                        0,
                        format!("implicit column index past the last column in row {}", row_idx + 1),
                    ));
                }
                None => CellRef::new(row_idx, next_col),
            };
            next_col = at.col + 1;

            let (style_id, is_date) = resolver.resolve(raw.style, table);
            let value = decoder.cell(&raw, is_date, warnings)?;
            let style_id = match value.effective() {
                CellValue::DateTime(_) if is_date => resolver.resolve_datetime(raw.style, table),
                _ => style_id,
            };
            sheet.set_cell(
                at,
                Cell {
                    value,
                    style_id,
                    ..Cell::default()
                },
            );
        }
    }
    Ok(())
}

fn raw_cell(c: &XmlElement) -> RawCell {
    let formula = c.child("f").map(|f| RawFormula {
        text: f.text().into_owned(),
        shared: f.attr("t") == Some("shared"),
    });
    RawCell {
        reference: c.attr("r").map(str::to_string),
        kind: c.attr("t").map(str::to_string),
        style: c.attr("s").and_then(|s| s.parse().ok()).unwrap_or(0),
        value: c.child("v").map(|v| v.text().into_owned()),
        formula,
        inline: c.child("is").map(rich_text_from_element),
    }
}

fn read_hyperlinks(
    links: &XmlElement,
    rels: &Relationships,
    part: &str,
    sheet: &mut Worksheet,
    warnings: &mut Vec<ReadWarning>,
) -> Result<(), XlsxError> {
    for link in links.children_by_local("hyperlink") {
        let Some(reference) = link.attr("ref") else {
            continue;
        };
        let range = Range::from_a1(reference).map_err(|err| {
            XlsxError::parse(part, 0, format!("bad hyperlink range {reference}: {err}"))
        })?;
        if !range.is_single_cell() {
            warnings.push(ReadWarning::unsupported(
                part,
                format!("hyperlink spanning {reference}"),
            ));
        }
        let target = match (link.rel_id(), link.attr("location")) {
            (Some(id), _) => match rels.get(id) {
                Some(rel) => Hyperlink::External(rel.target.clone()),
                None => {
                    debug!("hyperlink at {reference} references unknown relationship {id}");
                    continue;
                }
            },
            (None, Some(location)) => Hyperlink::Internal(location.to_string()),
            (None, None) => continue,
        };
        attach(sheet, range.start, |cell| cell.hyperlink = Some(target));
    }
    Ok(())
}

fn read_comments(bytes: &[u8], part: &str, sheet: &mut Worksheet) -> Result<(), XlsxError> {
    let root = XmlElement::parse(bytes, part)?;
    let authors: Vec<String> = root
        .child("authors")
        .map(|a| {
            a.children_by_local("author")
                .map(|author| author.text().into_owned())
                .collect()
        })
        .unwrap_or_default();
    let Some(list) = root.child("commentList") else {
        return Ok(());
    };
    for comment in list.children_by_local("comment") {
        let Some(reference) = comment.attr("ref") else {
            continue;
        };
        let at = CellRef::from_a1(reference).map_err(|err| {
            XlsxError::parse(part, 0, format!("bad comment reference {reference}: {err}"))
        })?;
        let author = comment
            .attr("authorId")
            .and_then(|id| id.parse::<usize>().ok())
            .and_then(|id| authors.get(id))
            .cloned()
            .unwrap_or_default();
        let text = comment
            .child("text")
            .map(|t| rich_text_from_element(t).text)
            .unwrap_or_default();
        attach(sheet, at, |cell| cell.comment = Some(Comment { author, text }));
    }
    Ok(())
}

fn attach(sheet: &mut Worksheet, at: CellRef, update: impl FnOnce(&mut Cell)) {
    match sheet.cell_mut(at) {
        Some(cell) => update(cell),
        None => {
            let mut cell = Cell::default();
            update(&mut cell);
            sheet.set_cell(at, cell);
        }
    }
}
