use std::fmt;
use std::fs::File;
use std::io::{BufReader, Read, Seek};
use std::path::Path;

use log::{debug, trace};
use tabula_model::{CellRef, DateSystem, MAX_COL, MAX_ROW};

use super::RowRecord;
use crate::cells::{CellDecoder, RawCell};
use crate::container::{Container, EntryStream};
use crate::error::{ReadWarning, XlsxError};
use crate::events::{XmlCursor, XmlEvent};
use crate::options::ReadOptions;
use crate::parts::PartRegistry;
use crate::shared_strings::{read_rich_text, SharedStrings};

/// Which worksheet to stream.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SheetSelector {
    /// Sheet name, compared case-insensitively.
    Name(String),
    /// 0-based position among the worksheets.
    Index(usize),
}

impl From<&str> for SheetSelector {
    fn from(name: &str) -> Self {
        SheetSelector::Name(name.to_string())
    }
}

impl From<String> for SheetSelector {
    fn from(name: String) -> Self {
        SheetSelector::Name(name)
    }
}

impl From<usize> for SheetSelector {
    fn from(index: usize) -> Self {
        SheetSelector::Index(index)
    }
}

impl fmt::Display for SheetSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SheetSelector::Name(name) => f.write_str(name),
            SheetSelector::Index(idx) => write!(f, "#{idx}"),
        }
    }
}

/// Forward-only iterator over the rows of one worksheet.
///
/// Only the shared string table is loaded up front; the worksheet entry is inflated and parsed
/// lazily as rows are pulled. Values are yielded without style information, so date serials
/// stay numbers and formulas yield their cached results. Dropping the reader releases the
/// container.
pub struct StreamingReader<R: Read> {
    cursor: XmlCursor<BufReader<EntryStream<R>>>,
    strings: SharedStrings,
    date_system: DateSystem,
    part: String,
    sheet_name: String,
    in_sheet_data: bool,
    finished: bool,
    last_row: Option<u32>,
    warnings: Vec<ReadWarning>,
}

impl StreamingReader<BufReader<File>> {
    pub fn open(
        path: impl AsRef<Path>,
        sheet: impl Into<SheetSelector>,
        options: &ReadOptions,
    ) -> Result<Self, XlsxError> {
        Self::from_container(Container::open(path, options)?, sheet.into())
    }
}

impl<R: Read + Seek> StreamingReader<R> {
    pub fn from_reader(
        reader: R,
        sheet: impl Into<SheetSelector>,
        options: &ReadOptions,
    ) -> Result<Self, XlsxError> {
        Self::from_container(Container::from_reader(reader, options)?, sheet.into())
    }

    fn from_container(
        mut container: Container<R>,
        selector: SheetSelector,
    ) -> Result<Self, XlsxError> {
        let registry = PartRegistry::discover(&mut container)?;
        let index = match &selector {
            SheetSelector::Name(name) => registry.sheet_index(name),
            SheetSelector::Index(idx) => Some(*idx).filter(|idx| *idx < registry.sheets().len()),
        }
        .ok_or_else(|| XlsxError::SheetNotFound(selector.to_string()))?;
        let entry = registry.sheets()[index].clone();

        let date_system = match registry
            .manifest
            .child("workbookPr")
            .and_then(|pr| pr.attr("date1904"))
        {
            Some("1") | Some("true") => DateSystem::Excel1904,
            _ => DateSystem::Excel1900,
        };
        let strings = match &registry.shared_strings_part {
            Some(part) => SharedStrings::parse(container.read_entry(part)?.as_slice(), part)?,
            None => SharedStrings::new(),
        };
        debug!(
            "streaming {} from {} with {} shared strings",
            entry.name,
            entry.part,
            strings.len()
        );

        let stream = container.into_entry_stream(&entry.part)?;
        Ok(Self {
            cursor: XmlCursor::new(BufReader::new(stream), entry.part.as_str()),
            strings,
            date_system,
            part: entry.part,
            sheet_name: entry.name,
            in_sheet_data: false,
            finished: false,
            last_row: None,
            warnings: registry.warnings,
        })
    }
}

impl<R: Read> StreamingReader<R> {
    pub fn sheet_name(&self) -> &str {
        &self.sheet_name
    }

    /// Non-fatal findings collected so far.
    pub fn warnings(&self) -> &[ReadWarning] {
        &self.warnings
    }

    fn next_row(&mut self) -> Result<Option<RowRecord>, XlsxError> {
        while let Some(event) = self.cursor.advance()? {
            match &event {
                XmlEvent::Open { attrs, .. } => match event.local_name() {
                    Some("worksheet") if !self.in_sheet_data => {}
                    Some("sheetData") if !self.in_sheet_data => self.in_sheet_data = true,
                    Some("row") if self.in_sheet_data => {
                        let row = self.read_row(attrs)?;
                        if !row.cells.is_empty() {
                            trace!("row {} with {} cells", row.index, row.cells.len());
                            return Ok(Some(row));
                        }
                    }
                    _ => self.cursor.skip_element()?,
                },
                XmlEvent::Close { .. } if event.local_name() == Some("sheetData") => {
                    return Ok(None);
                }
                _ => {}
            }
        }
        Ok(None)
    }

    fn read_row(&mut self, attrs: &[(String, String)]) -> Result<RowRecord, XlsxError> {
        let index = match attr(attrs, "r") {
            Some(r) => r
                .parse::<u32>()
                .ok()
                .filter(|r| (1..=MAX_ROW + 1).contains(r))
                .ok_or_else(|| self.error(format!("bad row index {r:?}")))?,
            None => match self.last_row {
                None => 1,
                Some(last) => last
                    .checked_add(1)
                    .filter(|next| *next <= MAX_ROW + 1)
                    .ok_or_else(|| {
                        self.error(format!("implicit row index past row {}", MAX_ROW + 1))
                    })?,
            },
        };
        if let Some(last) = self.last_row.filter(|last| index <= *last) {
            return Err(self.error(format!("row {index} follows row {last}")));
        }
        self.last_row = Some(index);

        let mut row = RowRecord::new(index);
        let mut next_col = 0u32;
        while let Some(event) = self.cursor.advance()? {
            match &event {
                XmlEvent::Open { attrs, .. } if event.local_name() == Some("c") => {
                    let raw = self.read_cell(attrs)?;
                    let col = match raw.reference.as_deref() {
                        Some(reference) => CellRef::from_a1(reference)
                            .map_err(|err| {
                                self.error(format!("bad cell reference {reference}: {err}"))
                            })?
                            .col,
                        None if next_col > MAX_COL => {
                            return Err(self.error(format!(
                                "implicit column index past the last column in row {index}"
                            )));
                        }
                        None => next_col,
                    };
                    next_col = col + 1;
                    let decoder = CellDecoder {
                        part: &self.part,
                        strings: &self.strings,
                        date_system: self.date_system,
                    };
                    let value = decoder.value(&raw, false, &mut self.warnings)?;
                    if !value.is_empty() {
                        row.cells.insert(col, value);
                    }
                }
                XmlEvent::Open { .. } => self.cursor.skip_element()?,
                XmlEvent::Close { .. } => return Ok(row),
                XmlEvent::Text(_) => {}
            }
        }
        Err(self.error("unterminated <row>".to_string()))
    }

    /// Collect one `<c>`; the formula text is skipped since only cached results are yielded.
    fn read_cell(&mut self, attrs: &[(String, String)]) -> Result<RawCell, XlsxError> {
        let mut raw = RawCell {
            reference: attr(attrs, "r").map(str::to_string),
            kind: attr(attrs, "t").map(str::to_string),
            ..RawCell::default()
        };
        while let Some(event) = self.cursor.advance()? {
            match event {
                XmlEvent::Open { .. } => match event.local_name() {
                    Some("v") => raw.value = Some(self.cursor.read_text()?),
                    Some("is") => raw.inline = Some(read_rich_text(&mut self.cursor)?),
                    _ => self.cursor.skip_element()?,
                },
                XmlEvent::Close { .. } => return Ok(raw),
                XmlEvent::Text(_) => {}
            }
        }
        Err(self.error("unterminated <c>".to_string()))
    }

    fn error(&self, reason: String) -> XlsxError {
        XlsxError::parse(&self.part, self.cursor.position(), reason)
    }
}

impl<R: Read> Iterator for StreamingReader<R> {
    type Item = Result<RowRecord, XlsxError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }
        match self.next_row() {
            Ok(Some(row)) => Some(Ok(row)),
            Ok(None) => {
                self.finished = true;
                None
            }
            Err(err) => {
                self.finished = true;
                Some(Err(err))
            }
        }
    }
}

fn attr<'a>(attrs: &'a [(String, String)], key: &str) -> Option<&'a str> {
    attrs
        .iter()
        .find(|(k, _)| k == key)
        .map(|(_, v)| v.as_str())
}
