use std::fmt;
use std::fs::File;
use std::io::{BufWriter, Seek, Write};
use std::path::{Path, PathBuf};

use log::{debug, trace};
use tabula_model::{CellRef, Workbook, MAX_COL, MAX_ROW};
use tempfile::{NamedTempFile, TempPath};

use super::RowRecord;
use crate::cells::CellTarget;
use crate::container::ContainerWriter;
use crate::content_types::{
    ContentTypes, CONTENT_TYPES_PART, CT_STYLES, CT_WORKBOOK, CT_WORKSHEET,
};
use crate::error::XlsxError;
use crate::events::XmlEmitter;
use crate::options::WriteOptions;
use crate::relationships::{self, rels_part_for, relative_target, Relationships};
use crate::shared_strings::rich_text_element;
use crate::styles::StyleRegistry;
use crate::write::{
    package_rels, staging_dir, workbook_manifest, PACKAGE_RELS_PART, STYLES_PART, WORKBOOK_PART,
};
use crate::xml::{NS_MAIN, NS_REL};

const SHEET_PART: &str = "xl/worksheets/sheet1.xml";

/// Lifecycle of a [`StreamingWriter`].
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum WriterState {
    Unopened,
    /// Package parts are written and the sheet entry is open; no row yet.
    HeaderWritten,
    Streaming,
    Finalized,
}

impl WriterState {
    fn label(self) -> &'static str {
        match self {
            WriterState::Unopened => "unopened",
            WriterState::HeaderWritten => "header-written",
            WriterState::Streaming => "streaming",
            WriterState::Finalized => "finalized",
        }
    }
}

impl fmt::Display for WriterState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Single-sheet writer that emits each row as soon as it is accepted.
///
/// Strings are written inline, every cell uses the default style, and no merges or sizing are
/// emitted; nothing is retained between rows. Rows must arrive in strictly increasing order.
pub struct StreamingWriter<W: Write + Seek> {
    out: Option<ContainerWriter<W>>,
    sheet_name: String,
    pretty: bool,
    state: WriterState,
    last_row: u32,
    persist_to: Option<(TempPath, PathBuf)>,
}

impl StreamingWriter<BufWriter<File>> {
    /// Stream into `path`. Rows go to a temporary file beside it, which replaces `path` only
    /// when [`StreamingWriter::finalize`] succeeds.
    pub fn create(
        path: impl AsRef<Path>,
        sheet_name: impl Into<String>,
        options: &WriteOptions,
    ) -> Result<Self, XlsxError> {
        let path = path.as_ref();
        let (file, tmp) = NamedTempFile::new_in(staging_dir(path))?.into_parts();
        let mut writer = Self::new(BufWriter::new(file), sheet_name, options);
        writer.persist_to = Some((tmp, path.to_path_buf()));
        writer.begin()?;
        Ok(writer)
    }
}

impl<W: Write + Seek> StreamingWriter<W> {
    /// An unopened writer; nothing is written until [`StreamingWriter::begin`].
    pub fn new(writer: W, sheet_name: impl Into<String>, options: &WriteOptions) -> Self {
        Self {
            out: Some(ContainerWriter::new(writer, options.compression)),
            sheet_name: sheet_name.into(),
            pretty: options.pretty_print,
            state: WriterState::Unopened,
            last_row: 0,
            persist_to: None,
        }
    }

    /// [`StreamingWriter::new`] followed by [`StreamingWriter::begin`].
    pub fn open(
        writer: W,
        sheet_name: impl Into<String>,
        options: &WriteOptions,
    ) -> Result<Self, XlsxError> {
        let mut out = Self::new(writer, sheet_name, options);
        out.begin()?;
        Ok(out)
    }

    pub fn state(&self) -> WriterState {
        self.state
    }

    pub fn sheet_name(&self) -> &str {
        &self.sheet_name
    }

    /// Write every data-independent part and open the sheet entry.
    pub fn begin(&mut self) -> Result<(), XlsxError> {
        if self.state != WriterState::Unopened {
            return Err(self.misuse("begin"));
        }
        let mut workbook = Workbook::new();
        workbook.add_sheet(self.sheet_name.as_str())?;

        let mut content_types = ContentTypes::new_package();
        content_types.set_override(WORKBOOK_PART, CT_WORKBOOK);
        content_types.set_override(SHEET_PART, CT_WORKSHEET);
        content_types.set_override(STYLES_PART, CT_STYLES);
        let mut workbook_rels = Relationships::new();
        let sheet_rel = workbook_rels.add(
            relationships::WORKSHEET,
            relative_target(WORKBOOK_PART, SHEET_PART),
            false,
        );
        workbook_rels.add(
            relationships::STYLES,
            relative_target(WORKBOOK_PART, STYLES_PART),
            false,
        );
        let manifest = workbook_manifest(&workbook, &[sheet_rel]);

        let pretty = self.pretty;
        let out = self.sink()?;
        out.write_entry(CONTENT_TYPES_PART, &content_types.to_xml().to_xml_bytes(pretty)?)?;
        out.write_entry(PACKAGE_RELS_PART, &package_rels().to_xml().to_xml_bytes(pretty)?)?;
        out.write_entry(WORKBOOK_PART, &manifest.to_xml_bytes(pretty)?)?;
        out.write_entry(
            &rels_part_for(WORKBOOK_PART),
            &workbook_rels.to_xml().to_xml_bytes(pretty)?,
        )?;
        out.write_entry(STYLES_PART, &StyleRegistry::new().to_xml_bytes(pretty)?)?;

        let mut emitter = XmlEmitter::new(out.start_entry(SHEET_PART)?);
        emitter.declaration()?;
        emitter.open("worksheet", &[("xmlns", NS_MAIN), ("xmlns:r", NS_REL)])?;
        emitter.open("sheetData", &[])?;

        self.state = WriterState::HeaderWritten;
        debug!("streaming sheet {:?} into {SHEET_PART}", self.sheet_name);
        Ok(())
    }

    /// Append one row. Empty cells are skipped; a row with no values still advances the order.
    pub fn write_row(&mut self, row: &RowRecord) -> Result<(), XlsxError> {
        if !matches!(
            self.state,
            WriterState::HeaderWritten | WriterState::Streaming
        ) {
            return Err(self.misuse("write a row"));
        }
        if row.index == 0 || row.index <= self.last_row {
            return Err(XlsxError::RowOutOfOrder {
                previous: self.last_row,
                row: row.index,
            });
        }
        if row.index - 1 > MAX_ROW {
            return Err(XlsxError::InvalidWorkbook(format!(
                "row {} is beyond the last worksheet row",
                row.index
            )));
        }
        if let Some((&col, _)) = row.cells.last_key_value().filter(|(col, _)| **col > MAX_COL) {
            return Err(XlsxError::InvalidWorkbook(format!(
                "column {col} is beyond the last worksheet column"
            )));
        }

        let out = self.sink()?;
        let mut emitter = XmlEmitter::new(out.entry_sink());
        let r = row.index.to_string();
        emitter.open("row", &[("r", r.as_str())])?;
        for (&col, value) in &row.cells {
            if value.is_empty() {
                continue;
            }
            let encoded = CellTarget::Stream.encode(value);
            let at = CellRef::new(row.index - 1, col).to_a1();
            let mut attrs = vec![("r", at.as_str())];
            if let Some(kind) = encoded.kind {
                attrs.push(("t", kind));
            }
            emitter.open("c", &attrs)?;
            if let Some(formula) = &encoded.formula {
                emitter.text_element("f", &[], formula)?;
            }
            if let Some(value) = &encoded.value {
                emitter.text_element("v", &[], value)?;
            }
            if let Some(inline) = &encoded.inline {
                emitter.element(&rich_text_element("is", inline))?;
            }
            emitter.close("c")?;
        }
        emitter.close("row")?;

        trace!("row {} with {} cells", row.index, row.cells.len());
        self.last_row = row.index;
        self.state = WriterState::Streaming;
        Ok(())
    }

    /// Close the sheet entry and the archive, returning the underlying sink. An unopened writer
    /// is opened first, producing a valid workbook with one empty sheet.
    pub fn finalize(&mut self) -> Result<W, XlsxError> {
        match self.state {
            WriterState::Finalized => return Err(XlsxError::AlreadyFinalized),
            WriterState::Unopened => self.begin()?,
            WriterState::HeaderWritten | WriterState::Streaming => {}
        }
        self.state = WriterState::Finalized;
        let mut out = self.out.take().ok_or(XlsxError::AlreadyFinalized)?;
        {
            let mut emitter = XmlEmitter::new(out.entry_sink());
            emitter.close("sheetData")?;
            emitter.close("worksheet")?;
        }
        let mut writer = out.finish()?;
        writer.flush()?;
        if let Some((tmp, target)) = self.persist_to.take() {
            tmp.persist(&target).map_err(|err| XlsxError::Io(err.error))?;
            debug!("streamed {} rows into {}", self.last_row, target.display());
        }
        Ok(writer)
    }

    fn sink(&mut self) -> Result<&mut ContainerWriter<W>, XlsxError> {
        self.out.as_mut().ok_or(XlsxError::AlreadyFinalized)
    }

    fn misuse(&self, operation: &'static str) -> XlsxError {
        XlsxError::InvalidWriterState {
            state: self.state.label(),
            operation,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;

    fn writer() -> StreamingWriter<Cursor<Vec<u8>>> {
        StreamingWriter::new(Cursor::new(Vec::new()), "Rows", &WriteOptions::default())
    }

    #[test]
    fn rows_need_an_open_writer() {
        let mut w = writer();
        let err = w.write_row(&RowRecord::new(1).with_cell(0, 1.0)).unwrap_err();
        assert!(
            matches!(
                err,
                XlsxError::InvalidWriterState {
                    state: "unopened",
                    ..
                }
            ),
            "{err:?}"
        );

        w.begin().unwrap();
        assert_eq!(w.state(), WriterState::HeaderWritten);
        w.write_row(&RowRecord::new(1).with_cell(0, 1.0)).unwrap();
        assert_eq!(w.state(), WriterState::Streaming);
        w.finalize().unwrap();

        let err = w.write_row(&RowRecord::new(2)).unwrap_err();
        assert!(matches!(
            err,
            XlsxError::InvalidWriterState {
                state: "finalized",
                ..
            }
        ));
        assert!(matches!(w.finalize(), Err(XlsxError::AlreadyFinalized)));
    }

    #[test]
    fn rows_must_increase() {
        let mut w = writer();
        w.begin().unwrap();
        assert!(matches!(
            w.write_row(&RowRecord::new(0)),
            Err(XlsxError::RowOutOfOrder { previous: 0, row: 0 })
        ));
        w.write_row(&RowRecord::new(4)).unwrap();
        assert!(matches!(
            w.write_row(&RowRecord::new(4)),
            Err(XlsxError::RowOutOfOrder { previous: 4, row: 4 })
        ));
        w.write_row(&RowRecord::new(5)).unwrap();
    }

    #[test]
    fn out_of_bounds_cells_are_rejected() {
        let mut w = writer();
        w.begin().unwrap();
        assert!(matches!(
            w.write_row(&RowRecord::new(1).with_cell(MAX_COL + 1, 1.0)),
            Err(XlsxError::InvalidWorkbook(_))
        ));
        assert!(matches!(
            w.write_row(&RowRecord::new(MAX_ROW + 2)),
            Err(XlsxError::InvalidWorkbook(_))
        ));
    }

    #[test]
    fn blank_sheet_name_fails_begin() {
        let mut w = StreamingWriter::new(Cursor::new(Vec::new()), "  ", &WriteOptions::default());
        assert!(matches!(w.begin(), Err(XlsxError::InvalidWorkbook(_))));
        assert_eq!(w.state(), WriterState::Unopened);
    }

    #[test]
    fn finalizing_an_unopened_writer_yields_an_empty_sheet() {
        let bytes = writer().finalize().unwrap().into_inner();
        let (workbook, warnings) =
            crate::read::read_workbook(Cursor::new(bytes), &Default::default()).unwrap();
        assert!(warnings.is_empty());
        assert_eq!(workbook.sheets.len(), 1);
        assert_eq!(workbook.sheets[0].name, "Rows");
        assert!(workbook.sheets[0].used_range().is_none());
    }

    #[test]
    fn create_replaces_the_destination_only_on_finalize() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stream.xlsx");
        std::fs::write(&path, b"previous").unwrap();

        let mut w = StreamingWriter::create(&path, "Log", &WriteOptions::default()).unwrap();
        w.write_row(&RowRecord::new(1).with_cell(0, "entry")).unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), b"previous");
        w.finalize().unwrap();

        let (workbook, _) = crate::read::read_workbook(
            std::fs::File::open(&path).unwrap(),
            &Default::default(),
        )
        .unwrap();
        assert_eq!(workbook.sheets[0].name, "Log");
    }

    #[test]
    fn dropped_writer_leaves_destination_alone() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("never.xlsx");
        {
            let mut w = StreamingWriter::create(&path, "Log", &WriteOptions::default()).unwrap();
            w.write_row(&RowRecord::new(1).with_cell(0, 1.0)).unwrap();
        }
        assert!(!path.exists());
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }
}
