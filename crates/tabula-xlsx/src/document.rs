use std::path::Path;

use tabula_model::{CellRef, CellValue, DefinedName, SheetError, Workbook, Worksheet};

use crate::container::ContainerSource;
use crate::error::XlsxError;
use crate::options::ReadOptions;
use crate::tracking::ModificationContext;

/// Where a document came from and what changed since it was read.
#[derive(Clone, Debug)]
pub struct SourceContext {
    pub(crate) source: ContainerSource,
    pub(crate) read_options: ReadOptions,
    pub(crate) tracking: ModificationContext,
    /// Source sheet index of each current sheet; `None` for sheets added after reading.
    pub(crate) sheet_origins: Vec<Option<usize>>,
}

impl SourceContext {
    pub(crate) fn new(source: ContainerSource, read_options: ReadOptions, sheets: usize) -> Self {
        Self {
            source,
            read_options,
            tracking: ModificationContext::clean(),
            sheet_origins: (0..sheets).map(Some).collect(),
        }
    }

    pub fn tracking(&self) -> &ModificationContext {
        &self.tracking
    }

    /// Path of the source container, when it was read from disk.
    pub fn path(&self) -> Option<&Path> {
        match &self.source {
            ContainerSource::Path(path) => Some(path),
            ContainerSource::Bytes(_) => None,
        }
    }

    pub fn sheet_origins(&self) -> &[Option<usize>] {
        &self.sheet_origins
    }
}

/// A workbook plus, when it was read from a container, the context a surgical write needs.
///
/// Edits made through the helpers here are recorded in the tracking context. Edits made through
/// [`XlsxDocument::workbook_mut`] cannot be attributed, so they mark every sheet modified.
#[derive(Clone, Debug)]
pub struct XlsxDocument {
    workbook: Workbook,
    source: Option<SourceContext>,
}

impl XlsxDocument {
    pub fn new(workbook: Workbook) -> Self {
        Self {
            workbook,
            source: None,
        }
    }

    pub(crate) fn with_source(workbook: Workbook, source: SourceContext) -> Self {
        Self {
            workbook,
            source: Some(source),
        }
    }

    pub fn workbook(&self) -> &Workbook {
        &self.workbook
    }

    pub fn into_workbook(self) -> Workbook {
        self.workbook
    }

    pub fn source(&self) -> Option<&SourceContext> {
        self.source.as_ref()
    }

    pub fn tracking(&self) -> Option<&ModificationContext> {
        self.source.as_ref().map(|s| &s.tracking)
    }

    /// Forget the source container; the next write regenerates every part.
    pub fn detach_source(&mut self) -> Option<SourceContext> {
        self.source.take()
    }

    fn track(&mut self, update: impl FnOnce(ModificationContext) -> ModificationContext) {
        if let Some(source) = &mut self.source {
            let tracking = std::mem::take(&mut source.tracking);
            source.tracking = update(tracking);
        }
    }

    /// Mutable access to one sheet; the sheet is marked modified.
    pub fn sheet_mut(&mut self, index: usize) -> Option<&mut Worksheet> {
        if index >= self.workbook.sheets.len() {
            return None;
        }
        self.track(|t| t.mark_sheet(index));
        self.workbook.sheet_mut(index)
    }

    pub fn set_value(
        &mut self,
        sheet: usize,
        cell: CellRef,
        value: impl Into<CellValue>,
    ) -> Result<(), XlsxError> {
        let sheet = self
            .sheet_mut(sheet)
            .ok_or_else(|| XlsxError::from(SheetError::IndexOutOfRange(sheet)))?;
        sheet.set_value(cell, value);
        Ok(())
    }

    pub fn add_sheet(&mut self, name: impl Into<String>) -> Result<usize, XlsxError> {
        let index = self.workbook.add_sheet(name)?;
        if let Some(source) = &mut self.source {
            source.sheet_origins.push(None);
        }
        self.track(|t| t.mark_sheet(index).mark_metadata());
        Ok(index)
    }

    pub fn delete_sheet(&mut self, index: usize) -> Result<Worksheet, XlsxError> {
        let removed = self.workbook.delete_sheet(index)?;
        if let Some(source) = &mut self.source {
            if index < source.sheet_origins.len() {
                source.sheet_origins.remove(index);
            }
        }
        self.track(|t| t.mark_deleted(index));
        Ok(removed)
    }

    pub fn move_sheet(&mut self, from: usize, to: usize) -> Result<(), XlsxError> {
        self.workbook.move_sheet(from, to)?;
        if let Some(source) = &mut self.source {
            if from < source.sheet_origins.len() && to < source.sheet_origins.len() {
                let origin = source.sheet_origins.remove(from);
                source.sheet_origins.insert(to, origin);
            }
        }
        self.track(|t| t.moved(from, to));
        Ok(())
    }

    pub fn rename_sheet(&mut self, index: usize, name: &str) -> Result<(), XlsxError> {
        self.workbook.rename_sheet(index, name)?;
        self.track(ModificationContext::mark_metadata);
        Ok(())
    }

    pub fn set_active_sheet(&mut self, index: usize) -> Result<(), XlsxError> {
        if index >= self.workbook.sheets.len() {
            return Err(SheetError::IndexOutOfRange(index).into());
        }
        self.workbook.active_sheet = index;
        self.track(ModificationContext::mark_metadata);
        Ok(())
    }

    pub fn defined_names_mut(&mut self) -> &mut Vec<DefinedName> {
        self.track(ModificationContext::mark_metadata);
        &mut self.workbook.defined_names
    }

    /// Unrestricted access to the workbook. Every sheet is marked modified.
    pub fn workbook_mut(&mut self) -> &mut Workbook {
        let sheets = self.workbook.sheets.len();
        self.track(|t| (0..sheets).fold(t.mark_metadata(), |t, i| t.mark_sheet(i)));
        &mut self.workbook
    }
}

impl From<Workbook> for XlsxDocument {
    fn from(workbook: Workbook) -> Self {
        Self::new(workbook)
    }
}
