//! Streaming codec: one worksheet, one row at a time.
//!
//! Neither side builds a tree or keeps rows it has already handed over, so memory stays flat in
//! the number of rows. The reader's one up-front cost is the shared string table. The writer
//! trades fidelity for the same bound: inline strings, a single default style, and no merges or
//! sizing.

use std::collections::BTreeMap;

use tabula_model::CellValue;

mod reader;
mod writer;

pub use reader::{SheetSelector, StreamingReader};
pub use writer::{StreamingWriter, WriterState};

/// One row of a streamed sheet: its 1-based index and its cells by 0-based column.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RowRecord {
    pub index: u32,
    pub cells: BTreeMap<u32, CellValue>,
}

impl RowRecord {
    pub fn new(index: u32) -> Self {
        Self {
            index,
            cells: BTreeMap::new(),
        }
    }

    pub fn with_cell(mut self, col: u32, value: impl Into<CellValue>) -> Self {
        self.cells.insert(col, value.into());
        self
    }

    pub fn get(&self, col: u32) -> Option<&CellValue> {
        self.cells.get(&col)
    }

    pub fn is_empty(&self) -> bool {
        self.cells.values().all(CellValue::is_empty)
    }
}
