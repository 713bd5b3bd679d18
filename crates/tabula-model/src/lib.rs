//! `tabula-model` defines the in-memory spreadsheet data structures consumed by the package
//! codecs: workbooks, worksheets, cells, typed values and styles.
//!
//! Everything here is plain data with `serde` support; file formats live in sibling crates.

mod address;
mod cell;
pub mod rich_text;
mod style;
mod value;
mod workbook;
mod worksheet;

pub use address::{column_index, column_name, A1ParseError, CellRef, Range, MAX_COL, MAX_ROW};
pub use cell::{Cell, Comment, Hyperlink};
pub use rich_text::{RichTextRun, RichTextRunStyle};
pub use style::{
    parse_argb_hex, Alignment, Border, BorderEdge, BorderStyle, Color, Fill, FillPattern, Font,
    HorizontalAlignment, Style, StyleTable, VerticalAlignment,
};
pub use value::{CellValue, ErrorValue, Formula, RichText, UnknownErrorValue};
pub use workbook::{moved_index, DateSystem, DefinedName, SheetError, Workbook};
pub use worksheet::{SheetVisibility, Worksheet};
