//! XLSX package codec for [`tabula_model::Workbook`].
//!
//! The crate exposes three ways through a package:
//!
//! - [`read`]/[`write`]: whole-document codec. Every part is parsed into the model and every
//!   part is regenerated on write, with shared strings and styles deduplicated.
//! - [`XlsxDocument`] + [`write`] with [`WriteOptions::surgical`]: a document read from disk
//!   remembers its source container and a [`ModificationContext`]; writing it copies untouched
//!   ZIP entries byte-for-byte and regenerates only the sheets and workbook-level parts that
//!   changed.
//! - [`streaming`]: single-sheet, row-at-a-time reader and writer whose memory use does not
//!   grow with the number of rows.
//!
//! All reads go through [`Container`], which enforces per-entry and cumulative limits on
//! inflated size ([`ReadOptions`]). Recognized features the model does not carry are reported
//! as [`ReadWarning`]s rather than failing the read.

mod cells;
pub mod container;
mod content_types;
pub mod dates;
mod document;
mod error;
pub mod events;
mod options;
pub mod parts;
mod read;
mod relationships;
pub mod shared_strings;
pub mod streaming;
pub mod styles;
mod surgical;
mod tracking;
mod write;
mod xml;

pub use container::{Container, ContainerWriter, EntryInfo};
pub use document::{SourceContext, XlsxDocument};
pub use error::{ReadWarning, SizeLimitScope, XlsxError};
pub use options::{Compression, ReadOptions, WriteOptions, DEFAULT_MAX_UNCOMPRESSED_SIZE};
pub use parts::{PartRegistry, PartRole, SheetEntry};
pub use read::{read, read_from_bytes, read_workbook};
pub use relationships::{Relationship, Relationships};
pub use shared_strings::SharedStrings;
pub use streaming::{RowRecord, SheetSelector, StreamingReader, StreamingWriter, WriterState};
pub use styles::StyleRegistry;
pub use tracking::ModificationContext;
pub use write::{write, write_document, write_to_vec, write_workbook};
pub use xml::{XmlElement, XmlNode};
