use serde::{Deserialize, Serialize};
use zip::CompressionMethod;

/// Default maximum decompressed size for any single entry (and, unless overridden, for the total
/// inflated by one read): 100 MiB.
pub const DEFAULT_MAX_UNCOMPRESSED_SIZE: u64 = 100 * 1024 * 1024;

/// Reader configuration.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReadOptions {
    /// Per-entry decompressed size limit in bytes. `0` disables every size guard.
    pub max_uncompressed_size: u64,
    /// Cumulative decompressed size limit. `None` reuses `max_uncompressed_size`.
    pub max_total_uncompressed_size: Option<u64>,
}

impl Default for ReadOptions {
    fn default() -> Self {
        Self {
            max_uncompressed_size: DEFAULT_MAX_UNCOMPRESSED_SIZE,
            max_total_uncompressed_size: None,
        }
    }
}

impl ReadOptions {
    pub fn unlimited() -> Self {
        Self {
            max_uncompressed_size: 0,
            max_total_uncompressed_size: None,
        }
    }

    pub fn with_max_uncompressed_size(mut self, bytes: u64) -> Self {
        self.max_uncompressed_size = bytes;
        self
    }

    pub(crate) fn entry_limit(&self) -> u64 {
        match self.max_uncompressed_size {
            0 => u64::MAX,
            n => n,
        }
    }

    pub(crate) fn total_limit(&self) -> u64 {
        if self.max_uncompressed_size == 0 {
            return u64::MAX;
        }
        match self.max_total_uncompressed_size {
            Some(0) => u64::MAX,
            Some(n) => n,
            None => self.max_uncompressed_size,
        }
    }
}

/// Entry compression used when writing.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Compression {
    Stored,
    #[default]
    Deflated,
}

impl Compression {
    pub(crate) fn method(self) -> CompressionMethod {
        match self {
            Compression::Stored => CompressionMethod::Stored,
            Compression::Deflated => CompressionMethod::Deflated,
        }
    }
}

/// Writer configuration.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WriteOptions {
    pub compression: Compression,
    /// Indent regenerated XML parts. Verbatim-copied parts are never reformatted.
    pub pretty_print: bool,
    /// Copy unmodified parts from the source container when the document has one.
    pub surgical: bool,
    /// Skip `xl/sharedStrings.xml` when no cell references a shared string.
    pub omit_empty_shared_strings: bool,
}

impl Default for WriteOptions {
    fn default() -> Self {
        Self {
            compression: Compression::Deflated,
            pretty_print: false,
            surgical: true,
            omit_empty_shared_strings: true,
        }
    }
}
