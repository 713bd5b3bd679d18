//! ZIP container access.
//!
//! Every inflate goes through a size guard: the declared uncompressed size is checked first, then
//! reads are capped at `limit + 1` bytes so forged metadata cannot smuggle more data past the
//! limit. A per-container budget enforces the cumulative limit across entries.

use std::collections::HashSet;
use std::fs::File;
use std::io::{self, BufReader, Cursor, Read, Seek, SeekFrom, Take, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use flate2::read::DeflateDecoder;
use zip::result::ZipError;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, DateTime, ZipArchive, ZipWriter};

use crate::error::{SizeGuardTripped, SizeLimitScope, XlsxError};
use crate::options::{Compression, ReadOptions};

const LOCAL_FILE_HEADER_SIG: [u8; 4] = [0x50, 0x4B, 0x03, 0x04];

/// Metadata for one container entry.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EntryInfo {
    pub name: String,
    pub compression: CompressionMethod,
    pub compressed_size: u64,
    pub size: u64,
}

/// Running total of inflated bytes for one container pass.
#[derive(Debug, Clone)]
pub(crate) struct InflateBudget {
    limit: u64,
    used: u64,
}

impl InflateBudget {
    pub(crate) fn new(limit: u64) -> Self {
        Self { limit, used: 0 }
    }

    pub(crate) fn remaining(&self) -> u64 {
        self.limit.saturating_sub(self.used)
    }

    pub(crate) fn consume(&mut self, part: &str, bytes: u64) -> Result<(), XlsxError> {
        self.used = self.used.saturating_add(bytes);
        if self.used > self.limit {
            return Err(XlsxError::OversizedInput {
                part: part.to_string(),
                observed: self.used,
                limit: self.limit,
                scope: SizeLimitScope::Total,
            });
        }
        Ok(())
    }
}

/// A read-only handle on a ZIP container.
///
/// The handle owns the underlying reader; dropping it releases the file on every exit path.
pub struct Container<R: Read + Seek> {
    archive: ZipArchive<R>,
    entry_limit: u64,
    budget: InflateBudget,
}

impl Container<BufReader<File>> {
    pub fn open(path: impl AsRef<Path>, options: &ReadOptions) -> Result<Self, XlsxError> {
        let file = File::open(path.as_ref())?;
        Self::from_reader(BufReader::new(file), options)
    }
}

impl<R: Read + Seek> Container<R> {
    pub fn from_reader(reader: R, options: &ReadOptions) -> Result<Self, XlsxError> {
        let archive = ZipArchive::new(reader).map_err(|err| match err {
            ZipError::Io(err) => XlsxError::Io(err),
            other => XlsxError::malformed(format!("not a readable zip container: {other}")),
        })?;
        Ok(Self {
            archive,
            entry_limit: options.entry_limit(),
            budget: InflateBudget::new(options.total_limit()),
        })
    }

    /// Entry names in central-directory order.
    pub fn entry_names(&self) -> Vec<String> {
        self.archive.file_names().map(str::to_string).collect()
    }

    /// Entry metadata in central-directory order, without inflating anything.
    pub fn list(&mut self) -> Result<Vec<EntryInfo>, XlsxError> {
        let mut out = Vec::with_capacity(self.archive.len());
        for idx in 0..self.archive.len() {
            let file = self.archive.by_index_raw(idx)?;
            if file.is_dir() {
                continue;
            }
            out.push(EntryInfo {
                name: file.name().to_string(),
                compression: file.compression(),
                compressed_size: file.compressed_size(),
                size: file.size(),
            });
        }
        Ok(out)
    }

    /// Resolve `name` to an entry index.
    ///
    /// An exact match wins. Otherwise exactly one entry may match after normalization (case,
    /// separators, leading `/`, percent-encoding); several candidates make the container
    /// malformed.
    pub(crate) fn find(&self, name: &str) -> Result<Option<usize>, XlsxError> {
        let wanted = normalized_part_name(name);
        let mut equivalent = None;
        let mut ambiguous = false;
        for (idx, entry) in self.archive.file_names().enumerate() {
            if entry == name {
                return Ok(Some(idx));
            }
            if normalized_part_name(entry) == wanted {
                ambiguous |= equivalent.is_some();
                equivalent = Some(idx);
            }
        }
        if ambiguous {
            return Err(XlsxError::malformed(format!(
                "part {name} matches more than one container entry"
            )));
        }
        Ok(equivalent)
    }

    pub fn contains(&self, name: &str) -> Result<bool, XlsxError> {
        Ok(self.find(name)?.is_some())
    }

    /// Actual entry name that `name` resolves to.
    pub(crate) fn resolve_name(&self, name: &str) -> Result<Option<String>, XlsxError> {
        Ok(self
            .find(name)?
            .and_then(|idx| self.archive.name_for_index(idx))
            .map(str::to_string))
    }

    /// Inflate a required entry. A missing entry makes the document malformed.
    pub fn read_entry(&mut self, name: &str) -> Result<Vec<u8>, XlsxError> {
        self.read_entry_optional(name)?
            .ok_or_else(|| XlsxError::malformed(format!("missing required part {name}")))
    }

    /// Inflate an entry if it exists, enforcing the per-entry and cumulative size guards.
    pub fn read_entry_optional(&mut self, name: &str) -> Result<Option<Vec<u8>>, XlsxError> {
        let Some(idx) = self.find(name)? else {
            return Ok(None);
        };
        let entry_limit = self.entry_limit;
        let mut file = self.archive.by_index(idx)?;
        if file.is_dir() {
            return Ok(None);
        }
        let declared = file.size();
        let bytes = read_guarded(&mut file, declared, name, entry_limit, &mut self.budget)?;
        Ok(Some(bytes))
    }

    /// Turn the container into a streaming reader over one entry.
    ///
    /// The stream owns the underlying reader, inflates lazily and applies the same size guards as
    /// [`Container::read_entry`], so the entry is never materialized in full.
    pub fn into_entry_stream(mut self, name: &str) -> Result<EntryStream<R>, XlsxError> {
        let idx = self
            .find(name)?
            .ok_or_else(|| XlsxError::malformed(format!("missing required part {name}")))?;
        let (header_start, compressed_size, declared, method) = {
            let file = self.archive.by_index_raw(idx)?;
            (
                file.header_start(),
                file.compressed_size(),
                file.size(),
                file.compression(),
            )
        };

        let (limit, scope) = effective_limit(self.entry_limit, &self.budget);
        check_declared(name, declared, self.entry_limit, &self.budget)?;

        let mut reader = self.archive.into_inner();
        reader.seek(SeekFrom::Start(header_start))?;
        let mut header = [0u8; 30];
        reader.read_exact(&mut header)?;
        if header[..4] != LOCAL_FILE_HEADER_SIG {
            return Err(XlsxError::malformed(format!(
                "bad local file header for {name}"
            )));
        }
        let name_len = u16::from_le_bytes([header[26], header[27]]);
        let extra_len = u16::from_le_bytes([header[28], header[29]]);
        reader.seek(SeekFrom::Current(i64::from(name_len) + i64::from(extra_len)))?;

        let raw = reader.take(compressed_size);
        let decoder = match method {
            CompressionMethod::Stored => EntryDecoder::Stored(raw),
            CompressionMethod::Deflated => EntryDecoder::Deflated(DeflateDecoder::new(raw)),
            other => {
                return Err(XlsxError::malformed(format!(
                    "unsupported compression {other:?} for {name}"
                )))
            }
        };

        Ok(EntryStream {
            decoder,
            part: name.to_string(),
            limit,
            scope,
            base: self.budget.used,
            total_limit: self.budget.limit,
            observed: 0,
        })
    }

    pub(crate) fn archive_mut(&mut self) -> &mut ZipArchive<R> {
        &mut self.archive
    }
}

fn effective_limit(entry_limit: u64, budget: &InflateBudget) -> (u64, SizeLimitScope) {
    let remaining = budget.remaining();
    if remaining < entry_limit {
        (remaining, SizeLimitScope::Total)
    } else {
        (entry_limit, SizeLimitScope::Entry)
    }
}

fn check_declared(
    part: &str,
    declared: u64,
    entry_limit: u64,
    budget: &InflateBudget,
) -> Result<(), XlsxError> {
    if declared > entry_limit {
        return Err(XlsxError::OversizedInput {
            part: part.to_string(),
            observed: declared,
            limit: entry_limit,
            scope: SizeLimitScope::Entry,
        });
    }
    if declared > budget.remaining() {
        return Err(XlsxError::OversizedInput {
            part: part.to_string(),
            observed: budget.used.saturating_add(declared),
            limit: budget.limit,
            scope: SizeLimitScope::Total,
        });
    }
    Ok(())
}

fn read_guarded(
    file: &mut impl Read,
    declared: u64,
    part: &str,
    entry_limit: u64,
    budget: &mut InflateBudget,
) -> Result<Vec<u8>, XlsxError> {
    check_declared(part, declared, entry_limit, budget)?;
    let (limit, scope) = effective_limit(entry_limit, budget);

    // Capacity comes from the (already bounded) declared size, capped so a forged header cannot
    // force a large allocation up front.
    let mut buf = Vec::with_capacity(declared.min(1 << 20) as usize);
    file.take(limit.saturating_add(1)).read_to_end(&mut buf)?;

    let observed = buf.len() as u64;
    if observed > limit {
        return Err(match scope {
            SizeLimitScope::Entry => XlsxError::OversizedInput {
                part: part.to_string(),
                observed,
                limit,
                scope,
            },
            SizeLimitScope::Total => XlsxError::OversizedInput {
                part: part.to_string(),
                observed: budget.used.saturating_add(observed),
                limit: budget.limit,
                scope,
            },
        });
    }
    budget.consume(part, observed)?;
    Ok(buf)
}

enum EntryDecoder<R: Read> {
    Stored(Take<R>),
    Deflated(DeflateDecoder<Take<R>>),
}

/// Lazily inflated, size-guarded stream over a single entry.
pub struct EntryStream<R: Read> {
    decoder: EntryDecoder<R>,
    part: String,
    limit: u64,
    scope: SizeLimitScope,
    base: u64,
    total_limit: u64,
    observed: u64,
}

impl<R: Read> EntryStream<R> {
    pub fn part(&self) -> &str {
        &self.part
    }
}

impl<R: Read> Read for EntryStream<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = match &mut self.decoder {
            EntryDecoder::Stored(inner) => inner.read(buf)?,
            EntryDecoder::Deflated(inner) => inner.read(buf)?,
        };
        self.observed = self.observed.saturating_add(n as u64);
        if self.observed > self.limit {
            let (observed, limit) = match self.scope {
                SizeLimitScope::Entry => (self.observed, self.limit),
                SizeLimitScope::Total => {
                    (self.base.saturating_add(self.observed), self.total_limit)
                }
            };
            return Err(SizeGuardTripped {
                part: self.part.clone(),
                observed,
                limit,
                scope: self.scope,
            }
            .into_io());
        }
        Ok(n)
    }
}

/// Where a document was read from, kept so a surgical write can reopen it.
#[derive(Clone, Debug)]
pub enum ContainerSource {
    Path(PathBuf),
    Bytes(Arc<[u8]>),
}

/// Reader over either kind of [`ContainerSource`].
pub enum SourceReader {
    File(BufReader<File>),
    Bytes(Cursor<Arc<[u8]>>),
}

impl ContainerSource {
    pub(crate) fn open(&self, options: &ReadOptions) -> Result<Container<SourceReader>, XlsxError> {
        let reader = match self {
            ContainerSource::Path(path) => SourceReader::File(BufReader::new(File::open(path)?)),
            ContainerSource::Bytes(bytes) => SourceReader::Bytes(Cursor::new(bytes.clone())),
        };
        Container::from_reader(reader, options)
    }
}

impl Read for SourceReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            SourceReader::File(r) => r.read(buf),
            SourceReader::Bytes(r) => r.read(buf),
        }
    }
}

impl Seek for SourceReader {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        match self {
            SourceReader::File(r) => r.seek(pos),
            SourceReader::Bytes(r) => r.seek(pos),
        }
    }
}

/// Write side of a container pass.
///
/// Entries get a fixed timestamp and permissions so identical content produces identical
/// archives.
pub struct ContainerWriter<W: Write + Seek> {
    zip: ZipWriter<W>,
    compression: Compression,
    written: HashSet<String>,
}

impl<W: Write + Seek> ContainerWriter<W> {
    pub fn new(writer: W, compression: Compression) -> Self {
        Self {
            zip: ZipWriter::new(writer),
            compression,
            written: HashSet::new(),
        }
    }

    fn file_options(&self) -> SimpleFileOptions {
        SimpleFileOptions::default()
            .compression_method(self.compression.method())
            .last_modified_time(DateTime::default())
            .unix_permissions(0o644)
    }

    fn claim(&mut self, name: &str) -> Result<(), XlsxError> {
        if !self.written.insert(normalized_part_name(name)) {
            return Err(XlsxError::InvalidWorkbook(format!(
                "part {name} written twice"
            )));
        }
        Ok(())
    }

    pub fn write_entry(&mut self, name: &str, bytes: &[u8]) -> Result<(), XlsxError> {
        self.start_entry(name)?.write_all(bytes)?;
        Ok(())
    }

    /// Open a new entry and return a sink for its bytes. The entry stays open until the next
    /// entry is started or the container is finished.
    pub fn start_entry(&mut self, name: &str) -> Result<&mut impl Write, XlsxError> {
        self.claim(name)?;
        let options = self.file_options();
        self.zip.start_file(name, options)?;
        Ok(&mut self.zip)
    }

    /// Sink of the entry opened by the last [`ContainerWriter::start_entry`].
    pub(crate) fn entry_sink(&mut self) -> &mut impl Write {
        &mut self.zip
    }

    /// Copy an entry's compressed bytes from `source` without inflating them.
    pub fn copy_entry_verbatim<R: Read + Seek>(
        &mut self,
        source: &mut Container<R>,
        name: &str,
    ) -> Result<(), XlsxError> {
        let idx = source
            .find(name)?
            .ok_or_else(|| XlsxError::malformed(format!("missing part {name}")))?;
        let actual = source
            .archive_mut()
            .name_for_index(idx)
            .unwrap_or(name)
            .to_string();
        self.claim(&actual)?;
        let file = source.archive_mut().by_index_raw(idx)?;
        self.zip.raw_copy_file(file)?;
        Ok(())
    }

    pub fn finish(self) -> Result<W, XlsxError> {
        Ok(self.zip.finish()?)
    }
}

/// Canonical form of a part name for lenient lookups: percent-decoded, `\` normalized to `/`,
/// leading separators stripped, ASCII-lowercased.
pub(crate) fn normalized_part_name(name: &str) -> String {
    fn hex(b: u8) -> Option<u8> {
        match b {
            b'0'..=b'9' => Some(b - b'0'),
            b'a'..=b'f' => Some(b - b'a' + 10),
            b'A'..=b'F' => Some(b - b'A' + 10),
            _ => None,
        }
    }

    let bytes = name.as_bytes();
    let mut decoded = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        let b = bytes[i];
        if b == b'%' && i + 2 < bytes.len() {
            if let (Some(hi), Some(lo)) = (hex(bytes[i + 1]), hex(bytes[i + 2])) {
                decoded.push((hi << 4) | lo);
                i += 3;
                continue;
            }
        }
        decoded.push(b);
        i += 1;
    }

    let start = decoded
        .iter()
        .position(|b| !matches!(b, b'/' | b'\\'))
        .unwrap_or(decoded.len());
    let normalized: Vec<u8> = decoded[start..]
        .iter()
        .map(|&b| if b == b'\\' { b'/' } else { b.to_ascii_lowercase() })
        .collect();
    String::from_utf8_lossy(&normalized).into_owned()
}
