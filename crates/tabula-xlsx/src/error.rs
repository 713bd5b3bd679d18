use std::fmt;
use std::io;

/// Which size guard an [`XlsxError::OversizedInput`] tripped.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum SizeLimitScope {
    /// A single entry exceeded the per-entry limit.
    Entry,
    /// The running total of inflated bytes exceeded the cumulative limit.
    Total,
}

impl fmt::Display for SizeLimitScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SizeLimitScope::Entry => f.write_str("entry"),
            SizeLimitScope::Total => f.write_str("cumulative"),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum XlsxError {
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("zip error: {0}")]
    Zip(#[from] zip::result::ZipError),
    #[error("malformed document: {0}")]
    MalformedDocument(String),
    #[error("failed to parse {part} at byte {position}: {reason}")]
    Parse {
        part: String,
        position: u64,
        reason: String,
    },
    #[error("{scope} size limit exceeded by {part}: {observed} bytes (max {limit})")]
    OversizedInput {
        part: String,
        observed: u64,
        limit: u64,
        scope: SizeLimitScope,
    },
    #[error("cannot {operation} while the writer is {state}")]
    InvalidWriterState {
        state: &'static str,
        operation: &'static str,
    },
    #[error("writer was already finalized")]
    AlreadyFinalized,
    #[error("row {row} does not follow row {previous}")]
    RowOutOfOrder { previous: u32, row: u32 },
    #[error("sheet not found: {0}")]
    SheetNotFound(String),
    #[error("invalid workbook: {0}")]
    InvalidWorkbook(String),
}

impl XlsxError {
    pub(crate) fn malformed(msg: impl Into<String>) -> Self {
        XlsxError::MalformedDocument(msg.into())
    }

    pub(crate) fn parse(part: &str, position: u64, reason: impl Into<String>) -> Self {
        XlsxError::Parse {
            part: part.to_string(),
            position,
            reason: reason.into(),
        }
    }

    /// Attach part/position context to an XML-layer error.
    ///
    /// Size-guard trips raised from inside a guarded entry stream travel through `quick_xml`
    /// as I/O errors; they are unwrapped back into [`XlsxError::OversizedInput`] here.
    pub(crate) fn from_xml(part: &str, position: u64, err: quick_xml::Error) -> Self {
        if let quick_xml::Error::Io(io_err) = &err {
            if let Some(tripped) = SizeGuardTripped::find(io_err) {
                return tripped.to_error();
            }
            return XlsxError::Io(io::Error::new(io_err.kind(), io_err.to_string()));
        }
        XlsxError::parse(part, position, err.to_string())
    }

}

impl From<tabula_model::SheetError> for XlsxError {
    fn from(err: tabula_model::SheetError) -> Self {
        XlsxError::InvalidWorkbook(err.to_string())
    }
}

/// Payload carried inside an `io::Error` when a guarded entry stream exceeds its limit.
#[derive(Debug, Clone)]
pub(crate) struct SizeGuardTripped {
    pub(crate) part: String,
    pub(crate) observed: u64,
    pub(crate) limit: u64,
    pub(crate) scope: SizeLimitScope,
}

impl SizeGuardTripped {
    pub(crate) fn into_io(self) -> io::Error {
        io::Error::new(io::ErrorKind::Other, self)
    }

    fn find(err: &io::Error) -> Option<&SizeGuardTripped> {
        err.get_ref()
            .and_then(|inner| inner.downcast_ref::<SizeGuardTripped>())
    }

    fn to_error(&self) -> XlsxError {
        XlsxError::OversizedInput {
            part: self.part.clone(),
            observed: self.observed,
            limit: self.limit,
            scope: self.scope,
        }
    }
}

impl fmt::Display for SizeGuardTripped {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} size limit exceeded by {}: {} bytes (max {})",
            self.scope, self.part, self.observed, self.limit
        )
    }
}

impl std::error::Error for SizeGuardTripped {}

/// A recognized feature the whole-document model does not represent.
///
/// Warnings never fail a read; the feature is skipped (and kept verbatim by surgical writes).
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ReadWarning {
    UnsupportedFeature { part: String, feature: String },
}

impl ReadWarning {
    pub(crate) fn unsupported(part: &str, feature: impl Into<String>) -> Self {
        ReadWarning::UnsupportedFeature {
            part: part.to_string(),
            feature: feature.into(),
        }
    }
}

impl fmt::Display for ReadWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReadWarning::UnsupportedFeature { part, feature } => {
                write!(f, "unsupported feature in {part}: {feature}")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    #[test]
    fn size_guard_survives_io_wrapping() {
        let io_err = SizeGuardTripped {
            part: "xl/worksheets/sheet1.xml".to_string(),
            observed: 11,
            limit: 10,
            scope: SizeLimitScope::Entry,
        }
        .into_io();

        let xml_err = quick_xml::Error::Io(Arc::new(io_err));
        match XlsxError::from_xml("xl/worksheets/sheet1.xml", 40, xml_err) {
            XlsxError::OversizedInput {
                part,
                observed,
                limit,
                scope,
            } => {
                assert_eq!(part, "xl/worksheets/sheet1.xml");
                assert_eq!((observed, limit), (11, 10));
                assert_eq!(scope, SizeLimitScope::Entry);
            }
            other => panic!("expected OversizedInput, got {other:?}"),
        }
    }

    #[test]
    fn plain_io_errors_stay_io() {
        let xml_err =
            quick_xml::Error::Io(Arc::new(io::Error::new(io::ErrorKind::UnexpectedEof, "eof")));
        let err = XlsxError::from_xml("xl/worksheets/sheet1.xml", 0, xml_err);
        assert!(
            matches!(&err, XlsxError::Io(inner) if inner.kind() == io::ErrorKind::UnexpectedEof),
            "{err:?}"
        );
    }
}
