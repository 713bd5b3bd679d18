use std::io::{Cursor, Write};

use tabula_model::{CellRef, Workbook};
use tabula_xlsx::{
    read_from_bytes, write_to_vec, Container, ReadOptions, SizeLimitScope, StreamingReader,
    WriteOptions, XlsxDocument, XlsxError,
};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

const LOCAL_HEADER: &[u8] = b"PK\x03\x04";
const CENTRAL_HEADER: &[u8] = b"PK\x01\x02";

/// Overwrite the uncompressed size recorded for `name` in both its local and central headers.
fn forge_declared_size(bytes: &mut [u8], name: &str, size: u32) {
    let mut patched = 0;
    let mut pos = 0;
    while pos + 46 <= bytes.len() {
        let sig = &bytes[pos..pos + 4];
        let (name_len_at, name_at, size_at) = if sig == LOCAL_HEADER {
            (26, 30, 22)
        } else if sig == CENTRAL_HEADER {
            (28, 46, 24)
        } else {
            pos += 1;
            continue;
        };
        let len = u16::from_le_bytes([bytes[pos + name_len_at], bytes[pos + name_len_at + 1]])
            as usize;
        let start = pos + name_at;
        if start + len <= bytes.len() && &bytes[start..start + len] == name.as_bytes() {
            bytes[pos + size_at..pos + size_at + 4].copy_from_slice(&size.to_le_bytes());
            patched += 1;
        }
        pos += 4;
    }
    assert_eq!(patched, 2, "expected one local and one central header for {name}");
}

/// A valid single-sheet package whose worksheet is `sheet_xml`.
fn package_with_sheet(sheet_xml: &[u8]) -> Vec<u8> {
    let mut workbook = Workbook::new();
    workbook.add_sheet("Data").unwrap();
    let plain = write_to_vec(&XlsxDocument::new(workbook), &WriteOptions::default()).unwrap();

    let mut source = ZipArchive::new(Cursor::new(plain)).unwrap();
    let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
    for idx in 0..source.len() {
        let file = source.by_index_raw(idx).unwrap();
        if file.name() == "xl/worksheets/sheet1.xml" {
            continue;
        }
        zip.raw_copy_file(file).unwrap();
    }
    zip.start_file("xl/worksheets/sheet1.xml", options).unwrap();
    zip.write_all(sheet_xml).unwrap();
    zip.finish().unwrap().into_inner()
}

fn padded_sheet(padding: usize) -> Vec<u8> {
    let mut xml = br#"<worksheet xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main"><sheetData><row r="1"><c r="A1"><v>1</v></c></row>"#.to_vec();
    xml.extend(std::iter::repeat(b' ').take(padding));
    xml.extend_from_slice(b"</sheetData></worksheet>");
    xml
}

#[test]
fn forged_huge_declared_size_is_rejected_before_inflating() {
    let mut bytes = package_with_sheet(&padded_sheet(0));
    forge_declared_size(&mut bytes, "xl/worksheets/sheet1.xml", 0xF000_0000);

    let err = read_from_bytes(bytes, &ReadOptions::default()).unwrap_err();
    match err {
        XlsxError::OversizedInput {
            part,
            observed,
            limit,
            scope,
        } => {
            assert_eq!(part, "xl/worksheets/sheet1.xml");
            assert_eq!(observed, 0xF000_0000);
            assert_eq!(limit, 100 * 1024 * 1024);
            assert_eq!(scope, SizeLimitScope::Entry);
        }
        other => panic!("expected OversizedInput, got {other:?}"),
    }
}

#[test]
fn understated_size_trips_the_streaming_guard() {
    // Compresses to almost nothing but inflates past the limit.
    let mut bytes = package_with_sheet(&padded_sheet(4 * 1024 * 1024));
    forge_declared_size(&mut bytes, "xl/worksheets/sheet1.xml", 128);

    let options = ReadOptions {
        max_total_uncompressed_size: Some(64 * 1024 * 1024),
        ..ReadOptions::default().with_max_uncompressed_size(1024 * 1024)
    };
    let reader = StreamingReader::from_reader(Cursor::new(bytes), 0usize, &options).unwrap();
    let err = reader
        .collect::<Result<Vec<_>, _>>()
        .expect_err("the guard must stop inflation");
    assert!(
        matches!(
            err,
            XlsxError::OversizedInput {
                scope: SizeLimitScope::Entry,
                limit: 1_048_576,
                ..
            }
        ),
        "{err:?}"
    );
}

#[test]
fn cumulative_limit_covers_the_whole_container() {
    let mut workbook = Workbook::new();
    for idx in 0..4 {
        let sheet = workbook.add_sheet(format!("S{idx}")).unwrap();
        for row in 0..400u32 {
            workbook.sheets[sheet].set_value(CellRef::new(row, 0), f64::from(row) + 0.5);
        }
    }
    let bytes = write_to_vec(&XlsxDocument::new(workbook), &WriteOptions::default()).unwrap();

    let sizes: Vec<u64> = Container::from_reader(Cursor::new(bytes.clone()), &ReadOptions::default())
        .unwrap()
        .list()
        .unwrap()
        .iter()
        .map(|entry| entry.size)
        .collect();
    let largest = sizes.iter().copied().max().unwrap();
    let total: u64 = sizes.iter().sum();

    let options = ReadOptions {
        max_total_uncompressed_size: Some(total - 1),
        ..ReadOptions::default().with_max_uncompressed_size(largest)
    };
    let err = read_from_bytes(bytes.clone(), &options).unwrap_err();
    assert!(
        matches!(
            err,
            XlsxError::OversizedInput {
                scope: SizeLimitScope::Total,
                ..
            }
        ),
        "{err:?}"
    );

    let options = ReadOptions {
        max_total_uncompressed_size: Some(total),
        ..ReadOptions::default().with_max_uncompressed_size(largest)
    };
    read_from_bytes(bytes, &options).unwrap();
}

#[test]
fn zero_means_unlimited() {
    let mut bytes = package_with_sheet(&padded_sheet(0));
    forge_declared_size(&mut bytes, "xl/worksheets/sheet1.xml", 0xF000_0000);
    let err = read_from_bytes(bytes.clone(), &ReadOptions::default().with_max_uncompressed_size(0));
    // Nothing trips the guard; the lie is only caught by the archive's own integrity checks.
    assert!(
        !matches!(err, Err(XlsxError::OversizedInput { .. })),
        "{err:?}"
    );
}
