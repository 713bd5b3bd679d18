use std::io::Cursor;

use pretty_assertions::assert_eq;
use tabula_model::{CellRef, CellValue, ErrorValue, Workbook};
use tabula_xlsx::{
    read, write_to_vec, ReadOptions, RowRecord, SheetSelector, StreamingReader, StreamingWriter,
    WriteOptions, WriterState, XlsxDocument, XlsxError,
};

fn sample_row(index: u32) -> RowRecord {
    let mut row = RowRecord::new(index)
        .with_cell(0, f64::from(index))
        .with_cell(1, format!("item-{}", index % 13));
    if index % 3 == 0 {
        row = row.with_cell(4, index % 2 == 0);
    }
    if index % 97 == 0 {
        row = row.with_cell(7, ErrorValue::Div0);
    }
    row
}

#[test]
fn file_round_trip_through_both_streaming_halves() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("rows.xlsx");

    let mut writer = StreamingWriter::create(&path, "Rows", &WriteOptions::default()).unwrap();
    assert_eq!(writer.state(), WriterState::HeaderWritten);
    let rows: Vec<RowRecord> = (1..=5_000).filter(|i| i % 11 != 0).map(sample_row).collect();
    for row in &rows {
        writer.write_row(row).unwrap();
    }
    writer.finalize().unwrap();

    let reader = StreamingReader::open(&path, "ROWS", &ReadOptions::default()).unwrap();
    let back = reader.collect::<Result<Vec<_>, _>>().unwrap();
    assert_eq!(back.len(), rows.len());
    assert_eq!(back, rows);
}

#[test]
fn streamed_files_are_readable_as_whole_documents() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("whole.xlsx");
    let mut writer = StreamingWriter::create(&path, "Log", &WriteOptions::default()).unwrap();
    for index in 1..=20 {
        writer.write_row(&sample_row(index)).unwrap();
    }
    writer.finalize().unwrap();

    let (doc, warnings) = read(&path, &ReadOptions::default()).unwrap();
    assert!(warnings.is_empty(), "{warnings:?}");
    let sheet = &doc.workbook().sheets[0];
    assert_eq!(sheet.name, "Log");
    assert_eq!(sheet.value(CellRef::new(11, 1)), &CellValue::from("item-12"));
    assert_eq!(sheet.value(CellRef::new(5, 4)), &CellValue::Bool(true));
    assert_eq!(sheet.value(CellRef::new(19, 0)), &CellValue::Number(20.0));
}

#[test]
fn whole_document_output_streams_with_shared_strings() {
    let mut workbook = Workbook::new();
    workbook.add_sheet("First").unwrap();
    workbook.add_sheet("Second").unwrap();
    for row in 0..200u32 {
        workbook.sheets[1].set_value(CellRef::new(row, 0), format!("k{}", row % 5));
        workbook.sheets[1].set_value(CellRef::new(row, 2), f64::from(row) / 4.0);
    }
    let bytes = write_to_vec(&XlsxDocument::new(workbook), &WriteOptions::default()).unwrap();

    let reader = StreamingReader::from_reader(
        Cursor::new(bytes),
        SheetSelector::Index(1),
        &ReadOptions::default(),
    )
    .unwrap();
    assert_eq!(reader.sheet_name(), "Second");
    let rows = reader.collect::<Result<Vec<_>, _>>().unwrap();
    assert_eq!(rows.len(), 200);
    assert_eq!(rows[7].index, 8);
    assert_eq!(rows[7].get(0), Some(&CellValue::from("k2")));
    assert_eq!(rows[7].get(2), Some(&CellValue::Number(1.75)));
    assert_eq!(rows[7].get(1), None);
}

#[test]
fn dropping_a_reader_mid_stream_releases_the_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("partial.xlsx");
    let mut writer = StreamingWriter::create(&path, "Rows", &WriteOptions::default()).unwrap();
    for index in 1..=1_000 {
        writer.write_row(&sample_row(index)).unwrap();
    }
    writer.finalize().unwrap();

    let mut reader = StreamingReader::open(&path, 0usize, &ReadOptions::default()).unwrap();
    let first = reader.next().unwrap().unwrap();
    assert_eq!(first.index, 1);
    drop(reader);

    std::fs::remove_file(&path).unwrap();
    assert!(!path.exists());
}

#[test]
fn writer_state_machine_is_enforced() {
    let mut writer =
        StreamingWriter::new(Cursor::new(Vec::new()), "Rows", &WriteOptions::default());
    assert_eq!(writer.state(), WriterState::Unopened);
    assert!(matches!(
        writer.write_row(&RowRecord::new(1)),
        Err(XlsxError::InvalidWriterState { .. })
    ));

    writer.begin().unwrap();
    assert!(matches!(
        writer.begin(),
        Err(XlsxError::InvalidWriterState { .. })
    ));
    writer.write_row(&sample_row(1)).unwrap();
    writer.finalize().unwrap();

    assert_eq!(writer.state(), WriterState::Finalized);
    assert!(matches!(
        writer.write_row(&sample_row(2)),
        Err(XlsxError::InvalidWriterState { .. })
    ));
    assert!(matches!(
        writer.finalize(),
        Err(XlsxError::AlreadyFinalized)
    ));
}
