use std::io::Cursor;

use chrono::NaiveDate;
use rust_xlsxwriter::{ExcelDateTime, Format, Formula as XlsxFormula, Workbook as XlsxWorkbook};
use tabula_model::{CellRef, CellValue, Hyperlink, Range};
use tabula_xlsx::{
    read_from_bytes, write_to_vec, ReadOptions, StreamingReader, WriteOptions, XlsxDocument,
};

fn at(a1: &str) -> CellRef {
    CellRef::from_a1(a1).unwrap()
}

fn xlsxwriter_bytes() -> Vec<u8> {
    let mut workbook = XlsxWorkbook::new();
    let bold = Format::new().set_bold();
    let date = Format::new().set_num_format("yyyy-mm-dd");

    let sheet = workbook.add_worksheet();
    sheet.set_name("Sales").unwrap();
    sheet.write_string_with_format(0, 0, "Region", &bold).unwrap();
    sheet.write_string_with_format(0, 1, "Revenue", &bold).unwrap();
    sheet.write_string(1, 0, "North").unwrap();
    sheet.write_number(1, 1, 1250.5).unwrap();
    sheet.write_string(2, 0, "South").unwrap();
    sheet.write_number(2, 1, 980.25).unwrap();
    sheet
        .write_formula(3, 1, XlsxFormula::new("=SUM(B2:B3)").set_result("2230.75"))
        .unwrap();
    sheet.write_boolean(4, 0, true).unwrap();
    sheet
        .write_datetime_with_format(5, 0, &ExcelDateTime::from_ymd(2024, 3, 15).unwrap(), &date)
        .unwrap();
    sheet.write_url(6, 0, "https://example.com/report").unwrap();
    sheet
        .merge_range(8, 0, 8, 2, "Merged title", &Format::new())
        .unwrap();
    sheet.set_column_width(0, 18).unwrap();

    let second = workbook.add_worksheet();
    second.set_name("Notes").unwrap();
    second.write_string(0, 0, "North").unwrap();

    workbook.save_to_buffer().unwrap()
}

#[test]
fn reads_a_workbook_written_by_rust_xlsxwriter() {
    let (doc, _warnings) = read_from_bytes(xlsxwriter_bytes(), &ReadOptions::default()).unwrap();
    let workbook = doc.workbook();
    let names: Vec<&str> = workbook.sheets.iter().map(|s| s.name.as_str()).collect();
    assert_eq!(names, ["Sales", "Notes"]);

    let sales = &workbook.sheets[0];
    assert_eq!(sales.value(at("A1")), &CellValue::from("Region"));
    let header_style = sales.cell(at("A1")).unwrap().style_id;
    assert!(workbook.styles.get(header_style).unwrap().font.as_ref().unwrap().bold);

    assert_eq!(sales.value(at("B2")), &CellValue::Number(1250.5));
    match sales.value(at("B4")) {
        CellValue::Formula(formula) => {
            assert_eq!(formula.text, "SUM(B2:B3)");
            assert_eq!(formula.cached.as_deref(), Some(&CellValue::Number(2230.75)));
        }
        other => panic!("expected a formula, got {other:?}"),
    }
    assert_eq!(sales.value(at("A5")), &CellValue::Bool(true));
    assert_eq!(
        sales.value(at("A6")),
        &CellValue::DateTime(
            NaiveDate::from_ymd_opt(2024, 3, 15)
                .unwrap()
                .and_hms_opt(0, 0, 0)
                .unwrap()
        )
    );
    assert_eq!(
        sales.cell(at("A7")).unwrap().hyperlink,
        Some(Hyperlink::External("https://example.com/report".to_string()))
    );
    assert!(sales.merged_ranges.contains(&Range::from_a1("A9:C9").unwrap()));
    assert!(sales.col_widths.get(&0).is_some_and(|w| *w > 18.0));

    assert_eq!(workbook.sheets[1].value(at("A1")), &CellValue::from("North"));
}

#[test]
fn foreign_workbook_survives_a_full_rewrite() {
    let (doc, _) = read_from_bytes(xlsxwriter_bytes(), &ReadOptions::default()).unwrap();
    let options = WriteOptions {
        surgical: false,
        ..WriteOptions::default()
    };
    let bytes = write_to_vec(&doc, &options).unwrap();
    let (again, _) = read_from_bytes(bytes, &ReadOptions::default()).unwrap();
    assert_eq!(again.workbook(), doc.workbook());
}

#[test]
fn foreign_workbook_streams_cached_values() {
    let reader =
        StreamingReader::from_reader(Cursor::new(xlsxwriter_bytes()), "sales", &ReadOptions::default())
            .unwrap();
    let rows = reader.collect::<Result<Vec<_>, _>>().unwrap();
    let total = rows.iter().find(|row| row.index == 4).unwrap();
    assert_eq!(total.get(1), Some(&CellValue::Number(2230.75)));
    // Without style information a date is just its serial.
    let dated = rows.iter().find(|row| row.index == 6).unwrap();
    assert_eq!(dated.get(0), Some(&CellValue::Number(45366.0)));
}
