//! Cell value decoding and encoding shared by the tree and streaming codecs.

use chrono::{NaiveDate, NaiveDateTime};
use tabula_model::{CellValue, DateSystem, ErrorValue, Formula, RichText};

use crate::dates::{datetime_to_serial, serial_to_datetime};
use crate::error::{ReadWarning, XlsxError};
use crate::shared_strings::SharedStrings;

/// A `<c>` element with its children gathered, before value interpretation.
#[derive(Clone, Debug, Default)]
pub(crate) struct RawCell {
    pub(crate) reference: Option<String>,
    pub(crate) kind: Option<String>,
    pub(crate) style: u32,
    pub(crate) value: Option<String>,
    pub(crate) formula: Option<RawFormula>,
    pub(crate) inline: Option<RichText>,
}

#[derive(Clone, Debug, Default)]
pub(crate) struct RawFormula {
    pub(crate) text: String,
    pub(crate) shared: bool,
}

/// Interpretation context for raw cells of one sheet.
pub(crate) struct CellDecoder<'a> {
    pub(crate) part: &'a str,
    pub(crate) strings: &'a SharedStrings,
    pub(crate) date_system: DateSystem,
}

impl CellDecoder<'_> {
    /// Decode the stored value, ignoring any formula. `is_date` says whether the cell's number
    /// format shows dates.
    pub(crate) fn value(
        &self,
        raw: &RawCell,
        is_date: bool,
        warnings: &mut Vec<ReadWarning>,
    ) -> Result<CellValue, XlsxError> {
        let text = raw.value.as_deref();
        let value = match raw.kind.as_deref() {
            Some("s") => {
                let Some(text) = text else {
                    return Ok(CellValue::Empty);
                };
                let idx: u32 = text.trim().parse().map_err(|_| {
                    XlsxError::parse(self.part, 0, format!("bad shared string index {text:?}"))
                })?;
                let item = self.strings.get(idx).ok_or_else(|| {
                    XlsxError::parse(
                        self.part,
                        0,
                        format!("shared string index {idx} out of range"),
                    )
                })?;
                rich_value(item.clone())
            }
            Some("inlineStr") => match &raw.inline {
                Some(rich) => rich_value(rich.clone()),
                None => text.map_or(CellValue::Empty, |t| CellValue::Text(t.to_string())),
            },
            Some("str") => CellValue::Text(text.unwrap_or_default().to_string()),
            Some("b") => match text.map(str::trim) {
                Some(t) => CellValue::Bool(t == "1" || t.eq_ignore_ascii_case("true")),
                None => CellValue::Empty,
            },
            Some("e") => match text {
                Some(t) => match t.parse::<ErrorValue>() {
                    Ok(err) => CellValue::Error(err),
                    Err(_) => {
                        warnings.push(ReadWarning::unsupported(
                            self.part,
                            format!("error literal {t}"),
                        ));
                        CellValue::Text(t.to_string())
                    }
                },
                None => CellValue::Empty,
            },
            Some("d") => match text {
                Some(t) => match parse_iso_datetime(t) {
                    Some(dt) => CellValue::DateTime(dt),
                    None => CellValue::Text(t.to_string()),
                },
                None => CellValue::Empty,
            },
            Some("n") | None => match text {
                Some(t) => match t.trim().parse::<f64>() {
                    Ok(n) if is_date => serial_to_datetime(n, self.date_system)
                        .map_or(CellValue::Number(n), CellValue::DateTime),
                    Ok(n) => CellValue::Number(n),
                    Err(_) => CellValue::Text(t.to_string()),
                },
                None => CellValue::Empty,
            },
            Some(other) => {
                return Err(XlsxError::parse(
                    self.part,
                    0,
                    format!("unknown cell type t={other:?}"),
                ))
            }
        };
        Ok(value)
    }

    /// Decode the full cell value: formulas wrap the stored value as their cached result.
    pub(crate) fn cell(
        &self,
        raw: &RawCell,
        is_date: bool,
        warnings: &mut Vec<ReadWarning>,
    ) -> Result<CellValue, XlsxError> {
        let cached = self.value(raw, is_date, warnings)?;
        let Some(formula) = &raw.formula else {
            return Ok(cached);
        };
        if formula.text.is_empty() {
            if formula.shared {
                warnings.push(ReadWarning::unsupported(
                    self.part,
                    format!(
                        "shared formula at {}",
                        raw.reference.as_deref().unwrap_or("?")
                    ),
                ));
            }
            return Ok(cached);
        }
        let mut out = Formula::new(formula.text.as_str());
        if !cached.is_empty() {
            out.cached = Some(Box::new(cached));
        }
        Ok(CellValue::Formula(out))
    }
}

fn rich_value(rich: RichText) -> CellValue {
    if rich.is_plain() {
        CellValue::Text(rich.text)
    } else {
        CellValue::RichText(rich)
    }
}

fn parse_iso_datetime(text: &str) -> Option<NaiveDateTime> {
    let text = text.trim().trim_end_matches('Z');
    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%dT%H:%M"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(text, fmt).ok())
        .or_else(|| {
            NaiveDate::parse_from_str(text, "%Y-%m-%d")
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
        })
}

/// How date-times and strings are laid out in the target part.
pub(crate) enum CellTarget<'a> {
    /// Whole-document parts: strings go to the shared table, date-times become serials.
    Document {
        strings: &'a mut SharedStrings,
        date_system: DateSystem,
        references: &'a mut usize,
    },
    /// Streamed parts: inline strings and ISO-8601 date-times, no shared state.
    Stream,
}

/// A cell ready to be emitted as `<c t=..><f>..</f><v>..</v></c>` or with an `<is>` child.
#[derive(Clone, Debug, Default, PartialEq)]
pub(crate) struct EncodedCell {
    pub(crate) kind: Option<&'static str>,
    pub(crate) formula: Option<String>,
    pub(crate) value: Option<String>,
    pub(crate) inline: Option<RichText>,
}

impl CellTarget<'_> {
    pub(crate) fn encode(&mut self, value: &CellValue) -> EncodedCell {
        match value {
            CellValue::Formula(formula) => {
                let mut out = match formula.cached.as_deref() {
                    Some(CellValue::Text(text)) => EncodedCell {
                        kind: Some("str"),
                        value: Some(text.clone()),
                        ..EncodedCell::default()
                    },
                    Some(CellValue::RichText(rich)) => self.string(rich.clone()),
                    Some(CellValue::Formula(_)) | None => EncodedCell::default(),
                    Some(cached) => self.encode(cached),
                };
                out.formula = Some(formula.text.clone());
                out
            }
            CellValue::Empty => EncodedCell::default(),
            CellValue::Text(text) => self.string(RichText::new(text.as_str())),
            CellValue::RichText(rich) => self.string(rich.clone()),
            CellValue::Number(n) => number_cell(*n),
            CellValue::Bool(b) => EncodedCell {
                kind: Some("b"),
                value: Some(if *b { "1" } else { "0" }.to_string()),
                ..EncodedCell::default()
            },
            CellValue::Error(err) => error_cell(*err),
            CellValue::DateTime(dt) => match self {
                CellTarget::Document { date_system, .. } => {
                    number_cell(datetime_to_serial(*dt, *date_system))
                }
                CellTarget::Stream => EncodedCell {
                    kind: Some("d"),
                    value: Some(dt.format("%Y-%m-%dT%H:%M:%S%.3f").to_string()),
                    ..EncodedCell::default()
                },
            },
        }
    }

    fn string(&mut self, rich: RichText) -> EncodedCell {
        match self {
            CellTarget::Document {
                strings,
                references,
                ..
            } => {
                **references += 1;
                EncodedCell {
                    kind: Some("s"),
                    value: Some(strings.register(&rich).to_string()),
                    ..EncodedCell::default()
                }
            }
            CellTarget::Stream => EncodedCell {
                kind: Some("inlineStr"),
                inline: Some(rich),
                ..EncodedCell::default()
            },
        }
    }
}

fn number_cell(n: f64) -> EncodedCell {
    if !n.is_finite() {
        return error_cell(ErrorValue::Num);
    }
    EncodedCell {
        kind: None,
        value: Some(format_number(n)),
        ..EncodedCell::default()
    }
}

fn error_cell(err: ErrorValue) -> EncodedCell {
    EncodedCell {
        kind: Some("e"),
        value: Some(err.as_str().to_string()),
        ..EncodedCell::default()
    }
}

/// Shortest text that parses back to `n`.
pub(crate) fn format_number(n: f64) -> String {
    if n == 0.0 {
        return "0".to_string();
    }
    n.to_string()
}

/// Whether writing `value` needs a date number format on the cell.
pub(crate) fn needs_date_format(value: &CellValue) -> bool {
    match value {
        CellValue::DateTime(_) => true,
        CellValue::Formula(Formula {
            cached: Some(cached),
            ..
        }) => matches!(cached.as_ref(), CellValue::DateTime(_)),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use tabula_model::RichTextRunStyle;

    use super::*;

    fn decoder(strings: &SharedStrings) -> CellDecoder<'_> {
        CellDecoder {
            part: "xl/worksheets/sheet1.xml",
            strings,
            date_system: DateSystem::Excel1900,
        }
    }

    fn raw(kind: Option<&str>, value: &str) -> RawCell {
        RawCell {
            kind: kind.map(str::to_string),
            value: Some(value.to_string()),
            ..RawCell::default()
        }
    }

    #[test]
    fn decodes_each_cell_kind() {
        let mut strings = SharedStrings::new();
        strings.register_plain("hello");
        let dec = decoder(&strings);
        let mut warnings = Vec::new();

        let cases = [
            (raw(Some("s"), "0"), false, CellValue::Text("hello".into())),
            (raw(Some("b"), "1"), false, CellValue::Bool(true)),
            (raw(Some("e"), "#N/A"), false, CellValue::Error(ErrorValue::NA)),
            (raw(Some("str"), "x"), false, CellValue::Text("x".into())),
            (raw(None, "2.5"), false, CellValue::Number(2.5)),
            (
                raw(None, "45000.5"),
                true,
                CellValue::DateTime(
                    NaiveDate::from_ymd_opt(2023, 3, 15)
                        .unwrap()
                        .and_hms_opt(12, 0, 0)
                        .unwrap(),
                ),
            ),
            (
                raw(Some("d"), "2024-02-29T08:30:00"),
                false,
                CellValue::DateTime(
                    NaiveDate::from_ymd_opt(2024, 2, 29)
                        .unwrap()
                        .and_hms_opt(8, 30, 0)
                        .unwrap(),
                ),
            ),
        ];
        for (cell, is_date, expected) in cases {
            assert_eq!(dec.value(&cell, is_date, &mut warnings).unwrap(), expected);
        }
        assert!(warnings.is_empty());
    }

    #[test]
    fn out_of_range_shared_string_is_a_parse_error() {
        let strings = SharedStrings::new();
        let err = decoder(&strings)
            .value(&raw(Some("s"), "3"), false, &mut Vec::new())
            .unwrap_err();
        assert!(matches!(err, XlsxError::Parse { .. }));
    }

    #[test]
    fn shared_formula_followers_keep_their_cached_value() {
        let strings = SharedStrings::new();
        let mut warnings = Vec::new();
        let cell = RawCell {
            reference: Some("B2".into()),
            value: Some("4".into()),
            formula: Some(RawFormula {
                text: String::new(),
                shared: true,
            }),
            ..RawCell::default()
        };
        let value = decoder(&strings).cell(&cell, false, &mut warnings).unwrap();
        assert_eq!(value, CellValue::Number(4.0));
        assert_eq!(warnings.len(), 1);
    }

    #[test]
    fn formulas_carry_cached_results() {
        let mut strings = SharedStrings::new();
        let mut references = 0;
        let mut target = CellTarget::Document {
            strings: &mut strings,
            date_system: DateSystem::Excel1900,
            references: &mut references,
        };
        let encoded =
            target.encode(&CellValue::Formula(Formula::new("=A1&\"x\"").with_cached("ax")));
        assert_eq!(
            encoded,
            EncodedCell {
                kind: Some("str"),
                formula: Some("A1&\"x\"".into()),
                value: Some("ax".into()),
                inline: None,
            }
        );
        assert_eq!(references, 0);
    }

    #[test]
    fn rich_cached_results_keep_their_runs() {
        let rich = RichText::from_segments([
            ("net ".to_string(), RichTextRunStyle::default()),
            (
                "total".to_string(),
                RichTextRunStyle {
                    bold: Some(true),
                    ..RichTextRunStyle::default()
                },
            ),
        ]);
        let value = CellValue::Formula(
            Formula::new("A1&B1").with_cached(CellValue::RichText(rich.clone())),
        );

        let mut strings = SharedStrings::new();
        let mut references = 0;
        let encoded = CellTarget::Document {
            strings: &mut strings,
            date_system: DateSystem::Excel1900,
            references: &mut references,
        }
        .encode(&value);
        assert_eq!(encoded.kind, Some("s"));
        assert_eq!(encoded.formula.as_deref(), Some("A1&B1"));
        assert_eq!(strings.get(0), Some(&rich));
        assert_eq!(references, 1);

        let raw = RawCell {
            kind: encoded.kind.map(str::to_string),
            value: encoded.value,
            formula: Some(RawFormula {
                text: "A1&B1".to_string(),
                shared: false,
            }),
            ..RawCell::default()
        };
        assert_eq!(
            decoder(&strings).cell(&raw, false, &mut Vec::new()).unwrap(),
            value
        );

        let streamed = CellTarget::Stream.encode(&value);
        assert_eq!(streamed.kind, Some("inlineStr"));
        assert_eq!(streamed.inline, Some(rich));
    }

    #[test]
    fn non_finite_numbers_become_num_errors() {
        let encoded = CellTarget::Stream.encode(&CellValue::Number(f64::INFINITY));
        assert_eq!(encoded.kind, Some("e"));
        assert_eq!(encoded.value.as_deref(), Some("#NUM!"));
    }

    #[test]
    fn streamed_strings_and_dates_are_inline() {
        let mut target = CellTarget::Stream;
        assert_eq!(target.encode(&"a".into()).kind, Some("inlineStr"));
        let dt = NaiveDate::from_ymd_opt(2020, 1, 2)
            .unwrap()
            .and_hms_opt(3, 4, 5)
            .unwrap();
        let encoded = target.encode(&CellValue::DateTime(dt));
        assert_eq!(encoded.value.as_deref(), Some("2020-01-02T03:04:05.000"));
        assert_eq!(parse_iso_datetime(encoded.value.as_deref().unwrap()), Some(dt));
    }
}
