use std::fmt;
use std::str::FromStr;

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

pub use crate::rich_text::RichText;

/// Typed cell value.
///
/// The enum uses an explicit `{type, value}` tagged layout for stable IPC.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum CellValue {
    #[default]
    Empty,
    Text(String),
    Number(f64),
    Bool(bool),
    /// A date/time. Stored in the package as a serial number with a date number format.
    DateTime(NaiveDateTime),
    Formula(Formula),
    RichText(RichText),
    Error(ErrorValue),
}

impl CellValue {
    pub fn is_empty(&self) -> bool {
        matches!(self, CellValue::Empty)
    }

    /// The value a consumer sees: the cached result for formulas, the value itself otherwise.
    pub fn effective(&self) -> &CellValue {
        match self {
            CellValue::Formula(Formula {
                cached: Some(cached),
                ..
            }) => cached,
            other => other,
        }
    }
}

/// Formula text plus the last calculated result, if the producer stored one.
///
/// `text` is stored without the leading `=`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Formula {
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cached: Option<Box<CellValue>>,
}

impl Formula {
    pub fn new(text: impl Into<String>) -> Self {
        let text = text.into();
        let text = match text.strip_prefix('=') {
            Some(rest) => rest.to_string(),
            None => text,
        };
        Self { text, cached: None }
    }

    pub fn with_cached(mut self, cached: impl Into<CellValue>) -> Self {
        self.cached = Some(Box::new(cached.into()));
        self
    }
}

impl From<f64> for CellValue {
    fn from(value: f64) -> Self {
        CellValue::Number(value)
    }
}

impl From<i64> for CellValue {
    fn from(value: i64) -> Self {
        CellValue::Number(value as f64)
    }
}

impl From<bool> for CellValue {
    fn from(value: bool) -> Self {
        CellValue::Bool(value)
    }
}

impl From<String> for CellValue {
    fn from(value: String) -> Self {
        CellValue::Text(value)
    }
}

impl From<&str> for CellValue {
    fn from(value: &str) -> Self {
        CellValue::Text(value.to_string())
    }
}

impl From<NaiveDateTime> for CellValue {
    fn from(value: NaiveDateTime) -> Self {
        CellValue::DateTime(value)
    }
}

impl From<Formula> for CellValue {
    fn from(value: Formula) -> Self {
        CellValue::Formula(value)
    }
}

impl From<RichText> for CellValue {
    fn from(value: RichText) -> Self {
        CellValue::RichText(value)
    }
}

impl From<ErrorValue> for CellValue {
    fn from(value: ErrorValue) -> Self {
        CellValue::Error(value)
    }
}

/// Spreadsheet error literals.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorValue {
    Null,
    Div0,
    Value,
    Ref,
    Name,
    Num,
    NA,
    GettingData,
    Spill,
    Calc,
}

impl ErrorValue {
    pub const fn as_str(self) -> &'static str {
        match self {
            ErrorValue::Null => "#NULL!",
            ErrorValue::Div0 => "#DIV/0!",
            ErrorValue::Value => "#VALUE!",
            ErrorValue::Ref => "#REF!",
            ErrorValue::Name => "#NAME?",
            ErrorValue::Num => "#NUM!",
            ErrorValue::NA => "#N/A",
            ErrorValue::GettingData => "#GETTING_DATA",
            ErrorValue::Spill => "#SPILL!",
            ErrorValue::Calc => "#CALC!",
        }
    }
}

impl fmt::Display for ErrorValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("unknown error literal `{0}`")]
pub struct UnknownErrorValue(pub String);

impl FromStr for ErrorValue {
    type Err = UnknownErrorValue;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let value = match s.trim() {
            "#NULL!" => ErrorValue::Null,
            "#DIV/0!" => ErrorValue::Div0,
            "#VALUE!" => ErrorValue::Value,
            "#REF!" => ErrorValue::Ref,
            "#NAME?" => ErrorValue::Name,
            "#NUM!" => ErrorValue::Num,
            "#N/A" => ErrorValue::NA,
            "#GETTING_DATA" => ErrorValue::GettingData,
            "#SPILL!" => ErrorValue::Spill,
            "#CALC!" => ErrorValue::Calc,
            other => return Err(UnknownErrorValue(other.to_string())),
        };
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_literals_roundtrip() {
        for err in [
            ErrorValue::Null,
            ErrorValue::Div0,
            ErrorValue::NA,
            ErrorValue::Calc,
        ] {
            assert_eq!(err.as_str().parse::<ErrorValue>(), Ok(err));
        }
        assert!("#BOGUS".parse::<ErrorValue>().is_err());
    }

    #[test]
    fn formula_strips_leading_equals() {
        let f = Formula::new("=SUM(A1:A3)").with_cached(6.0);
        assert_eq!(f.text, "SUM(A1:A3)");
        assert_eq!(
            CellValue::Formula(f).effective(),
            &CellValue::Number(6.0)
        );
    }

    #[test]
    fn serde_layout_is_tagged() {
        let json = serde_json::to_string(&CellValue::Number(1.5)).unwrap();
        assert_eq!(json, r#"{"type":"number","value":1.5}"#);
    }
}
