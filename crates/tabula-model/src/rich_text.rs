use serde::{Deserialize, Serialize};

use crate::Color;

/// Rich (multi-style) text.
///
/// `text` holds the full string content; `runs` apply style overrides to ranges of it.
///
/// ## Indexing
/// Run `start`/`end` offsets are **Unicode scalar value** (`char`) indices into `text`, not
/// UTF-8 byte offsets.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RichText {
    pub text: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub runs: Vec<RichTextRun>,
}

impl RichText {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            runs: Vec::new(),
        }
    }

    pub fn plain_text(&self) -> &str {
        &self.text
    }

    pub fn is_plain(&self) -> bool {
        self.runs.is_empty()
    }

    pub fn from_segments(segments: impl IntoIterator<Item = (String, RichTextRunStyle)>) -> Self {
        let mut text = String::new();
        let mut runs = Vec::new();
        let mut cursor = 0usize;

        for (segment_text, style) in segments {
            let start = cursor;
            cursor += segment_text.chars().count();
            text.push_str(&segment_text);
            runs.push(RichTextRun {
                start,
                end: cursor,
                style,
            });
        }

        Self { text, runs }
    }

    /// Split the text into consecutive segments, each paired with the run style covering it.
    ///
    /// Text not covered by any run is returned with `None`.
    pub fn segments(&self) -> Vec<(&str, Option<&RichTextRunStyle>)> {
        let mut out = Vec::new();
        let mut cursor = 0usize;
        let char_len = self.text.chars().count();

        let mut runs: Vec<&RichTextRun> = self.runs.iter().filter(|r| r.end > r.start).collect();
        runs.sort_by_key(|r| r.start);

        for run in runs {
            let start = run.start.max(cursor).min(char_len);
            let end = run.end.min(char_len);
            if start > cursor {
                out.push((slice_by_char_range(&self.text, cursor, start), None));
            }
            if end > start {
                out.push((slice_by_char_range(&self.text, start, end), Some(&run.style)));
                cursor = end;
            }
        }
        if cursor < char_len {
            out.push((slice_by_char_range(&self.text, cursor, char_len), None));
        }
        out
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RichTextRun {
    pub start: usize,
    pub end: usize,
    pub style: RichTextRunStyle,
}

/// Character formatting applied to one run. `None` fields inherit from the cell style.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RichTextRunStyle {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bold: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub italic: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub underline: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub strike: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<Color>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub font: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size_100pt: Option<u16>,
}

impl RichTextRunStyle {
    pub fn is_empty(&self) -> bool {
        self == &RichTextRunStyle::default()
    }
}

fn slice_by_char_range(text: &str, start: usize, end: usize) -> &str {
    let mut indices = text
        .char_indices()
        .map(|(i, _)| i)
        .chain(std::iter::once(text.len()));
    let start_byte = indices.nth(start).unwrap_or(text.len());
    let end_byte = if end > start {
        indices.nth(end - start - 1).unwrap_or(text.len())
    } else {
        start_byte
    };
    &text[start_byte..end_byte]
}
