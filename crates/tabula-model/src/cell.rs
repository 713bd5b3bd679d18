use serde::{Deserialize, Serialize};

use crate::CellValue;

/// A note attached to a cell.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Comment {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub author: String,
    pub text: String,
}

impl Comment {
    pub fn new(author: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            author: author.into(),
            text: text.into(),
        }
    }
}

/// Hyperlink target for a cell.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "target", rename_all = "snake_case")]
pub enum Hyperlink {
    /// A URL or file path outside the workbook.
    External(String),
    /// A location inside the workbook, e.g. `Sheet2!A1`.
    Internal(String),
}

/// A single cell record.
///
/// Cells are stored sparsely: a cell with no value, default style and no annotations carries no
/// information and is not kept in the worksheet map.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Cell {
    #[serde(default)]
    pub value: CellValue,
    /// Index into the workbook style table.
    #[serde(default)]
    pub style_id: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<Comment>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hyperlink: Option<Hyperlink>,
}

impl Cell {
    pub fn new(value: impl Into<CellValue>) -> Self {
        Self {
            value: value.into(),
            ..Self::default()
        }
    }

    pub fn with_style(mut self, style_id: u32) -> Self {
        self.style_id = style_id;
        self
    }

    pub fn with_comment(mut self, comment: Comment) -> Self {
        self.comment = Some(comment);
        self
    }

    pub fn with_hyperlink(mut self, hyperlink: Hyperlink) -> Self {
        self.hyperlink = Some(hyperlink);
        self
    }

    /// Returns true if this cell has no observable content, formatting or annotation.
    pub fn is_truly_empty(&self) -> bool {
        self.value.is_empty()
            && self.style_id == 0
            && self.comment.is_none()
            && self.hyperlink.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn annotations_make_a_cell_non_empty() {
        assert!(Cell::default().is_truly_empty());
        assert!(!Cell::default()
            .with_comment(Comment::new("me", "note"))
            .is_truly_empty());
        assert!(!Cell::default().with_style(3).is_truly_empty());
        assert!(!Cell::new(0.0).is_truly_empty());
    }
}
