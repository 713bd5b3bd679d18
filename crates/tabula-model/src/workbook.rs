use serde::{Deserialize, Serialize};

use crate::{Style, StyleTable, Worksheet};

/// Serial date base used to interpret date/time numbers.
///
/// `Excel1900` (the default) carries the Lotus 1-2-3 leap-year bug; `Excel1904` counts from
/// 1904-01-01.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DateSystem {
    #[default]
    #[serde(rename = "excel1900")]
    Excel1900,
    #[serde(rename = "excel1904")]
    Excel1904,
}

/// A workbook- or sheet-scoped defined name.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DefinedName {
    pub name: String,
    /// Formula text the name refers to, without a leading `=`.
    pub refers_to: String,
    /// Index of the sheet the name is scoped to; `None` for workbook scope.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub local_sheet: Option<usize>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub hidden: bool,
}

/// Errors raised by sheet-level workbook edits.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum SheetError {
    #[error("sheet index {0} is out of range")]
    IndexOutOfRange(usize),
    #[error("sheet name cannot be empty")]
    EmptyName,
    #[error("sheet name `{0}` already exists")]
    DuplicateName(String),
}

/// A workbook containing worksheets and shared style resources.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Workbook {
    #[serde(default)]
    pub sheets: Vec<Worksheet>,
    #[serde(default)]
    pub styles: StyleTable,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub defined_names: Vec<DefinedName>,
    /// Index of the sheet shown when the workbook is opened.
    #[serde(default)]
    pub active_sheet: usize,
    #[serde(default)]
    pub date_system: DateSystem,
}

impl Default for Workbook {
    fn default() -> Self {
        Self::new()
    }
}

impl PartialEq for Workbook {
    /// Structural equality: cell styles are compared by resolved [`Style`], not by table id, so
    /// two workbooks whose style tables were populated in a different order still compare equal.
    fn eq(&self, other: &Self) -> bool {
        if self.sheets.len() != other.sheets.len()
            || self.defined_names != other.defined_names
            || self.active_sheet != other.active_sheet
            || self.date_system != other.date_system
        {
            return false;
        }

        self.sheets.iter().zip(&other.sheets).all(|(a, b)| {
            a.name == b.name
                && a.visibility == b.visibility
                && a.merged_ranges == b.merged_ranges
                && a.col_widths == b.col_widths
                && a.row_heights == b.row_heights
                && a.cell_count() == b.cell_count()
                && a.iter_cells().all(|(at, cell)| {
                    let Some(theirs) = b.cell(at) else {
                        return false;
                    };
                    cell.value == theirs.value
                        && cell.comment == theirs.comment
                        && cell.hyperlink == theirs.hyperlink
                        && self.styles.get(cell.style_id) == other.styles.get(theirs.style_id)
                })
        })
    }
}

impl Workbook {
    pub fn new() -> Self {
        Self {
            sheets: Vec::new(),
            styles: StyleTable::new(),
            defined_names: Vec::new(),
            active_sheet: 0,
            date_system: DateSystem::default(),
        }
    }

    /// Append a worksheet, returning its index.
    pub fn add_sheet(&mut self, name: impl Into<String>) -> Result<usize, SheetError> {
        let name = name.into();
        self.check_new_name(&name, None)?;
        self.sheets.push(Worksheet::new(name));
        Ok(self.sheets.len() - 1)
    }

    pub fn sheet(&self, index: usize) -> Option<&Worksheet> {
        self.sheets.get(index)
    }

    pub fn sheet_mut(&mut self, index: usize) -> Option<&mut Worksheet> {
        self.sheets.get_mut(index)
    }

    /// Case-insensitive lookup by sheet name.
    pub fn sheet_index(&self, name: &str) -> Option<usize> {
        self.sheets
            .iter()
            .position(|s| s.name.to_lowercase() == name.to_lowercase())
    }

    pub fn rename_sheet(&mut self, index: usize, new_name: &str) -> Result<(), SheetError> {
        if index >= self.sheets.len() {
            return Err(SheetError::IndexOutOfRange(index));
        }
        let new_name = new_name.trim();
        self.check_new_name(new_name, Some(index))?;
        self.sheets[index].name = new_name.to_string();
        Ok(())
    }

    /// Move the sheet at `from` so it ends up at position `to`.
    pub fn move_sheet(&mut self, from: usize, to: usize) -> Result<(), SheetError> {
        let len = self.sheets.len();
        if from >= len {
            return Err(SheetError::IndexOutOfRange(from));
        }
        if to >= len {
            return Err(SheetError::IndexOutOfRange(to));
        }
        let sheet = self.sheets.remove(from);
        self.sheets.insert(to, sheet);
        self.active_sheet = moved_index(self.active_sheet, from, to);
        for name in &mut self.defined_names {
            name.local_sheet = name.local_sheet.map(|idx| moved_index(idx, from, to));
        }
        Ok(())
    }

    /// Remove the sheet at `index`. Sheet-scoped names pointing at it are dropped.
    pub fn delete_sheet(&mut self, index: usize) -> Result<Worksheet, SheetError> {
        if index >= self.sheets.len() {
            return Err(SheetError::IndexOutOfRange(index));
        }
        let removed = self.sheets.remove(index);
        self.defined_names.retain(|n| n.local_sheet != Some(index));
        for name in &mut self.defined_names {
            if let Some(idx) = name.local_sheet.as_mut() {
                if *idx > index {
                    *idx -= 1;
                }
            }
        }
        if self.active_sheet >= self.sheets.len() {
            self.active_sheet = self.sheets.len().saturating_sub(1);
        } else if self.active_sheet > index {
            self.active_sheet -= 1;
        }
        Ok(removed)
    }

    pub fn intern_style(&mut self, style: Style) -> u32 {
        self.styles.intern(style)
    }

    fn check_new_name(&self, name: &str, skip: Option<usize>) -> Result<(), SheetError> {
        if name.trim().is_empty() {
            return Err(SheetError::EmptyName);
        }
        let folded = name.to_lowercase();
        let clash = self
            .sheets
            .iter()
            .enumerate()
            .any(|(idx, s)| Some(idx) != skip && s.name.to_lowercase() == folded);
        if clash {
            return Err(SheetError::DuplicateName(name.to_string()));
        }
        Ok(())
    }
}

/// Where the item at `idx` ends up after moving the item at `from` to `to`.
pub fn moved_index(idx: usize, from: usize, to: usize) -> usize {
    if idx == from {
        to
    } else if from < idx && idx <= to {
        idx - 1
    } else if to <= idx && idx < from {
        idx + 1
    } else {
        idx
    }
}
