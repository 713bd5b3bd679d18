use std::collections::{BTreeMap, BTreeSet, HashMap};

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::{Cell, CellRef, CellValue, Range};

/// Worksheet visibility state.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SheetVisibility {
    #[default]
    Visible,
    Hidden,
    VeryHidden,
}

/// A single worksheet.
///
/// Cells live in a sparse map, so equality compares cell content regardless of the order the
/// cells were inserted in.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Worksheet {
    pub name: String,
    #[serde(default)]
    pub visibility: SheetVisibility,
    #[serde(
        default,
        serialize_with = "serialize_cells",
        deserialize_with = "deserialize_cells"
    )]
    cells: HashMap<CellRef, Cell>,
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub merged_ranges: BTreeSet<Range>,
    /// Column widths in character units, keyed by 0-based column.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub col_widths: BTreeMap<u32, f64>,
    /// Row heights in points, keyed by 0-based row.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub row_heights: BTreeMap<u32, f64>,
}

impl Worksheet {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn cell(&self, cell: CellRef) -> Option<&Cell> {
        self.cells.get(&cell)
    }

    pub fn cell_mut(&mut self, cell: CellRef) -> Option<&mut Cell> {
        self.cells.get_mut(&cell)
    }

    /// The value at `cell`, or `Empty` for cells that are not stored.
    pub fn value(&self, cell: CellRef) -> &CellValue {
        static EMPTY: CellValue = CellValue::Empty;
        self.cells.get(&cell).map(|c| &c.value).unwrap_or(&EMPTY)
    }

    /// Store `value` at the A1 address `a1`, keeping any existing style and annotations.
    ///
    /// Returns `false` when `a1` is not a valid reference.
    pub fn set_value_a1(&mut self, a1: &str, value: impl Into<CellValue>) -> bool {
        match CellRef::from_a1(a1) {
            Ok(cell) => {
                self.set_value(cell, value);
                true
            }
            Err(_) => false,
        }
    }

    /// Store `value` at `cell`, keeping any existing style and annotations.
    pub fn set_value(&mut self, cell: CellRef, value: impl Into<CellValue>) {
        let entry = self.cells.entry(cell).or_default();
        entry.value = value.into();
        if entry.is_truly_empty() {
            self.cells.remove(&cell);
        }
    }

    /// Replace the whole cell record at `cell`. Truly empty cells are removed.
    pub fn set_cell(&mut self, cell: CellRef, record: Cell) {
        if record.is_truly_empty() {
            self.cells.remove(&cell);
        } else {
            self.cells.insert(cell, record);
        }
    }

    pub fn remove_cell(&mut self, cell: CellRef) -> Option<Cell> {
        self.cells.remove(&cell)
    }

    pub fn cell_count(&self) -> usize {
        self.cells.len()
    }

    /// Iterate stored cells in arbitrary order.
    pub fn iter_cells(&self) -> impl Iterator<Item = (CellRef, &Cell)> {
        self.cells.iter().map(|(k, v)| (*k, v))
    }

    /// Stored cells in row-major order (ascending row, then column).
    pub fn sorted_cells(&self) -> Vec<(CellRef, &Cell)> {
        let mut cells: Vec<(CellRef, &Cell)> = self.iter_cells().collect();
        cells.sort_unstable_by_key(|(cell, _)| *cell);
        cells
    }

    /// Smallest range covering every stored cell, if any.
    pub fn used_range(&self) -> Option<Range> {
        let mut cells = self.cells.keys();
        let first = *cells.next()?;
        let (mut min, mut max) = (first, first);
        for cell in cells {
            min.row = min.row.min(cell.row);
            min.col = min.col.min(cell.col);
            max.row = max.row.max(cell.row);
            max.col = max.col.max(cell.col);
        }
        Some(Range::new(min, max))
    }

    pub fn merge(&mut self, range: Range) {
        if !range.is_single_cell() {
            self.merged_ranges.insert(range);
        }
    }
}

fn serialize_cells<S>(cells: &HashMap<CellRef, Cell>, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    let mut entries: Vec<(&CellRef, &Cell)> = cells.iter().collect();
    entries.sort_unstable_by_key(|(cell, _)| **cell);
    serializer.collect_seq(entries)
}

fn deserialize_cells<'de, D>(deserializer: D) -> Result<HashMap<CellRef, Cell>, D::Error>
where
    D: Deserializer<'de>,
{
    let entries = Vec::<(CellRef, Cell)>::deserialize(deserializer)?;
    Ok(entries.into_iter().collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Comment;

    #[test]
    fn equality_ignores_insertion_order() {
        let mut a = Worksheet::new("S");
        a.set_value_a1("B2", 2.0);
        a.set_value_a1("A1", "x");

        let mut b = Worksheet::new("S");
        b.set_value_a1("A1", "x");
        b.set_value_a1("B2", 2.0);

        assert_eq!(a, b);
    }

    #[test]
    fn clearing_a_plain_cell_removes_it() {
        let mut sheet = Worksheet::new("S");
        sheet.set_value_a1("A1", 1.0);
        sheet.set_value_a1("A1", CellValue::Empty);
        assert_eq!(sheet.cell_count(), 0);

        let at = CellRef::new(0, 0);
        sheet.set_cell(at, Cell::default().with_comment(Comment::new("a", "b")));
        sheet.set_value(at, CellValue::Empty);
        assert_eq!(sheet.cell_count(), 1);
    }

    #[test]
    fn sorted_cells_are_row_major() {
        let mut sheet = Worksheet::new("S");
        sheet.set_value_a1("B1", 1.0);
        sheet.set_value_a1("A2", 2.0);
        sheet.set_value_a1("A1", 3.0);
        let order: Vec<String> = sheet
            .sorted_cells()
            .into_iter()
            .map(|(c, _)| c.to_a1())
            .collect();
        assert_eq!(order, vec!["A1", "B1", "A2"]);
        assert_eq!(sheet.used_range().unwrap().to_string(), "A1:B2");
    }

    #[test]
    fn serde_roundtrip_keeps_cells() {
        let mut sheet = Worksheet::new("S");
        sheet.set_value_a1("C3", true);
        let json = serde_json::to_string(&sheet).unwrap();
        let back: Worksheet = serde_json::from_str(&json).unwrap();
        assert_eq!(back, sheet);
    }
}
