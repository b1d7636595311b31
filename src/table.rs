//! Normalisation: nested menu items → one flat, editable row per item.
//!
//! Each item becomes `Name`, `Description`, `Labels` (joined with `", "`) plus
//! one `Price (<label>)` cell per (price, label) pair. Different items carry
//! different labels, so the column set is the union across all rows, in order
//! of first appearance. Cells a row has no value for are empty strings.

use crate::error::MenuError;
use crate::menu::MenuItem;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

pub const NAME_COLUMN: &str = "Name";
pub const DESCRIPTION_COLUMN: &str = "Description";
pub const LABELS_COLUMN: &str = "Labels";

/// Column header for a price with the given label, e.g. `Price (Full)`.
pub fn price_column(label: &str) -> String {
    format!("Price ({label})")
}

/// A rectangular table of strings with a named header.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MenuTable {
    columns: Vec<String>,
    rows: Vec<Vec<String>>,
}

impl MenuTable {
    /// Flatten items into a table.
    ///
    /// Prices pair with labels up to the shorter of the two lists. A label
    /// repeated within one item keeps its first column position and the last
    /// price.
    pub fn flatten(items: &[MenuItem]) -> Self {
        let mut columns: Vec<String> = [NAME_COLUMN, DESCRIPTION_COLUMN, LABELS_COLUMN]
            .iter()
            .map(|c| c.to_string())
            .collect();
        let mut positions: HashMap<String, usize> = columns
            .iter()
            .enumerate()
            .map(|(i, c)| (c.clone(), i))
            .collect();

        let sparse: Vec<Vec<(usize, String)>> = items
            .iter()
            .map(|item| {
                let mut cells = vec![
                    (0, item.name.clone()),
                    (1, item.description.clone()),
                    (2, item.labels.join(", ")),
                ];
                for (price, label) in item.price_pairs() {
                    let header = price_column(label);
                    let col = match positions.get(&header) {
                        Some(&col) => col,
                        None => {
                            columns.push(header.clone());
                            positions.insert(header, columns.len() - 1);
                            columns.len() - 1
                        }
                    };
                    match cells.iter_mut().find(|(c, _)| *c == col) {
                        Some(cell) => cell.1 = price.to_string(),
                        None => cells.push((col, price.to_string())),
                    }
                }
                cells
            })
            .collect();

        let width = columns.len();
        let rows = sparse
            .into_iter()
            .map(|cells| {
                let mut row = vec![String::new(); width];
                for (col, value) in cells {
                    row[col] = value;
                }
                row
            })
            .collect();

        Self { columns, rows }
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn rows(&self) -> &[Vec<String>] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Headers of the `Price (…)` columns, in table order.
    pub fn price_columns(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().skip(3).map(String::as_str)
    }

    pub fn column_index(&self, column: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == column)
    }

    /// Cell at a 0-based row and a column header.
    pub fn cell(&self, row: usize, column: &str) -> Option<&str> {
        let col = self.column_index(column)?;
        self.rows.get(row).map(|r| r[col].as_str())
    }

    /// Overwrite one cell. No validation beyond the address.
    pub fn set_cell(
        &mut self,
        row: usize,
        column: &str,
        value: impl Into<String>,
    ) -> Result<(), MenuError> {
        let out_of_range = || MenuError::CellOutOfRange {
            row,
            column: column.to_string(),
        };
        let col = self.column_index(column).ok_or_else(out_of_range)?;
        let cells = self.rows.get_mut(row).ok_or_else(out_of_range)?;
        cells[col] = value.into();
        Ok(())
    }

    /// Overwrite one cell addressed by position.
    pub fn set_cell_at(
        &mut self,
        row: usize,
        col: usize,
        value: impl Into<String>,
    ) -> Result<(), MenuError> {
        let column = self.columns.get(col).cloned().unwrap_or_else(|| col.to_string());
        match self.rows.get_mut(row).and_then(|r| r.get_mut(col)) {
            Some(cell) => {
                *cell = value.into();
                Ok(())
            }
            None => Err(MenuError::CellOutOfRange { row, column }),
        }
    }

    /// Apply several positional edits, or none of them if any address is
    /// outside the table.
    pub fn set_cells_at<I, V>(&mut self, edits: I) -> Result<(), MenuError>
    where
        I: IntoIterator<Item = (usize, usize, V)>,
        V: Into<String>,
    {
        let edits: Vec<(usize, usize, V)> = edits.into_iter().collect();
        let width = self.columns.len();
        if let Some(&(row, col, _)) = edits
            .iter()
            .find(|(row, col, _)| *row >= self.rows.len() || *col >= width)
        {
            return Err(MenuError::CellOutOfRange {
                row,
                column: self.columns.get(col).cloned().unwrap_or_else(|| col.to_string()),
            });
        }
        for (row, col, value) in edits {
            self.rows[row][col] = value.into();
        }
        Ok(())
    }
}

/// A parsed `ROW:COLUMN=VALUE` cell edit (row is 1-based, as displayed).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CellEdit {
    pub row: usize,
    pub column: String,
    pub value: String,
}

impl CellEdit {
    /// Parse `3:Price (Full)=120`.
    pub fn parse(s: &str) -> Result<Self, MenuError> {
        let invalid = || {
            MenuError::InvalidConfig(format!(
                "invalid edit '{s}', expected ROW:COLUMN=VALUE (e.g. 2:Name=Masala Dosa)"
            ))
        };
        let (row, rest) = s.split_once(':').ok_or_else(invalid)?;
        let (column, value) = rest.split_once('=').ok_or_else(invalid)?;
        let row: usize = row.trim().parse().map_err(|_| invalid())?;
        if row == 0 || column.trim().is_empty() {
            return Err(invalid());
        }
        Ok(Self {
            row,
            column: column.trim().to_string(),
            value: value.to_string(),
        })
    }

    pub fn apply(&self, table: &mut MenuTable) -> Result<(), MenuError> {
        table.set_cell(self.row - 1, &self.column, self.value.clone())
    }
}
