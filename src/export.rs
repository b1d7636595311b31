//! Export: the reviewed menu as `menu_items.json` and `menu_items.csv`.
//!
//! [`MenuDocument`] keeps two views of one extraction: the original items and
//! the editable table. The JSON export always serialises the original items;
//! the CSV export serialises the table including any edits. Edits never flow
//! back into the items.

use crate::error::MenuError;
use crate::menu::MenuItem;
use crate::table::MenuTable;
use csv::WriterBuilder;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::info;

pub const JSON_FILE_NAME: &str = "menu_items.json";
pub const CSV_FILE_NAME: &str = "menu_items.csv";
pub const JSON_MIME: &str = "application/json";
pub const CSV_MIME: &str = "text/csv";

/// Extracted items plus their editable flattened table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MenuDocument {
    items: Vec<MenuItem>,
    table: MenuTable,
}

impl MenuDocument {
    pub fn new(items: Vec<MenuItem>) -> Self {
        let table = MenuTable::flatten(&items);
        Self { items, table }
    }

    /// Items exactly as extracted.
    pub fn items(&self) -> &[MenuItem] {
        &self.items
    }

    pub fn table(&self) -> &MenuTable {
        &self.table
    }

    pub fn table_mut(&mut self) -> &mut MenuTable {
        &mut self.table
    }

    /// Pretty-printed JSON of the original, unedited items.
    pub fn to_json(&self) -> Result<String, MenuError> {
        items_to_json(&self.items)
    }

    /// CSV of the (possibly edited) table.
    pub fn to_csv(&self) -> Result<String, MenuError> {
        table_to_csv(&self.table)
    }

    /// Write both exports into `dir`, returning the JSON and CSV paths.
    pub async fn write_to_dir(&self, dir: &Path) -> Result<(PathBuf, PathBuf), MenuError> {
        tokio::fs::create_dir_all(dir)
            .await
            .map_err(|e| MenuError::OutputWriteFailed {
                path: dir.to_path_buf(),
                source: e,
            })?;

        let json_path = dir.join(JSON_FILE_NAME);
        let csv_path = dir.join(CSV_FILE_NAME);
        write_atomic(&json_path, self.to_json()?.as_bytes()).await?;
        write_atomic(&csv_path, self.to_csv()?.as_bytes()).await?;
        info!(
            "Exported {} items to {} and {}",
            self.items.len(),
            json_path.display(),
            csv_path.display()
        );
        Ok((json_path, csv_path))
    }
}

/// Serialise items as a 2-space-indented JSON array.
pub fn items_to_json(items: &[MenuItem]) -> Result<String, MenuError> {
    Ok(serde_json::to_string_pretty(items)?)
}

/// Serialise a table as CSV: header row, then one record per row, no index column.
pub fn table_to_csv(table: &MenuTable) -> Result<String, MenuError> {
    let mut writer = WriterBuilder::new().from_writer(Vec::<u8>::new());
    writer.write_record(table.columns())?;
    for row in table.rows() {
        writer.write_record(row)?;
    }
    writer.flush().map_err(csv::Error::from)?;

    let bytes = writer
        .into_inner()
        .map_err(|e| MenuError::Csv(e.into_error().into()))?;
    String::from_utf8(bytes).map_err(|e| MenuError::Internal(format!("CSV is not UTF-8: {e}")))
}

/// Write to a sibling temp file, then rename, so readers never see a partial file.
async fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), MenuError> {
    let to_err = |e| MenuError::OutputWriteFailed {
        path: path.to_path_buf(),
        source: e,
    };
    let mut tmp_path = path.as_os_str().to_owned();
    tmp_path.push(".tmp");
    let tmp_path = PathBuf::from(tmp_path);
    tokio::fs::write(&tmp_path, bytes).await.map_err(to_err)?;
    tokio::fs::rename(&tmp_path, path).await.map_err(to_err)
}
