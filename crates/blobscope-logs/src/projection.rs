use serde_json::{Map, Value};

use blobscope_types::{BLOB_MODIFIED_FIELD, BLOB_NAME_FIELD};

use crate::table::LogTable;

/// Columns shown first, in this order, when present
pub const PREFERRED_COLUMNS: [&str; 7] = [
    "http_host",
    "status",
    "srccountry",
    "user_name",
    "http_agent",
    BLOB_MODIFIED_FIELD,
    BLOB_NAME_FIELD,
];

/// Column cap for the served view
pub const MAX_VIEW_COLUMNS: usize = 200;

/// Column selection and ordering over a `LogTable`
#[derive(Clone, Debug, Default)]
pub struct Projection {
    columns: Vec<usize>,
    names: Vec<String>,
    preferred_present: Vec<String>,
}

impl Projection {
    /// Preferred columns first, then the rest in table order, optionally capped
    pub fn new(table: &LogTable, cap: Option<usize>) -> Self {
        let preferred: Vec<usize> = PREFERRED_COLUMNS
            .iter()
            .filter_map(|name| table.column_index(name))
            .collect();
        let rest = (0..table.width()).filter(|col| !preferred.contains(col));

        let mut columns: Vec<usize> = preferred.iter().copied().chain(rest).collect();
        if let Some(cap) = cap {
            columns.truncate(cap);
        }

        Self::from_indices(table, columns, preferred.len())
    }

    /// Layout for the served view
    pub fn for_view(table: &LogTable) -> Self {
        Self::new(table, Some(MAX_VIEW_COLUMNS))
    }

    /// Layout for downloads: every column, preferred first
    pub fn for_export(table: &LogTable) -> Self {
        Self::new(table, None)
    }

    /// Every column in table order
    pub fn natural(table: &LogTable) -> Self {
        Self::from_indices(table, (0..table.width()).collect(), 0)
    }

    fn from_indices(table: &LogTable, columns: Vec<usize>, preferred: usize) -> Self {
        let names: Vec<String> = columns
            .iter()
            .map(|&col| table.columns()[col].clone())
            .collect();
        let preferred_present = names.iter().take(preferred).cloned().collect();
        Self {
            columns,
            names,
            preferred_present,
        }
    }

    pub fn columns(&self) -> &[String] {
        &self.names
    }

    pub fn indices(&self) -> &[usize] {
        &self.columns
    }

    pub fn preferred_present(&self) -> &[String] {
        &self.preferred_present
    }

    /// One row as a JSON object with an explicit null for every absent cell
    pub fn record(&self, table: &LogTable, row: usize) -> Map<String, Value> {
        self.columns
            .iter()
            .zip(&self.names)
            .map(|(&col, name)| {
                let value = table.cell(row, col).map_or(Value::Null, |cell| cell.to_json());
                (name.clone(), value)
            })
            .collect()
    }

    pub fn records<I>(&self, table: &LogTable, rows: I) -> Vec<Map<String, Value>>
    where
        I: IntoIterator<Item = usize>,
    {
        rows.into_iter().map(|row| self.record(table, row)).collect()
    }

    /// One row as flat text fields, `None` for nulls
    pub fn text_row(&self, table: &LogTable, row: usize) -> Vec<Option<String>> {
        self.columns
            .iter()
            .map(|&col| table.cell(row, col).and_then(|cell| cell.to_text()))
            .collect()
    }
}
