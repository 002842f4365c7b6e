use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};

use blobscope_types::SORT_TS_FIELD;

use crate::timestamp;

/// Field names tried, in order, when picking the sort column
pub const SORT_CANDIDATES: [&str; 5] = ["ts", "timestamp", "@timestamp", "time", "event_time"];

/// One stored value
#[derive(Clone, Debug, PartialEq)]
pub enum Cell {
    Json(Value),
    Time(DateTime<Utc>),
}

impl Cell {
    /// JSON form; timestamps render as RFC 3339 strings
    pub fn to_json(&self) -> Value {
        match self {
            Self::Json(value) => value.clone(),
            Self::Time(ts) => Value::String(ts.to_rfc3339()),
        }
    }

    /// Flat text form for delimited output; `None` for null
    pub fn to_text(&self) -> Option<String> {
        match self {
            Self::Json(Value::Null) => None,
            Self::Json(Value::String(s)) => Some(s.clone()),
            Self::Json(value) => Some(value.to_string()),
            Self::Time(ts) => Some(ts.to_rfc3339()),
        }
    }

    /// Instant held by this cell, coercing JSON values where possible
    pub fn as_time(&self) -> Option<DateTime<Utc>> {
        match self {
            Self::Json(value) => timestamp::coerce(value),
            Self::Time(ts) => Some(*ts),
        }
    }
}

/// Sparse column store for schema-free records
///
/// Columns are kept in first-seen order. Each row only stores the cells that
/// were present in its record; anything else reads as null.
#[derive(Clone, Debug, Default)]
pub struct LogTable {
    columns: Vec<String>,
    index: HashMap<String, usize>,
    rows: Vec<BTreeMap<usize, Cell>>,
}

impl LogTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one record, registering any new keys as columns
    pub fn push_record(&mut self, record: Map<String, Value>) {
        let mut row = BTreeMap::new();
        for (key, value) in record {
            let col = self.column_or_insert(key);
            row.insert(col, Cell::Json(value));
        }
        self.rows.push(row);
    }

    fn column_or_insert(&mut self, name: String) -> usize {
        if let Some(&col) = self.index.get(&name) {
            return col;
        }
        let col = self.columns.len();
        self.index.insert(name.clone(), col);
        self.columns.push(name);
        col
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.index.get(name).copied()
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    /// Number of rows
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Number of columns
    pub fn width(&self) -> usize {
        self.columns.len()
    }

    pub fn cell(&self, row: usize, col: usize) -> Option<&Cell> {
        self.rows.get(row).and_then(|cells| cells.get(&col))
    }

    /// Cell by column name; `None` when the column or the value is absent
    pub fn get(&self, row: usize, name: &str) -> Option<&Cell> {
        self.column_index(name).and_then(|col| self.cell(row, col))
    }

    /// Best-effort chronological sort.
    ///
    /// Uses the first of `candidates` present as a column. Values are coerced
    /// to instants; rows that do not coerce go last, ties keep merge order.
    /// The coerced key is stored in the `_sort_ts` column. Returns the column
    /// used, or `None` (and leaves the order alone) when no candidate exists.
    pub fn sort_by_time(&mut self, candidates: &[&str]) -> Option<String> {
        let name = candidates.iter().find(|c| self.has_column(c))?.to_string();
        let col = self.column_index(&name)?;

        let keys: Vec<Option<DateTime<Utc>>> = self
            .rows
            .iter()
            .map(|row| row.get(&col).and_then(Cell::as_time))
            .collect();

        let mut order: Vec<usize> = (0..self.rows.len()).collect();
        order.sort_by(|&a, &b| match (keys[a], keys[b]) {
            (Some(x), Some(y)) => x.cmp(&y),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        });

        let sort_col = self.column_or_insert(SORT_TS_FIELD.to_string());
        let mut rows = std::mem::take(&mut self.rows);
        self.rows = order
            .into_iter()
            .map(|i| {
                let mut row = std::mem::take(&mut rows[i]);
                match keys[i] {
                    Some(ts) => row.insert(sort_col, Cell::Time(ts)),
                    None => row.remove(&sort_col),
                };
                row
            })
            .collect();

        Some(name)
    }
}
