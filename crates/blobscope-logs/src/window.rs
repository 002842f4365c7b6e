use chrono::{DateTime, Utc};

use blobscope_types::{AppConfig, BLOB_MODIFIED_FIELD, FetchRange};

use crate::table::LogTable;
use crate::timestamp;

/// Record field checked first for a record's time
pub const RECORD_TIME_FIELD: &str = "timestamp";

/// Closed time interval; either side may be open
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TimeWindow {
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
}

impl TimeWindow {
    pub fn unbounded() -> Self {
        Self::default()
    }

    /// Bounds for a fetch-range policy evaluated at `now`
    pub fn from_policy(
        range: FetchRange,
        start_utc: Option<&str>,
        end_utc: Option<&str>,
        now: DateTime<Utc>,
    ) -> Self {
        match range {
            FetchRange::Unlimited => Self::unbounded(),
            FetchRange::Custom => Self {
                start: start_utc.and_then(|s| parse_bound("start_utc", s)),
                end: end_utc.and_then(|s| parse_bound("end_utc", s)),
            },
            relative => Self {
                start: relative.lookback().map(|d| now - d),
                end: Some(now),
            },
        }
    }

    pub fn is_unbounded(&self) -> bool {
        self.start.is_none() && self.end.is_none()
    }

    pub fn contains(&self, ts: DateTime<Utc>) -> bool {
        self.start.is_none_or(|start| ts >= start) && self.end.is_none_or(|end| ts <= end)
    }
}

/// Parse a custom bound: minute-precision naive text or full ISO-8601,
/// both read as UTC. Blank input is no bound; anything unparseable is
/// logged and also treated as no bound.
fn parse_bound(name: &str, raw: &str) -> Option<DateTime<Utc>> {
    if raw.trim().is_empty() {
        return None;
    }
    let parsed = timestamp::parse_iso(raw);
    if parsed.is_none() {
        tracing::warn!(bound = name, value = raw, "ignoring unparseable window bound");
    }
    parsed
}

/// Time window plus row cap applied to the served view
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct WindowFilter {
    window: TimeWindow,
    max_rows: Option<usize>,
}

impl WindowFilter {
    pub fn new(window: TimeWindow, max_rows: Option<usize>) -> Self {
        Self { window, max_rows }
    }

    pub fn from_config(cfg: &AppConfig, now: DateTime<Utc>) -> Self {
        let window = TimeWindow::from_policy(
            cfg.fetch_range,
            cfg.start_utc.as_deref(),
            cfg.end_utc.as_deref(),
            now,
        );
        Self::new(window, cfg.blob_limit())
    }

    pub fn window(&self) -> &TimeWindow {
        &self.window
    }

    /// Time of a record: `timestamp`, else the blob's last-modified time
    pub fn record_time(table: &LogTable, row: usize) -> Option<DateTime<Utc>> {
        [RECORD_TIME_FIELD, BLOB_MODIFIED_FIELD]
            .iter()
            .find_map(|field| table.get(row, field).and_then(|cell| cell.as_time()))
    }

    /// Records without a usable time are always included
    pub fn includes(&self, table: &LogTable, row: usize) -> bool {
        match Self::record_time(table, row) {
            Some(ts) => self.window.contains(ts),
            None => true,
        }
    }

    /// Row indices that pass the window, truncated to the row cap.
    ///
    /// The cap is a plain prefix in cache order, not a most-recent selection.
    pub fn apply(&self, table: &LogTable) -> Vec<usize> {
        let limit = self.max_rows.unwrap_or(usize::MAX);
        (0..table.len())
            .filter(|&row| self.window.is_unbounded() || self.includes(table, row))
            .take(limit)
            .collect()
    }
}
