//! Timestamp coercion for loosely typed log fields

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde_json::Value;

/// Epoch values above this are already milliseconds
const EPOCH_MILLIS_THRESHOLD: f64 = 1e12;

/// Numeric strings shorter than this are not treated as epochs
const MIN_EPOCH_DIGITS: usize = 9;

/// Naive layouts tried after RFC 3339, all interpreted as UTC
const NAIVE_FORMATS: [&str; 4] = [
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M",
];

/// Convert an epoch number to an instant.
///
/// Values greater than 10^12 are taken as milliseconds; anything else is
/// seconds.
pub fn from_epoch(value: f64) -> Option<DateTime<Utc>> {
    if !value.is_finite() {
        return None;
    }
    let millis = if value > EPOCH_MILLIS_THRESHOLD {
        value
    } else {
        value * 1000.0
    };
    DateTime::from_timestamp_millis(millis.round() as i64)
}

/// Parse an ISO-8601 style date or date-time, treating naive values as UTC
pub fn parse_iso(s: &str) -> Option<DateTime<Utc>> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }

    if let Ok(ts) = DateTime::parse_from_rfc3339(s) {
        return Some(ts.with_timezone(&Utc));
    }
    if let Ok(ts) = DateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f%z") {
        return Some(ts.with_timezone(&Utc));
    }
    for format in NAIVE_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, format) {
            return Some(naive.and_utc());
        }
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

/// Coerce a JSON value to an instant: numbers and numeric strings as epochs,
/// other strings as ISO-8601. Everything else yields `None`.
pub fn coerce(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::Number(n) => n.as_f64().and_then(from_epoch),
        Value::String(s) => match epoch_digits(s.trim()) {
            Some(n) => from_epoch(n),
            None => parse_iso(s),
        },
        _ => None,
    }
}

/// A plain `digits[.digits]` string with at least `MIN_EPOCH_DIGITS`
/// integer digits
fn epoch_digits(s: &str) -> Option<f64> {
    let (int, frac) = s.split_once('.').unwrap_or((s, ""));
    let digits = |part: &str| part.bytes().all(|b| b.is_ascii_digit());
    if int.len() < MIN_EPOCH_DIGITS || !digits(int) || !digits(frac) {
        return None;
    }
    s.parse().ok()
}
