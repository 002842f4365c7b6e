use serde_json::{Map, Value};

use blobscope_types::{BLOB_MODIFIED_FIELD, BLOB_NAME_FIELD, BlobInfo};

/// Outcome of parsing one line
#[derive(Debug, PartialEq)]
pub enum ParsedLine {
    /// Empty or whitespace-only
    Blank,
    Record(Map<String, Value>),
    /// Not a JSON object; dropped
    Discarded,
}

/// Records parsed from one blob
#[derive(Debug, Default)]
pub struct ParsedBlob {
    pub records: Vec<Map<String, Value>>,
    pub discarded: usize,
}

/// Tolerant NDJSON parser
pub struct LogParser;

impl LogParser {
    /// Parse one line.
    ///
    /// The line is trimmed and a single trailing comma (left over from
    /// array-style dumps) is dropped before decoding.
    pub fn parse_line(line: &str) -> ParsedLine {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            return ParsedLine::Blank;
        }
        let trimmed = trimmed.strip_suffix(',').unwrap_or(trimmed);

        match serde_json::from_str::<Value>(trimmed) {
            Ok(Value::Object(record)) => ParsedLine::Record(record),
            _ => ParsedLine::Discarded,
        }
    }

    /// Parse a whole blob and tag each record with its source
    pub fn parse_blob(content: &[u8], blob: &BlobInfo) -> ParsedBlob {
        let text = String::from_utf8_lossy(content);
        let modified = blob
            .last_modified
            .map(|ts| Value::String(ts.to_rfc3339()))
            .unwrap_or(Value::Null);

        let mut parsed = ParsedBlob::default();
        for line in text.lines() {
            match Self::parse_line(line) {
                ParsedLine::Blank => {}
                ParsedLine::Discarded => parsed.discarded += 1,
                ParsedLine::Record(mut record) => {
                    record.insert(BLOB_NAME_FIELD.to_string(), Value::String(blob.name.clone()));
                    record.insert(BLOB_MODIFIED_FIELD.to_string(), modified.clone());
                    parsed.records.push(record);
                }
            }
        }

        if parsed.discarded > 0 {
            tracing::debug!(
                blob = %blob.name,
                discarded = parsed.discarded,
                "skipped malformed lines"
            );
        }
        parsed
    }
}
