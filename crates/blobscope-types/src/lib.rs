//! Shared types for blobscope
//!
//! This crate contains data structures used across multiple blobscope crates.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

// ============================================================================
// Synthetic Columns
// ============================================================================

/// Column holding the name of the blob a record was read from
pub const BLOB_NAME_FIELD: &str = "_blob_name";

/// Column holding the blob's last-modified time (ISO-8601 UTC or null)
pub const BLOB_MODIFIED_FIELD: &str = "_blob_last_modified";

/// Column holding the coerced sort key chosen during the merge
pub const SORT_TS_FIELD: &str = "_sort_ts";

// ============================================================================
// Storage Types
// ============================================================================

/// Metadata for one object in the container listing
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BlobInfo {
    pub name: String,
    pub last_modified: Option<DateTime<Utc>>,
}

impl BlobInfo {
    pub fn new(name: impl Into<String>, last_modified: Option<DateTime<Utc>>) -> Self {
        Self {
            name: name.into(),
            last_modified,
        }
    }
}

/// The account/key/container triple needed to reach a container
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageTarget {
    pub account: String,
    pub key: String,
    pub container: String,
}

impl StorageTarget {
    pub fn new(
        account: impl Into<String>,
        key: impl Into<String>,
        container: impl Into<String>,
    ) -> Self {
        Self {
            account: account.into(),
            key: key.into(),
            container: container.into(),
        }
    }

    /// Names of the fields that are empty (after trimming)
    pub fn missing_fields(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();
        if self.account.trim().is_empty() {
            missing.push("account");
        }
        if self.key.trim().is_empty() {
            missing.push("key");
        }
        if self.container.trim().is_empty() {
            missing.push("container");
        }
        missing
    }

    pub fn is_complete(&self) -> bool {
        self.missing_fields().is_empty()
    }
}

// ============================================================================
// Configuration Types
// ============================================================================

/// Named time-window policy for served records
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FetchRange {
    /// No time bound
    #[default]
    Unlimited,
    LastHour,
    LastDay,
    LastWeek,
    /// Thirty days
    LastMonth,
    /// Explicit `start_utc`/`end_utc` bounds
    Custom,
}

impl FetchRange {
    /// Look-back window for the relative ranges
    pub fn lookback(&self) -> Option<Duration> {
        match self {
            Self::LastHour => Some(Duration::hours(1)),
            Self::LastDay => Some(Duration::days(1)),
            Self::LastWeek => Some(Duration::weeks(1)),
            Self::LastMonth => Some(Duration::days(30)),
            Self::Unlimited | Self::Custom => None,
        }
    }

    /// Canonical keyword, as written to config files
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unlimited => "unlimited",
            Self::LastHour => "last_hour",
            Self::LastDay => "last_day",
            Self::LastWeek => "last_week",
            Self::LastMonth => "last_month",
            Self::Custom => "custom",
        }
    }

    /// Normalize a free-text range keyword.
    ///
    /// Input is trimmed and lowercased, and spaces or hyphens become
    /// underscores, so `"Last Hour"`, `"last-hour"` and `"last_hour"` agree.
    /// A few short aliases (`1h`, `24h`, `7d`, `30d`, `all`) are accepted too.
    pub fn from_keyword(s: &str) -> Option<Self> {
        let normalized = s.trim().to_lowercase().replace([' ', '-'], "_");
        match normalized.as_str() {
            "" | "unlimited" | "all" | "none" => Some(Self::Unlimited),
            "last_hour" | "hour" | "1h" => Some(Self::LastHour),
            "last_day" | "day" | "24h" | "1d" => Some(Self::LastDay),
            "last_week" | "week" | "7d" | "1w" => Some(Self::LastWeek),
            "last_month" | "month" | "30d" => Some(Self::LastMonth),
            "custom" => Some(Self::Custom),
            _ => None,
        }
    }
}

/// The single active configuration
///
/// Every field has a compiled-in default, so a file that omits keys still
/// deserializes (missing keys take the default value).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub account: String,
    pub key: String,
    pub container: String,
    pub fetch_range: FetchRange,
    pub start_utc: Option<String>,
    pub end_utc: Option<String>,
    /// 0 means unlimited
    pub max_blobs: usize,
    pub timezone: String,
    pub output_dir: String,
    pub port: u16,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            account: String::new(),
            key: String::new(),
            container: String::new(),
            fetch_range: FetchRange::Unlimited,
            start_utc: None,
            end_utc: None,
            max_blobs: 0,
            timezone: "UTC".to_string(),
            output_dir: "./out".to_string(),
            port: 8000,
        }
    }
}

impl AppConfig {
    pub fn target(&self) -> StorageTarget {
        StorageTarget::new(&self.account, &self.key, &self.container)
    }

    /// Blob cap, `None` when unlimited
    pub fn blob_limit(&self) -> Option<usize> {
        (self.max_blobs > 0).then_some(self.max_blobs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fetch_range_keywords() {
        assert_eq!(FetchRange::from_keyword(" Last Hour "), Some(FetchRange::LastHour));
        assert_eq!(FetchRange::from_keyword("LAST-WEEK"), Some(FetchRange::LastWeek));
        assert_eq!(FetchRange::from_keyword("30d"), Some(FetchRange::LastMonth));
        assert_eq!(FetchRange::from_keyword(""), Some(FetchRange::Unlimited));
        assert_eq!(FetchRange::from_keyword("fortnight"), None);
    }

    #[test]
    fn test_fetch_range_lookback() {
        assert_eq!(FetchRange::Unlimited.lookback(), None);
        assert_eq!(FetchRange::Custom.lookback(), None);
        assert_eq!(FetchRange::LastDay.lookback(), Some(Duration::hours(24)));
        assert_eq!(FetchRange::LastMonth.lookback(), Some(Duration::days(30)));
    }

    #[test]
    fn test_missing_fields() {
        let target = StorageTarget::new("acct", " ", "");
        assert_eq!(target.missing_fields(), vec!["key", "container"]);
        assert!(!target.is_complete());
        assert!(StorageTarget::new("a", "b", "c").is_complete());
    }

    #[test]
    fn test_config_defaults_fill_missing_keys() {
        let cfg: AppConfig = serde_json::from_str(r#"{"account":"acct","max_blobs":3}"#).unwrap();
        assert_eq!(cfg.account, "acct");
        assert_eq!(cfg.max_blobs, 3);
        assert_eq!(cfg.port, 8000);
        assert_eq!(cfg.fetch_range, FetchRange::Unlimited);
        assert_eq!(cfg.blob_limit(), Some(3));
    }
}
