//! Legacy `KEY=value` environment files
//!
//! Older deployments kept their settings in a dotenv-style file. It is read
//! exactly once, when no active configuration exists yet.

use std::collections::HashMap;
use std::sync::LazyLock;

use regex::Regex;

use blobscope_types::{AppConfig, FetchRange};

static LINE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*(?:export\s+)?([A-Za-z_][A-Za-z0-9_]*)\s*=\s*(.*?)\s*$")
        .expect("legacy env line pattern is valid")
});

/// Parse dotenv-style content into a key/value map.
///
/// Blank lines and `#` comments are skipped, an `export ` prefix is allowed,
/// and one pair of matching surrounding quotes is removed from values.
/// Later assignments win.
pub fn parse_legacy_env(content: &str) -> HashMap<String, String> {
    let mut vars = HashMap::new();

    for line in content.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        let Some(caps) = LINE_RE.captures(line) else {
            tracing::debug!(line = trimmed, "skipping unrecognized legacy env line");
            continue;
        };
        vars.insert(caps[1].to_string(), unquote(&caps[2]).to_string());
    }

    vars
}

fn unquote(value: &str) -> &str {
    for quote in ['"', '\''] {
        if value.len() >= 2 && value.starts_with(quote) && value.ends_with(quote) {
            return &value[1..value.len() - 1];
        }
    }
    value
}

/// Build a configuration from legacy variables, falling back to defaults
pub fn config_from_legacy(vars: &HashMap<String, String>) -> AppConfig {
    let defaults = AppConfig::default();
    let get = |name: &str| vars.get(name).map(|v| v.trim()).filter(|v| !v.is_empty());

    let fetch_range = match get("FETCH_RANGE") {
        Some(raw) => FetchRange::from_keyword(raw).unwrap_or_else(|| {
            tracing::warn!(value = raw, "unknown FETCH_RANGE, using unlimited");
            FetchRange::Unlimited
        }),
        None => defaults.fetch_range,
    };

    AppConfig {
        account: get("AZURE_STORAGE_ACCOUNT").unwrap_or_default().to_string(),
        key: get("AZURE_STORAGE_KEY").unwrap_or_default().to_string(),
        container: get("AZURE_CONTAINER").unwrap_or_default().to_string(),
        fetch_range,
        start_utc: get("START_UTC").map(str::to_string),
        end_utc: get("END_UTC").map(str::to_string),
        max_blobs: parse_or(get("MAX_BLOBS"), "MAX_BLOBS", defaults.max_blobs),
        timezone: get("TIMEZONE")
            .or_else(|| get("TZ"))
            .map(str::to_string)
            .unwrap_or(defaults.timezone),
        output_dir: get("OUTPUT_DIR")
            .map(str::to_string)
            .unwrap_or(defaults.output_dir),
        port: parse_or(get("PORT"), "PORT", defaults.port),
    }
}

fn parse_or<T: std::str::FromStr>(raw: Option<&str>, name: &str, default: T) -> T {
    match raw {
        Some(raw) => raw.parse().unwrap_or_else(|_| {
            tracing::warn!(name, value = raw, "ignoring unparseable legacy value");
            default
        }),
        None => default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_legacy_env() {
        let content = r#"
# storage
AZURE_STORAGE_ACCOUNT=acct
export AZURE_STORAGE_KEY="c2VjcmV0"
AZURE_CONTAINER = 'logs'
not a line
MAX_BLOBS=5
"#;
        let vars = parse_legacy_env(content);
        assert_eq!(vars.get("AZURE_STORAGE_ACCOUNT").unwrap(), "acct");
        assert_eq!(vars.get("AZURE_STORAGE_KEY").unwrap(), "c2VjcmV0");
        assert_eq!(vars.get("AZURE_CONTAINER").unwrap(), "logs");
        assert_eq!(vars.len(), 4);
    }

    #[test]
    fn test_config_from_legacy() {
        let vars = parse_legacy_env(
            "AZURE_STORAGE_ACCOUNT=acct\nAZURE_STORAGE_KEY=k\nAZURE_CONTAINER=logs\n\
             FETCH_RANGE=  Last Day \nMAX_BLOBS=12\nPORT=9001\nOUTPUT_DIR=/tmp/out\n",
        );
        let cfg = config_from_legacy(&vars);
        assert_eq!(cfg.account, "acct");
        assert_eq!(cfg.fetch_range, FetchRange::LastDay);
        assert_eq!(cfg.max_blobs, 12);
        assert_eq!(cfg.port, 9001);
        assert_eq!(cfg.output_dir, "/tmp/out");
        assert_eq!(cfg.timezone, "UTC");
        assert_eq!(cfg.start_utc, None);
    }

    #[test]
    fn test_bad_legacy_values_fall_back() {
        let vars = parse_legacy_env("FETCH_RANGE=sometimes\nMAX_BLOBS=lots\nPORT=-1\n");
        let cfg = config_from_legacy(&vars);
        assert_eq!(cfg.fetch_range, FetchRange::Unlimited);
        assert_eq!(cfg.max_blobs, 0);
        assert_eq!(cfg.port, 8000);
    }
}
