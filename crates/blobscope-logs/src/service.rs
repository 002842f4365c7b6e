//! Operations exposed to the route layer
//!
//! `LogService` ties the config store, the cache and the window/projection
//! steps together. Every config mutation invalidates the cache.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use blobscope_config::{ConfigError, ConfigStore};
use blobscope_storage::StoreConnector;
use blobscope_types::{AppConfig, FetchRange, StorageTarget};

use crate::cache::{CacheManager, CacheSnapshot};
use crate::error::{ExportError, IngestError};
use crate::ingest::IngestEngine;
use crate::projection::Projection;
use crate::snapshot;
use crate::window::WindowFilter;

/// Partial configuration update; `None` fields keep their current value
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct ConfigUpdate {
    pub account: Option<String>,
    /// Only applied when non-empty
    pub key: Option<String>,
    pub container: Option<String>,
    pub fetch_range: Option<FetchRange>,
    /// An empty string clears the bound
    pub start_utc: Option<String>,
    pub end_utc: Option<String>,
    pub max_blobs: Option<usize>,
    pub timezone: Option<String>,
    pub output_dir: Option<String>,
    pub port: Option<u16>,
}

impl ConfigUpdate {
    pub fn apply_to(self, cfg: &mut AppConfig) {
        if let Some(account) = self.account {
            cfg.account = account.trim().to_string();
        }
        if let Some(key) = self.key.filter(|k| !k.trim().is_empty()) {
            cfg.key = key.trim().to_string();
        }
        if let Some(container) = self.container {
            cfg.container = container.trim().to_string();
        }
        if let Some(range) = self.fetch_range {
            cfg.fetch_range = range;
        }
        if let Some(start) = self.start_utc {
            cfg.start_utc = non_empty(start);
        }
        if let Some(end) = self.end_utc {
            cfg.end_utc = non_empty(end);
        }
        if let Some(max_blobs) = self.max_blobs {
            cfg.max_blobs = max_blobs;
        }
        if let Some(timezone) = self.timezone.and_then(non_empty) {
            cfg.timezone = timezone;
        }
        if let Some(output_dir) = self.output_dir.and_then(non_empty) {
            cfg.output_dir = output_dir;
        }
        if let Some(port) = self.port {
            cfg.port = port;
        }
    }
}

fn non_empty(s: String) -> Option<String> {
    let trimmed = s.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

/// Verdict of a connectivity test
#[derive(Clone, Debug, Serialize)]
pub struct ConnectionCheck {
    pub ok: bool,
    pub message: String,
}

/// Extra detail for the data view
#[derive(Clone, Debug, Serialize)]
pub struct DataDiagnostics {
    pub table_shape: [usize; 2],
    pub returned_rows: usize,
    pub returned_cols: usize,
    pub preferred_present: Vec<String>,
    pub all_columns_count: usize,
    pub blobs_listed: usize,
    pub blobs_ingested: usize,
    pub discarded_lines: usize,
    pub sort_column: Option<String>,
    pub window_start: Option<String>,
    pub window_end: Option<String>,
}

/// Filtered, projected records plus load metadata
#[derive(Clone, Debug, Serialize)]
pub struct DataView {
    pub records: Vec<Map<String, Value>>,
    pub columns: Vec<String>,
    /// Rows in the whole cache, before windowing
    pub total: usize,
    pub last_load_utc: String,
    pub last_load_human: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub debug: Option<DataDiagnostics>,
}

impl DataView {
    fn failed(error: &IngestError) -> Self {
        Self {
            records: Vec::new(),
            columns: Vec::new(),
            total: 0,
            last_load_utc: iso_or_na(None),
            last_load_human: humanize_utc(None),
            error: Some(error.to_string()),
            debug: None,
        }
    }
}

/// Outcome of an explicit reload
#[derive(Clone, Debug, Serialize)]
pub struct ReloadSummary {
    pub ok: bool,
    pub rows: usize,
    pub last_load_utc: String,
}

/// Format a load time like `Sep 20, 2025 03:35:58 UTC`, or `-` when unset
pub fn humanize_utc(ts: Option<DateTime<Utc>>) -> String {
    ts.map(|ts| ts.format("%b %d, %Y %H:%M:%S UTC").to_string())
        .unwrap_or_else(|| "-".to_string())
}

fn iso_or_na(ts: Option<DateTime<Utc>>) -> String {
    ts.map(|ts| ts.to_rfc3339())
        .unwrap_or_else(|| "n/a".to_string())
}

pub struct LogService {
    config: Arc<ConfigStore>,
    connector: Arc<dyn StoreConnector>,
    cache: CacheManager,
}

impl LogService {
    pub fn with_engine(
        config: Arc<ConfigStore>,
        connector: Arc<dyn StoreConnector>,
        engine: IngestEngine,
    ) -> Self {
        let cache = CacheManager::new(engine, config.clone());
        Self {
            config,
            connector,
            cache,
        }
    }

    pub fn cache(&self) -> &CacheManager {
        &self.cache
    }

    pub fn config(&self) -> AppConfig {
        self.config.read()
    }

    pub fn needs_setup(&self) -> bool {
        self.config.needs_setup()
    }

    /// Merge `update` over the active config, persist it and drop the cache
    pub fn update_config(&self, update: ConfigUpdate) -> Result<AppConfig, ConfigError> {
        let cfg = self.config.update(|cfg| update.apply_to(cfg))?;
        self.cache.invalidate();
        tracing::info!(
            container = %cfg.container,
            fetch_range = cfg.fetch_range.as_str(),
            max_blobs = cfg.max_blobs,
            "configuration updated"
        );
        Ok(cfg)
    }

    pub fn restore_default(&self) -> Result<AppConfig, ConfigError> {
        let cfg = self.config.restore_default()?;
        self.cache.invalidate();
        Ok(cfg)
    }

    /// List the container without touching the cache or the stored config.
    ///
    /// Empty fields of `target` fall back to the active configuration, so a
    /// form that leaves the key blank tests against the saved key.
    pub async fn test_connection(&self, target: Option<StorageTarget>) -> ConnectionCheck {
        let active = self.config.read().target();
        let target = match target {
            Some(t) => StorageTarget::new(
                pick(t.account, active.account),
                pick(t.key, active.key),
                pick(t.container, active.container),
            ),
            None => active,
        };

        let missing = target.missing_fields();
        if !missing.is_empty() {
            return ConnectionCheck {
                ok: false,
                message: format!("Missing storage settings: {}", missing.join(", ")),
            };
        }

        let result = match self.connector.connect(&target) {
            Ok(store) => store.list().await,
            Err(e) => Err(e),
        };
        match result {
            Ok(blobs) => ConnectionCheck {
                ok: true,
                message: format!(
                    "Connected to container '{}': {} blob(s) found",
                    target.container,
                    blobs.len()
                ),
            },
            Err(e) => {
                tracing::warn!(container = %target.container, error = %e, "connection test failed");
                ConnectionCheck {
                    ok: false,
                    message: format!("Connection failed: {e}"),
                }
            }
        }
    }

    /// Load on first access and log failures; used for startup warm-up
    pub async fn warm_up(&self) {
        match self.cache.ensure_loaded().await {
            Ok(snapshot) => tracing::info!(rows = snapshot.table.len(), "initial load complete"),
            Err(e) => tracing::warn!(error = %e, "initial load failed, deferring to first request"),
        }
    }

    /// Windowed, projected view of the cache
    pub async fn data_view(&self, debug: bool) -> DataView {
        let snapshot = match self.cache.ensure_loaded().await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                tracing::warn!(error = %e, "data view unavailable");
                return DataView::failed(&e);
            }
        };
        self.render_view(&snapshot, &self.config.read(), Utc::now(), debug)
    }

    fn render_view(
        &self,
        snapshot: &CacheSnapshot,
        cfg: &AppConfig,
        now: DateTime<Utc>,
        debug: bool,
    ) -> DataView {
        let table = &snapshot.table;
        let filter = WindowFilter::from_config(cfg, now);
        let rows = filter.apply(table);
        let projection = Projection::for_view(table);
        let records = projection.records(table, rows.iter().copied());

        let debug = debug.then(|| {
            tracing::debug!(rows = records.len(), cols = projection.columns().len(), "data view");
            DataDiagnostics {
                table_shape: [table.len(), table.width()],
                returned_rows: records.len(),
                returned_cols: projection.columns().len(),
                preferred_present: projection.preferred_present().to_vec(),
                all_columns_count: table.width(),
                blobs_listed: snapshot.report.blobs_listed,
                blobs_ingested: snapshot.report.blobs_ingested,
                discarded_lines: snapshot.report.discarded_lines,
                sort_column: snapshot.report.sort_column.clone(),
                window_start: filter.window().start.map(|t| t.to_rfc3339()),
                window_end: filter.window().end.map(|t| t.to_rfc3339()),
            }
        });

        DataView {
            records,
            columns: projection.columns().to_vec(),
            total: table.len(),
            last_load_utc: iso_or_na(Some(snapshot.loaded_at)),
            last_load_human: humanize_utc(Some(snapshot.loaded_at)),
            error: None,
            debug,
        }
    }

    /// Unconditional full re-fetch
    pub async fn reload(&self) -> Result<ReloadSummary, IngestError> {
        tracing::info!("reload requested");
        let snapshot = self.cache.force_reload().await?;
        tracing::info!(rows = snapshot.table.len(), "reload complete");
        Ok(ReloadSummary {
            ok: true,
            rows: snapshot.table.len(),
            last_load_utc: snapshot.loaded_at.to_rfc3339(),
        })
    }

    /// Entire cache as CSV, preferred columns first
    pub async fn export_csv(&self) -> Result<String, ExportError> {
        let snapshot = self.cache.ensure_loaded().await?;
        let table = &snapshot.table;
        Ok(snapshot::render_csv(table, &Projection::for_export(table), 0..table.len())?)
    }

    /// Entire cache as a JSON array of records, preferred columns first
    pub async fn export_json(&self) -> Result<String, ExportError> {
        let snapshot = self.cache.ensure_loaded().await?;
        let table = &snapshot.table;
        let records = Projection::for_export(table).records(table, 0..table.len());
        Ok(serde_json::to_string(&records)?)
    }
}

fn pick(value: String, fallback: String) -> String {
    if value.trim().is_empty() {
        fallback
    } else {
        value.trim().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::CacheState;
    use blobscope_storage::{BlobInfo, MemoryConnector, MemoryStore};
    use chrono::TimeZone;
    use serde_json::json;

    struct Fixture {
        _dir: tempfile::TempDir,
        service: LogService,
        connector: MemoryConnector,
    }

    fn fixture(configured: bool) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(ConfigStore::new(dir.path()));
        if configured {
            store
                .write(&AppConfig {
                    account: "acct".to_string(),
                    key: "a2V5".to_string(),
                    container: "logs".to_string(),
                    ..AppConfig::default()
                })
                .unwrap();
        }

        let connector = MemoryConnector::new(Arc::new(MemoryStore::new()));
        let engine = IngestEngine::new(Arc::new(connector.clone())).with_snapshots(false);
        let service = LogService::with_engine(store, Arc::new(connector.clone()), engine);
        Fixture {
            _dir: dir,
            service,
            connector,
        }
    }

    fn add_blob(fx: &Fixture, name: &str, lines: &[Value]) {
        let content: Vec<String> = lines.iter().map(|v| v.to_string()).collect();
        fx.connector
            .store()
            .insert(BlobInfo::new(name, None), content.join("\n"));
    }

    #[tokio::test]
    async fn test_empty_container_view() {
        let fx = fixture(true);
        let view = fx.service.data_view(false).await;

        assert!(view.records.is_empty());
        assert!(view.columns.is_empty());
        assert_eq!(view.total, 0);
        assert!(view.error.is_none());
        assert_ne!(view.last_load_utc, "n/a");
        assert_eq!(fx.service.cache().state(), CacheState::Loaded);
    }

    #[tokio::test]
    async fn test_unconfigured_view_reports_error() {
        let fx = fixture(false);
        assert!(fx.service.needs_setup());

        let view = fx.service.data_view(false).await;
        assert!(view.records.is_empty());
        assert_eq!(view.last_load_utc, "n/a");
        assert_eq!(view.last_load_human, "-");
        assert!(view.error.unwrap().contains("key"));
        assert_eq!(fx.connector.connects(), 0);
        assert_eq!(fx.service.cache().state(), CacheState::Empty);
    }

    #[tokio::test]
    async fn test_view_windows_caps_and_projects() {
        let fx = fixture(true);
        let now = Utc::now().timestamp();
        add_blob(
            &fx,
            "a.log",
            &[
                json!({"timestamp": now - 60, "status": 200, "http_host": "a"}),
                json!({"timestamp": now - 7200, "status": 500}),
                json!({"timestamp": "???", "status": 404}),
                json!({"timestamp": now - 30, "status": 201}),
            ],
        );
        fx.service
            .update_config(ConfigUpdate {
                fetch_range: Some(FetchRange::LastHour),
                max_blobs: Some(2),
                ..ConfigUpdate::default()
            })
            .unwrap();

        let view = fx.service.data_view(true).await;
        assert_eq!(view.total, 4);
        assert_eq!(view.columns[..2], ["http_host", "status"]);

        let statuses: Vec<_> = view.records.iter().map(|r| r["status"].clone()).collect();
        assert_eq!(statuses, vec![json!(200), json!(201)]);
        assert_eq!(view.records[1]["http_host"], Value::Null);

        let debug = view.debug.unwrap();
        assert_eq!(debug.table_shape[0], 4);
        assert_eq!(debug.returned_rows, 2);
        assert_eq!(debug.sort_column.as_deref(), Some("timestamp"));
    }

    #[test]
    fn test_concurrent_updates_keep_both_fields() {
        let fx = fixture(true);
        std::thread::scope(|s| {
            s.spawn(|| {
                fx.service
                    .update_config(ConfigUpdate {
                        account: Some("other-acct".to_string()),
                        ..ConfigUpdate::default()
                    })
                    .unwrap()
            });
            s.spawn(|| {
                fx.service
                    .update_config(ConfigUpdate {
                        container: Some("other-logs".to_string()),
                        ..ConfigUpdate::default()
                    })
                    .unwrap()
            });
        });

        let cfg = fx.service.config();
        assert_eq!(cfg.account, "other-acct");
        assert_eq!(cfg.container, "other-logs");
        assert_eq!(cfg.key, "a2V5");
    }

    #[tokio::test]
    async fn test_config_write_invalidates_cache() {
        let fx = fixture(true);
        add_blob(&fx, "a.log", &[json!({"x": 1})]);
        fx.service.data_view(false).await;
        assert_eq!(fx.service.cache().state(), CacheState::Loaded);

        let cfg = fx
            .service
            .update_config(ConfigUpdate {
                container: Some("other".to_string()),
                key: Some(String::new()),
                ..ConfigUpdate::default()
            })
            .unwrap();
        assert_eq!(cfg.key, "a2V5");
        assert_eq!(fx.service.cache().state(), CacheState::Empty);

        fx.service.data_view(false).await;
        assert_eq!(fx.service.cache().load_count(), 2);
        assert_eq!(fx.connector.last_target().unwrap().container, "other");
    }

    #[tokio::test]
    async fn test_restore_default_invalidates_cache() {
        let fx = fixture(true);
        fx.service.data_view(false).await;
        fx.service.restore_default().unwrap();
        assert_eq!(fx.service.cache().state(), CacheState::Empty);
        assert_eq!(fx.service.config(), AppConfig::default());
    }

    #[tokio::test]
    async fn test_reload_counts_rows() {
        let fx = fixture(true);
        add_blob(&fx, "a.log", &[json!({"x": 1})]);
        assert_eq!(fx.service.reload().await.unwrap().rows, 1);

        add_blob(&fx, "b.log", &[json!({"x": 2}), json!({"x": 3})]);
        let summary = fx.service.reload().await.unwrap();
        assert!(summary.ok);
        assert_eq!(summary.rows, 3);
        assert_eq!(fx.service.cache().load_count(), 2);
    }

    #[tokio::test]
    async fn test_exports_ignore_window() {
        let fx = fixture(true);
        add_blob(
            &fx,
            "a.log",
            &[json!({"status": 200, "msg": "a"}), json!({"status": 404, "msg": "b"})],
        );
        fx.service
            .update_config(ConfigUpdate {
                max_blobs: Some(1),
                ..ConfigUpdate::default()
            })
            .unwrap();

        let csv = fx.service.export_csv().await.unwrap();
        let mut lines = csv.lines();
        assert_eq!(
            lines.next(),
            Some("status,_blob_last_modified,_blob_name,msg")
        );
        assert_eq!(lines.count(), 2);

        let json: Vec<Value> = serde_json::from_str(&fx.service.export_json().await.unwrap()).unwrap();
        assert_eq!(json.len(), 2);
        assert_eq!(json[0]["_blob_last_modified"], Value::Null);
    }

    #[tokio::test]
    async fn test_connection_check() {
        let fx = fixture(false);
        let check = fx.service.test_connection(None).await;
        assert!(!check.ok);
        assert!(check.message.contains("account"));

        let check = fx
            .service
            .test_connection(Some(StorageTarget::new("acct", "a2V5", "logs")))
            .await;
        assert!(check.ok, "{}", check.message);
        assert!(fx.service.needs_setup());
        assert_eq!(fx.service.cache().state(), CacheState::Empty);

        fx.connector.store().set_failure(Some("AuthorizationFailure"));
        let check = fx
            .service
            .test_connection(Some(StorageTarget::new("acct", "a2V5", "logs")))
            .await;
        assert!(!check.ok);
        assert!(check.message.contains("AuthorizationFailure"));
    }

    #[test]
    fn test_humanize_utc() {
        let ts = Utc.with_ymd_and_hms(2025, 9, 20, 3, 35, 58).unwrap();
        assert_eq!(humanize_utc(Some(ts)), "Sep 20, 2025 03:35:58 UTC");
        assert_eq!(humanize_utc(None), "-");
    }

    #[test]
    fn test_config_update_apply() {
        let mut cfg = AppConfig {
            key: "old".to_string(),
            start_utc: Some("2025-01-01T00:00".to_string()),
            ..AppConfig::default()
        };
        ConfigUpdate {
            account: Some("  acct ".to_string()),
            key: Some("   ".to_string()),
            start_utc: Some(String::new()),
            end_utc: Some("2025-02-01T00:00".to_string()),
            fetch_range: Some(FetchRange::Custom),
            ..ConfigUpdate::default()
        }
        .apply_to(&mut cfg);

        assert_eq!(cfg.account, "acct");
        assert_eq!(cfg.key, "old");
        assert_eq!(cfg.start_utc, None);
        assert_eq!(cfg.end_utc.as_deref(), Some("2025-02-01T00:00"));
        assert_eq!(cfg.fetch_range, FetchRange::Custom);
    }
}
