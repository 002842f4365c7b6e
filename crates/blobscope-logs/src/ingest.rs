use std::path::PathBuf;
use std::sync::Arc;

use futures::{StreamExt, TryStreamExt, stream};
use serde::Serialize;

use blobscope_storage::{ObjectStore, StoreConnector};
use blobscope_types::{AppConfig, BlobInfo};

use crate::error::IngestError;
use crate::parser::{LogParser, ParsedBlob};
use crate::snapshot::{self, SnapshotFiles};
use crate::table::{LogTable, SORT_CANDIDATES};

/// Blobs downloaded at once during a load
const DEFAULT_CONCURRENCY: usize = 8;

/// Counters from one ingestion pass
#[derive(Clone, Debug, Default, Serialize)]
pub struct IngestReport {
    pub blobs_listed: usize,
    pub blobs_ingested: usize,
    pub rows: usize,
    pub discarded_lines: usize,
    pub sort_column: Option<String>,
    pub snapshot: SnapshotFiles,
}

/// Result of a successful ingestion pass
pub struct IngestOutput {
    pub table: Arc<LogTable>,
    pub report: IngestReport,
}

/// Fetches every blob of the configured container and merges the records
pub struct IngestEngine {
    connector: Arc<dyn StoreConnector>,
    concurrency: usize,
    snapshots: bool,
}

impl IngestEngine {
    pub fn new(connector: Arc<dyn StoreConnector>) -> Self {
        Self {
            connector,
            concurrency: DEFAULT_CONCURRENCY,
            snapshots: true,
        }
    }

    /// Set how many blobs are downloaded in parallel
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    /// Enable or disable snapshot files after each load
    pub fn with_snapshots(mut self, enabled: bool) -> Self {
        self.snapshots = enabled;
        self
    }

    /// Full fetch, parse, merge and sort for `cfg`
    pub async fn ingest(&self, cfg: &AppConfig) -> Result<IngestOutput, IngestError> {
        let target = cfg.target();
        let missing = target.missing_fields();
        if !missing.is_empty() {
            return Err(IngestError::Configuration { missing });
        }

        tracing::info!(account = %target.account, container = %target.container, "loading blobs");
        let store = self.connector.connect(&target)?;

        let mut blobs = store.list().await?;
        let blobs_listed = blobs.len();
        tracing::info!(count = blobs_listed, "found blobs");

        if let Some(limit) = cfg.blob_limit() {
            blobs.truncate(limit);
            tracing::info!(count = blobs.len(), "limiting blobs due to max_blobs");
        }
        let blobs_ingested = blobs.len();

        // buffered() keeps listing order regardless of completion order
        let parsed: Vec<ParsedBlob> = stream::iter(blobs)
            .map(|blob| fetch_and_parse(store.clone(), blob))
            .buffered(self.concurrency)
            .try_collect()
            .await?;

        let mut table = LogTable::new();
        let mut discarded_lines = 0;
        for blob in parsed {
            discarded_lines += blob.discarded;
            for record in blob.records {
                table.push_record(record);
            }
        }
        let sort_column = table.sort_by_time(&SORT_CANDIDATES);

        tracing::info!(
            rows = table.len(),
            columns = table.width(),
            discarded = discarded_lines,
            sort_column = sort_column.as_deref().unwrap_or("-"),
            "merged rows"
        );

        let table = Arc::new(table);
        let snapshot = if self.snapshots && !table.is_empty() {
            self.export(table.clone(), PathBuf::from(&cfg.output_dir)).await
        } else {
            SnapshotFiles::default()
        };

        Ok(IngestOutput {
            report: IngestReport {
                blobs_listed,
                blobs_ingested,
                rows: table.len(),
                discarded_lines,
                sort_column,
                snapshot,
            },
            table,
        })
    }

    async fn export(&self, table: Arc<LogTable>, dir: PathBuf) -> SnapshotFiles {
        tokio::task::spawn_blocking(move || snapshot::export_snapshot(&table, &dir))
            .await
            .unwrap_or_else(|e| {
                tracing::debug!(error = %e, "snapshot task failed");
                SnapshotFiles::default()
            })
    }
}

async fn fetch_and_parse(
    store: Arc<dyn ObjectStore>,
    blob: BlobInfo,
) -> Result<ParsedBlob, IngestError> {
    let content = store.download(&blob.name).await?;
    tracing::debug!(blob = %blob.name, bytes = content.len(), "downloaded blob");
    Ok(LogParser::parse_blob(&content, &blob))
}
