//! Log processing for blobscope
//!
//! This crate turns a container of NDJSON blobs into a cached table and
//! serves windowed, projected views and exports of it.

mod cache;
mod error;
mod ingest;
mod parser;
mod projection;
mod service;
mod snapshot;
mod table;
mod timestamp;
mod window;

pub use cache::{CacheManager, CacheSnapshot, CacheState, ConfigSource};
pub use error::{ExportError, IngestError};
pub use ingest::{IngestEngine, IngestOutput, IngestReport};
pub use parser::{LogParser, ParsedBlob, ParsedLine};
pub use projection::{MAX_VIEW_COLUMNS, PREFERRED_COLUMNS, Projection};
pub use service::{
    ConfigUpdate, ConnectionCheck, DataDiagnostics, DataView, LogService, ReloadSummary,
    humanize_utc,
};
pub use snapshot::{SnapshotError, SnapshotFiles, export_snapshot, render_csv};
pub use table::{Cell, LogTable, SORT_CANDIDATES};
pub use timestamp::{coerce as coerce_timestamp, from_epoch, parse_iso};
pub use window::{RECORD_TIME_FIELD, TimeWindow, WindowFilter};

// Re-export types used in our public API
pub use blobscope_config::ConfigError;
pub use blobscope_types::{AppConfig, FetchRange, StorageTarget};
