use thiserror::Error;

use blobscope_storage::StorageError;

use crate::snapshot::SnapshotError;

#[derive(Debug, Error)]
pub enum IngestError {
    /// Required storage settings are empty; no connection was attempted
    #[error("storage is not configured (missing: {})", .missing.join(", "))]
    Configuration { missing: Vec<&'static str> },

    #[error("storage unreachable: {0}")]
    Connectivity(#[from] StorageError),

    #[error("load task failed: {0}")]
    Task(String),
}

impl IngestError {
    pub fn is_configuration(&self) -> bool {
        matches!(self, Self::Configuration { .. })
    }
}

#[derive(Debug, Error)]
pub enum ExportError {
    #[error(transparent)]
    Ingest(#[from] IngestError),
    #[error(transparent)]
    Snapshot(#[from] SnapshotError),
    #[error("failed to encode records: {0}")]
    Json(#[from] serde_json::Error),
}
