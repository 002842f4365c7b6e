//! Object storage client for blobscope
//!
//! This crate provides the `ObjectStore` seam used by ingestion, an Azure
//! Blob Storage implementation signed with Shared Key, and an in-memory store.

mod azure;
mod error;
mod memory;

use std::sync::Arc;

use async_trait::async_trait;

pub use azure::{AzureBlobClient, AzureConnector};
pub use error::StorageError;
pub use memory::{MemoryConnector, MemoryStore};

// Re-export types that are used in our public API
pub use blobscope_types::{BlobInfo, StorageTarget};

/// A single container of named blobs
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// List every blob in the container, in the order the service returns them
    async fn list(&self) -> Result<Vec<BlobInfo>, StorageError>;

    /// Download the full content of one blob
    async fn download(&self, name: &str) -> Result<Vec<u8>, StorageError>;
}

/// Builds an `ObjectStore` for a given account/key/container triple
pub trait StoreConnector: Send + Sync {
    fn connect(&self, target: &StorageTarget) -> Result<Arc<dyn ObjectStore>, StorageError>;
}
