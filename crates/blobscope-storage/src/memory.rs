//! In-memory object store
//!
//! Used for offline runs and as the storage double in tests. Call counters
//! let callers assert how many round trips a code path made.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use parking_lot::RwLock;

use crate::{BlobInfo, ObjectStore, StorageError, StorageTarget, StoreConnector};

#[derive(Default)]
pub struct MemoryStore {
    blobs: RwLock<Vec<(BlobInfo, Vec<u8>)>>,
    failure: RwLock<Option<String>>,
    list_calls: AtomicUsize,
    download_calls: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a blob; listing order is insertion order
    pub fn insert(&self, info: BlobInfo, content: impl Into<Vec<u8>>) {
        self.blobs.write().push((info, content.into()));
    }

    /// Make every subsequent call fail with `message` (`None` to recover)
    pub fn set_failure(&self, message: Option<&str>) {
        *self.failure.write() = message.map(str::to_string);
    }

    pub fn list_calls(&self) -> usize {
        self.list_calls.load(Ordering::SeqCst)
    }

    pub fn download_calls(&self) -> usize {
        self.download_calls.load(Ordering::SeqCst)
    }

    fn check_failure(&self) -> Result<(), StorageError> {
        match self.failure.read().as_ref() {
            Some(message) => Err(StorageError::Unavailable(message.clone())),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl ObjectStore for MemoryStore {
    async fn list(&self) -> Result<Vec<BlobInfo>, StorageError> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        self.check_failure()?;
        Ok(self.blobs.read().iter().map(|(info, _)| info.clone()).collect())
    }

    async fn download(&self, name: &str) -> Result<Vec<u8>, StorageError> {
        self.download_calls.fetch_add(1, Ordering::SeqCst);
        self.check_failure()?;
        self.blobs
            .read()
            .iter()
            .find(|(info, _)| info.name == name)
            .map(|(_, content)| content.clone())
            .ok_or_else(|| StorageError::NotFound(name.to_string()))
    }
}

/// Hands out the same `MemoryStore` for every target
#[derive(Clone, Default)]
pub struct MemoryConnector {
    store: Arc<MemoryStore>,
    connects: Arc<AtomicUsize>,
    last_target: Arc<RwLock<Option<StorageTarget>>>,
}

impl MemoryConnector {
    pub fn new(store: Arc<MemoryStore>) -> Self {
        Self {
            store,
            ..Default::default()
        }
    }

    pub fn store(&self) -> &Arc<MemoryStore> {
        &self.store
    }

    /// Number of times `connect` was called
    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    pub fn last_target(&self) -> Option<StorageTarget> {
        self.last_target.read().clone()
    }
}

impl StoreConnector for MemoryConnector {
    fn connect(&self, target: &StorageTarget) -> Result<Arc<dyn ObjectStore>, StorageError> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        *self.last_target.write() = Some(target.clone());
        Ok(self.store.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_store_roundtrip() {
        let store = MemoryStore::new();
        store.insert(BlobInfo::new("a.log", None), "line\n");
        store.insert(BlobInfo::new("b.log", None), "other\n");

        let names: Vec<_> = store.list().await.unwrap().into_iter().map(|b| b.name).collect();
        assert_eq!(names, vec!["a.log", "b.log"]);
        assert_eq!(store.download("b.log").await.unwrap(), b"other\n");
        assert!(matches!(
            store.download("missing").await,
            Err(StorageError::NotFound(_))
        ));
        assert_eq!(store.list_calls(), 1);
        assert_eq!(store.download_calls(), 2);
    }

    #[tokio::test]
    async fn test_memory_store_failure() {
        let store = MemoryStore::new();
        store.set_failure(Some("auth failed"));
        assert!(store.list().await.is_err());
        store.set_failure(None);
        assert!(store.list().await.unwrap().is_empty());
    }
}
