use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use tokio::sync::{Mutex, OwnedMutexGuard};

use blobscope_config::ConfigStore;
use blobscope_types::AppConfig;

use crate::error::IngestError;
use crate::ingest::{IngestEngine, IngestReport};
use crate::table::LogTable;

/// Where the active configuration comes from at load time
pub trait ConfigSource: Send + Sync {
    fn current(&self) -> AppConfig;
}

impl ConfigSource for ConfigStore {
    fn current(&self) -> AppConfig {
        self.read()
    }
}

impl ConfigSource for RwLock<AppConfig> {
    fn current(&self) -> AppConfig {
        self.read().clone()
    }
}

/// Observable cache state
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CacheState {
    Empty,
    Loading,
    Loaded,
}

/// One complete load: the merged table and when it finished
#[derive(Debug)]
pub struct CacheSnapshot {
    pub table: Arc<LogTable>,
    pub loaded_at: DateTime<Utc>,
    pub report: IngestReport,
}

enum Slot {
    Empty,
    Loading,
    Loaded(Arc<CacheSnapshot>),
}

struct Inner {
    engine: IngestEngine,
    config: Arc<dyn ConfigSource>,
    slot: RwLock<Slot>,
    /// Bumped on every invalidation; a load only installs its result if
    /// the generation it started under is still current
    generation: AtomicU64,
    /// Single in-flight load permit
    permit: Arc<Mutex<()>>,
    loads: AtomicUsize,
}

/// Memory-resident cache of the merged log table
///
/// Only `ensure_loaded`, `invalidate` and `force_reload` change the cached
/// state. Loads run on their own task holding the load permit, so at most one
/// is in flight and a caller that stops waiting does not cancel it.
#[derive(Clone)]
pub struct CacheManager {
    inner: Arc<Inner>,
}

impl CacheManager {
    pub fn new(engine: IngestEngine, config: Arc<dyn ConfigSource>) -> Self {
        Self {
            inner: Arc::new(Inner {
                engine,
                config,
                slot: RwLock::new(Slot::Empty),
                generation: AtomicU64::new(0),
                permit: Arc::new(Mutex::new(())),
                loads: AtomicUsize::new(0),
            }),
        }
    }

    pub fn state(&self) -> CacheState {
        match &*self.inner.slot.read() {
            Slot::Empty => CacheState::Empty,
            Slot::Loading => CacheState::Loading,
            Slot::Loaded(_) => CacheState::Loaded,
        }
    }

    /// The cached snapshot, if loaded
    pub fn current(&self) -> Option<Arc<CacheSnapshot>> {
        match &*self.inner.slot.read() {
            Slot::Loaded(snapshot) => Some(snapshot.clone()),
            _ => None,
        }
    }

    /// Number of ingestion passes run so far
    pub fn load_count(&self) -> usize {
        self.inner.loads.load(Ordering::SeqCst)
    }

    /// Return the cached snapshot, loading it first if the cache is empty
    pub async fn ensure_loaded(&self) -> Result<Arc<CacheSnapshot>, IngestError> {
        if let Some(snapshot) = self.current() {
            return Ok(snapshot);
        }

        let permit = self.inner.permit.clone().lock_owned().await;
        // Another caller may have finished a load while we waited
        if let Some(snapshot) = self.current() {
            return Ok(snapshot);
        }
        self.load(permit).await
    }

    /// Drop the cached snapshot; the next access re-ingests
    pub fn invalidate(&self) {
        let mut slot = self.inner.slot.write();
        self.inner.generation.fetch_add(1, Ordering::SeqCst);
        if !matches!(*slot, Slot::Empty) {
            tracing::info!("cache invalidated");
        }
        *slot = Slot::Empty;
    }

    /// Unconditional full re-fetch
    pub async fn force_reload(&self) -> Result<Arc<CacheSnapshot>, IngestError> {
        self.invalidate();
        self.ensure_loaded().await
    }

    async fn load(&self, permit: OwnedMutexGuard<()>) -> Result<Arc<CacheSnapshot>, IngestError> {
        let inner = self.inner.clone();
        let generation = {
            let mut slot = inner.slot.write();
            *slot = Slot::Loading;
            inner.generation.load(Ordering::SeqCst)
        };

        let task = tokio::spawn(async move {
            let _permit = permit;
            let cfg = inner.config.current();
            let result = inner.engine.ingest(&cfg).await;
            inner.loads.fetch_add(1, Ordering::SeqCst);

            let mut slot = inner.slot.write();
            let current = inner.generation.load(Ordering::SeqCst) == generation;
            match result {
                Ok(output) => {
                    let snapshot = Arc::new(CacheSnapshot {
                        table: output.table,
                        loaded_at: Utc::now(),
                        report: output.report,
                    });
                    if current {
                        *slot = Slot::Loaded(snapshot.clone());
                        tracing::info!(rows = snapshot.table.len(), "cache loaded");
                    } else {
                        tracing::debug!("discarding load superseded by invalidation");
                    }
                    Ok(snapshot)
                }
                Err(e) => {
                    if current {
                        *slot = Slot::Empty;
                    }
                    Err(e)
                }
            }
        });

        match task.await {
            Ok(result) => result,
            Err(e) => {
                let mut slot = self.inner.slot.write();
                if self.inner.generation.load(Ordering::SeqCst) == generation {
                    *slot = Slot::Empty;
                }
                tracing::error!(error = %e, "load task failed");
                Err(IngestError::Task(e.to_string()))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use async_trait::async_trait;
    use blobscope_storage::{
        BlobInfo, MemoryConnector, MemoryStore, ObjectStore, StorageError, StorageTarget,
        StoreConnector,
    };

    /// Memory store whose listing takes `delay`
    struct SlowStore {
        inner: Arc<MemoryStore>,
        delay: Duration,
    }

    #[async_trait]
    impl ObjectStore for SlowStore {
        async fn list(&self) -> Result<Vec<BlobInfo>, StorageError> {
            tokio::time::sleep(self.delay).await;
            self.inner.list().await
        }

        async fn download(&self, name: &str) -> Result<Vec<u8>, StorageError> {
            self.inner.download(name).await
        }
    }

    impl StoreConnector for SlowStore {
        fn connect(&self, _target: &StorageTarget) -> Result<Arc<dyn ObjectStore>, StorageError> {
            Ok(Arc::new(SlowStore {
                inner: self.inner.clone(),
                delay: self.delay,
            }))
        }
    }

    fn slow_cache(delay: Duration) -> CacheManager {
        let connector = SlowStore {
            inner: store_with_rows(),
            delay,
        };
        let engine = IngestEngine::new(Arc::new(connector)).with_snapshots(false);
        CacheManager::new(engine, Arc::new(RwLock::new(config())))
    }

    fn config() -> AppConfig {
        AppConfig {
            account: "acct".to_string(),
            key: "a2V5".to_string(),
            container: "logs".to_string(),
            ..AppConfig::default()
        }
    }

    fn cache_with(store: Arc<MemoryStore>, cfg: AppConfig) -> (CacheManager, Arc<RwLock<AppConfig>>) {
        let engine =
            IngestEngine::new(Arc::new(MemoryConnector::new(store))).with_snapshots(false);
        let source = Arc::new(RwLock::new(cfg));
        (CacheManager::new(engine, source.clone()), source)
    }

    fn store_with_rows() -> Arc<MemoryStore> {
        let store = Arc::new(MemoryStore::new());
        store.insert(BlobInfo::new("a.log", None), "{\"x\": 1}\n{\"x\": 2}\n");
        store
    }

    #[tokio::test]
    async fn test_ensure_loaded_is_idempotent() {
        let store = store_with_rows();
        let (cache, _) = cache_with(store.clone(), config());
        assert_eq!(cache.state(), CacheState::Empty);

        let first = cache.ensure_loaded().await.unwrap();
        let second = cache.ensure_loaded().await.unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(cache.load_count(), 1);
        assert_eq!(store.list_calls(), 1);
        assert_eq!(cache.state(), CacheState::Loaded);
        assert_eq!(first.table.len(), 2);
    }

    #[tokio::test]
    async fn test_missing_config_stays_empty() {
        let store = store_with_rows();
        let (cache, _) = cache_with(store.clone(), AppConfig::default());

        let err = cache.ensure_loaded().await.err().unwrap();
        assert!(err.is_configuration());
        assert_eq!(cache.state(), CacheState::Empty);
        assert_eq!(store.list_calls(), 0);
    }

    #[tokio::test]
    async fn test_failure_leaves_cache_empty_then_recovers() {
        let store = store_with_rows();
        store.set_failure(Some("network down"));
        let (cache, _) = cache_with(store.clone(), config());

        assert!(cache.ensure_loaded().await.is_err());
        assert_eq!(cache.state(), CacheState::Empty);

        store.set_failure(None);
        assert_eq!(cache.ensure_loaded().await.unwrap().table.len(), 2);
    }

    #[tokio::test]
    async fn test_invalidate_and_force_reload() {
        let store = store_with_rows();
        let (cache, source) = cache_with(store.clone(), config());
        let first = cache.ensure_loaded().await.unwrap();

        source.write().container = "other".to_string();
        cache.invalidate();
        assert_eq!(cache.state(), CacheState::Empty);
        assert!(cache.current().is_none());

        let second = cache.ensure_loaded().await.unwrap();
        assert!(!Arc::ptr_eq(&first, &second));
        assert_eq!(cache.load_count(), 2);

        let third = cache.force_reload().await.unwrap();
        assert!(!Arc::ptr_eq(&second, &third));
        assert_eq!(cache.load_count(), 3);
        assert!(third.loaded_at >= second.loaded_at);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_first_access_loads_once() {
        let store = store_with_rows();
        let (cache, _) = cache_with(store.clone(), config());

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let cache = cache.clone();
                tokio::spawn(async move { cache.ensure_loaded().await.map(|s| s.table.len()) })
            })
            .collect();
        for handle in handles {
            assert_eq!(handle.await.unwrap().unwrap(), 2);
        }

        assert_eq!(cache.load_count(), 1);
        assert_eq!(store.list_calls(), 1);
    }

    #[tokio::test]
    async fn test_abandoned_caller_does_not_cancel_load() {
        let cache = slow_cache(Duration::from_millis(200));

        let caller = {
            let cache = cache.clone();
            tokio::spawn(async move { cache.ensure_loaded().await.map(|_| ()) })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        caller.abort();
        assert!(caller.await.unwrap_err().is_cancelled());
        assert_eq!(cache.state(), CacheState::Loading);

        // Waits on the in-flight load instead of starting another
        let snapshot = cache.ensure_loaded().await.unwrap();
        assert_eq!(snapshot.table.len(), 2);
        assert_eq!(cache.state(), CacheState::Loaded);
        assert_eq!(cache.load_count(), 1);
    }

    #[tokio::test]
    async fn test_invalidate_during_load_discards_result() {
        let cache = slow_cache(Duration::from_millis(200));

        let caller = {
            let cache = cache.clone();
            tokio::spawn(async move { cache.ensure_loaded().await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(cache.state(), CacheState::Loading);
        cache.invalidate();

        // The superseded result still reaches its own caller
        assert_eq!(caller.await.unwrap().unwrap().table.len(), 2);
        assert_eq!(cache.state(), CacheState::Empty);
        assert!(cache.current().is_none());

        cache.ensure_loaded().await.unwrap();
        assert_eq!(cache.load_count(), 2);
        assert_eq!(cache.state(), CacheState::Loaded);
    }
}
