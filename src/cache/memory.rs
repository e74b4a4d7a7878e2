use crate::cache::{Cache, CacheLoader, CacheQuery, CacheStats, QueryRows};
use crate::config::{CacheConfig, PreviousValuePolicy};
use crate::error::CacheError;
use crate::processor::{self, Invocation};
use crate::record::{StorageKey, StorageValue};
use bytes::Bytes;
use futures::StreamExt;
use lru::LruCache;
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

/// In-process cache honouring the [`Cache`] contract.
///
/// Every operation except `query` holds the write lock, so processors run
/// atomically per key (and in fact per cache).
pub struct LruMemoryCache {
    name: String,
    inner: Arc<RwLock<LruCache<StorageKey, CacheEntry>>>,
    max_size_bytes: usize,
    current_size: Arc<AtomicUsize>,
    entry_count: Arc<AtomicUsize>,
    stats: Arc<CacheStatsInner>,
    ttl: Option<Duration>,
    loader: Option<Arc<dyn CacheLoader>>,
}

struct CacheEntry {
    value: StorageValue,
    size: usize,
    timestamp: Instant,
}

struct CacheStatsInner {
    hits: AtomicU64,
    misses: AtomicU64,
}

type Entries = LruCache<StorageKey, CacheEntry>;

impl LruMemoryCache {
    pub fn new(max_size_bytes: usize) -> Self {
        Self::with_ttl(max_size_bytes, None)
    }

    pub fn with_ttl(max_size_bytes: usize, ttl: Option<Duration>) -> Self {
        Self::from_config(&CacheConfig {
            max_memory_size: max_size_bytes,
            ttl,
            ..Default::default()
        })
    }

    pub fn from_config(config: &CacheConfig) -> Self {
        Self {
            name: config.name.clone(),
            inner: Arc::new(RwLock::new(LruCache::unbounded())),
            max_size_bytes: config.max_memory_size,
            current_size: Arc::new(AtomicUsize::new(0)),
            entry_count: Arc::new(AtomicUsize::new(0)),
            stats: Arc::new(CacheStatsInner {
                hits: AtomicU64::new(0),
                misses: AtomicU64::new(0),
            }),
            ttl: config.ttl,
            loader: None,
        }
    }

    /// Read entries that are not resident through `loader`
    pub fn with_loader(mut self, loader: Arc<dyn CacheLoader>) -> Self {
        self.loader = Some(loader);
        self
    }

    /// Current size in bytes
    pub fn size(&self) -> usize {
        self.current_size.load(Ordering::Relaxed)
    }

    fn is_expired(&self, entry: &CacheEntry) -> bool {
        if let Some(ttl) = self.ttl {
            entry.timestamp.elapsed() > ttl
        } else {
            false
        }
    }

    fn cleanup_expired(&self, cache: &mut Entries) {
        if self.ttl.is_none() {
            return;
        }

        let expired_keys: Vec<StorageKey> = cache
            .iter()
            .filter(|(_, entry)| self.is_expired(entry))
            .map(|(key, _)| key.clone())
            .collect();

        for key in expired_keys {
            self.pop(cache, &key);
        }
    }

    fn pop(&self, cache: &mut Entries, key: &StorageKey) -> Option<StorageValue> {
        let entry = cache.pop(key)?;
        self.current_size.fetch_sub(entry.size, Ordering::Relaxed);
        self.entry_count.fetch_sub(1, Ordering::Relaxed);
        Some(entry.value)
    }

    /// Live value for `key`, counted as a hit or a miss
    fn lookup(&self, cache: &mut Entries, key: &StorageKey) -> Option<StorageValue> {
        let expired = cache.peek(key).map(|entry| self.is_expired(entry));
        match expired {
            Some(false) => {
                self.stats.hits.fetch_add(1, Ordering::Relaxed);
                cache.get(key).map(|entry| entry.value.clone())
            }
            Some(true) => {
                self.pop(cache, key);
                self.stats.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
            None => {
                self.stats.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    async fn load(&self, key: &StorageKey) -> Result<Option<StorageValue>, CacheError> {
        match &self.loader {
            Some(loader) => loader.load(key).await,
            None => Ok(None),
        }
    }

    fn insert(
        &self,
        cache: &mut Entries,
        key: &StorageKey,
        value: StorageValue,
    ) -> Result<(), CacheError> {
        // A value larger than the whole cache leaves every entry in place
        let size = value.size_in_bytes();
        if size > self.max_size_bytes {
            tracing::warn!(
                "{} needs {}B, more than cache {} holds ({}B)",
                key,
                size,
                self.name,
                self.max_size_bytes
            );
            return Err(CacheError::CacheFull);
        }
        self.pop(cache, key);

        while self.current_size.load(Ordering::Relaxed) + size > self.max_size_bytes {
            match cache.pop_lru() {
                Some((evicted, entry)) => {
                    tracing::debug!("Evicting {} ({}B) from cache {}", evicted, entry.size, self.name);
                    self.current_size.fetch_sub(entry.size, Ordering::Relaxed);
                    self.entry_count.fetch_sub(1, Ordering::Relaxed);
                }
                None => return Err(CacheError::CacheFull),
            }
        }

        cache.put(
            key.clone(),
            CacheEntry {
                value,
                size,
                timestamp: Instant::now(),
            },
        );
        self.current_size.fetch_add(size, Ordering::Relaxed);
        self.entry_count.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}

#[async_trait::async_trait]
impl Cache for LruMemoryCache {
    fn name(&self) -> &str {
        &self.name
    }

    async fn get(&self, key: &StorageKey) -> Result<Option<StorageValue>, CacheError> {
        let mut cache = self.inner.write().await;
        self.cleanup_expired(&mut cache);

        if let Some(value) = self.lookup(&mut cache, key) {
            return Ok(Some(value));
        }
        match self.load(key).await? {
            Some(loaded) => {
                self.insert(&mut cache, key, loaded.clone())?;
                Ok(Some(loaded))
            }
            None => Ok(None),
        }
    }

    async fn put(&self, key: &StorageKey, value: StorageValue) -> Result<(), CacheError> {
        let mut cache = self.inner.write().await;
        self.insert(&mut cache, key, value)
    }

    async fn get_and_put_if_absent(
        &self,
        key: &StorageKey,
        value: StorageValue,
        previous: PreviousValuePolicy,
    ) -> Result<Option<StorageValue>, CacheError> {
        let mut cache = self.inner.write().await;

        if let Some(existing) = self.lookup(&mut cache, key) {
            return Ok(Some(existing));
        }
        if previous == PreviousValuePolicy::Load {
            if let Some(loaded) = self.load(key).await? {
                self.insert(&mut cache, key, loaded.clone())?;
                return Ok(Some(loaded));
            }
        }
        self.insert(&mut cache, key, value)?;
        Ok(None)
    }

    async fn remove_all(&self, keys: &[StorageKey]) -> Result<(), CacheError> {
        let mut cache = self.inner.write().await;
        for key in keys {
            self.pop(&mut cache, key);
        }
        Ok(())
    }

    async fn clear(&self, key: &StorageKey) -> Result<(), CacheError> {
        let mut cache = self.inner.write().await;
        self.pop(&mut cache, key);
        Ok(())
    }

    async fn invoke(&self, key: &StorageKey, invocation: &Invocation) -> Result<Bytes, CacheError> {
        let mut cache = self.inner.write().await;

        let mut entry = match self.lookup(&mut cache, key) {
            Some(value) => Some(value),
            None => self.load(key).await?,
        };
        let response = processor::execute(key, invocation, &mut entry)?;

        match entry {
            Some(value) => self.insert(&mut cache, key, value)?,
            None => {
                self.pop(&mut cache, key);
            }
        }
        Ok(response)
    }

    /// Rows come from a snapshot of the resident keys taken under the read
    /// lock. The scan is bounded by the entry count of this process.
    async fn query(&self, query: &CacheQuery) -> Result<QueryRows, CacheError> {
        let cache = self.inner.read().await;
        let live = cache
            .iter()
            .filter(|(_, entry)| !self.is_expired(entry))
            .map(|(key, _)| key);

        let rows: Vec<Vec<String>> = match query {
            CacheQuery::DistinctPaths => live
                .map(|key| key.path.clone())
                .collect::<BTreeSet<_>>()
                .into_iter()
                .map(|path| vec![path])
                .collect(),
            CacheQuery::GroupsForPath(path) => live
                .filter(|key| &key.path == path)
                .map(|key| vec![key.group.clone()])
                .collect(),
        };
        Ok(futures::stream::iter(rows.into_iter().map(Ok::<_, CacheError>)).boxed())
    }

    fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.stats.hits.load(Ordering::Relaxed),
            misses: self.stats.misses.load(Ordering::Relaxed),
            size_bytes: self.current_size.load(Ordering::Relaxed),
            entry_count: self.entry_count.load(Ordering::Relaxed),
        }
    }
}
