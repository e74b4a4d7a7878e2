use crate::config::PreviousValuePolicy;
use crate::error::CacheError;
use crate::processor::Invocation;
use crate::record::{StorageKey, StorageValue};
use bytes::Bytes;
use futures::stream::BoxStream;

/// Lazy cursor over query results, one row of columns at a time
pub type QueryRows = BoxStream<'static, Result<Vec<String>, CacheError>>;

/// Scans over the keys held by a cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheQuery {
    /// One row per distinct path: `[path]`
    DistinctPaths,
    /// One row per group stored for a path: `[group]`
    GroupsForPath(String),
}

/// Contract of the distributed key/value cache holding storage values
#[async_trait::async_trait]
pub trait Cache: Send + Sync + 'static {
    fn name(&self) -> &str;

    async fn get(&self, key: &StorageKey) -> Result<Option<StorageValue>, CacheError>;

    async fn put(&self, key: &StorageKey, value: StorageValue) -> Result<(), CacheError>;

    /// Store `value` unless the key is present; returns the present value
    async fn get_and_put_if_absent(
        &self,
        key: &StorageKey,
        value: StorageValue,
        previous: PreviousValuePolicy,
    ) -> Result<Option<StorageValue>, CacheError>;

    async fn remove_all(&self, keys: &[StorageKey]) -> Result<(), CacheError>;

    /// Drop the cached entry without touching any backing store
    async fn clear(&self, key: &StorageKey) -> Result<(), CacheError>;

    /// Run a processor against the entry for `key`, atomically
    async fn invoke(&self, key: &StorageKey, invocation: &Invocation) -> Result<Bytes, CacheError>;

    async fn query(&self, query: &CacheQuery) -> Result<QueryRows, CacheError>;

    /// Get cache statistics
    fn stats(&self) -> CacheStats;
}

/// Read-through source for entries that are not resident
#[async_trait::async_trait]
pub trait CacheLoader: Send + Sync + 'static {
    async fn load(&self, key: &StorageKey) -> Result<Option<StorageValue>, CacheError>;
}

#[derive(Debug, Clone)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub size_bytes: usize,
    pub entry_count: usize,
}

pub mod accessor;
pub mod memory;
