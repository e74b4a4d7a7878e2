//! # datastore-cache
//!
//! **Chunked, compressed array storage on top of a key/value cache**
//!
//! Named, typed arrays ("records") are grouped by file path and group name.
//! Each `(path, group)` pair is one cache entry. Large records are split into
//! square chunks and deflate-compressed, so a partial read only inflates the
//! chunks it touches.
//!
//! ## Building blocks
//!
//! - [`ChunkCodec`]: splits an N-dimensional array into chunks and back
//! - [`map_request`](chunk::map_request): answers point, line and slab
//!   requests from a compressed record
//! - [`merge`](merge::merge): combines stored and incoming records for
//!   `StoreOnly`, `Replace` and `Append` stores
//! - [`processor`]: versioned entry processors run by the cache, atomically
//!   per key
//! - [`CacheAccessor`]: retry, timeout and recovery envelope around every
//!   cache call
//! - [`CacheDataStore`]: the store for one file path
//!
//! ## Storing and reading back a slab
//!
//! ```rust
//! use datastore_cache::request::Point;
//! use datastore_cache::{
//!     CacheAccessor, CacheDataStore, DataRecord, LruMemoryCache, PreviousValuePolicy, Request,
//!     RetryConfig, StoreConfig, StoreOp,
//! };
//! use std::sync::Arc;
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let cache = Arc::new(LruMemoryCache::new(64 * 1024 * 1024));
//! let accessor = CacheAccessor::new(cache, RetryConfig::default());
//! let config = StoreConfig::new(PreviousValuePolicy::ResidentOnly);
//! let mut store = CacheDataStore::new("/data/grid.h5", accessor, config)?;
//!
//! let values: Vec<f32> = (0..100).map(|v| v as f32).collect();
//! store.add_record(
//!     DataRecord::new("temperature", "analysis", values, vec![10, 10]).with_compression(Some(4)),
//! );
//! let status = store.store(StoreOp::StoreOnly).await;
//! assert!(!status.has_exceptions());
//!
//! let slab = Request::Slab {
//!     min: Point::new(3, 3),
//!     max: Point::new(7, 7),
//! };
//! let record = store
//!     .retrieve_dataset("analysis", "temperature", slab)
//!     .await?;
//! assert_eq!(record.sizes, vec![4, 4]);
//! # Ok(())
//! # }
//! ```
//!
//! ## Retry configuration
//!
//! [`RetryConfig::global`] reads `DATASTORE_CACHE_OP_NUM_ATTEMPTS`,
//! `DATASTORE_CACHE_OP_TIMEOUT_SECS`, `DATASTORE_CACHE_RECOVERY_TIMEOUT_SECS`
//! and `DATASTORE_CACHE_RETRY_DELAY_MS` once per process. All four are
//! required.
//!
//! ## Feature flags
//!
//! - `metrics`: export operation timings through the `metrics` crate

pub mod cache;
pub mod chunk;
pub mod compression;
pub mod config;
pub mod element;
pub mod error;
pub mod merge;
pub mod metrics;
pub mod processor;
pub mod record;
pub mod request;
pub mod store;

// Re-export commonly used types
pub use cache::accessor::CacheAccessor;
pub use cache::memory::LruMemoryCache;
pub use cache::{Cache, CacheLoader, CacheQuery, CacheStats};
pub use chunk::{ChunkCodec, CompressedRecord};
pub use compression::{Compression, DeflateCompression, NoCompression};
pub use config::{CacheConfig, PreviousValuePolicy, RetryConfig, StoreConfig};
pub use element::{ArrayData, Element, ElementType};
pub use error::{CacheError, ConfigError, RecoveryHandle, StorageError};
pub use metrics::{MetricsConfig, PerformanceLog};
pub use record::{DataRecord, StorageKey, StorageStatus, StorageValue, StoreOp};
pub use request::Request;
pub use store::{CacheDataStore, ThroughStore};
