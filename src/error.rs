use crate::record::DataRecord;
use futures::future::{BoxFuture, FutureExt, Shared};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use std::time::Duration;
use thiserror::Error;

/// Errors raised by the storage layer.
///
/// Processor failures travel back inside invocation responses, so every
/// variant except the cache transport ones is serializable.
#[derive(Error, Debug, Serialize, Deserialize)]
pub enum StorageError {
    #[error("Duplicate record: {name}")]
    DuplicateRecord {
        name: String,
        record: Option<Box<DataRecord>>,
    },

    #[error("No data found for {0}")]
    NotFound(String),

    #[error("Record {name}: {message}")]
    InvalidRecord {
        name: String,
        message: String,
        record: Option<Box<DataRecord>>,
    },

    #[error("Failed to compress data: {0}")]
    Compression(String),

    #[error("Failed to decompress chunk data: {0}")]
    Decompression(String),

    #[error("Corrupt compressed record: {0}")]
    Corrupt(String),

    #[error("Unsupported request: {0}")]
    UnsupportedRequest(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Index {index:?} is out of bounds for sizes {sizes:?}")]
    OutOfBounds { index: Vec<usize>, sizes: Vec<usize> },

    #[error("Operation not supported: {0}")]
    Unsupported(String),

    #[error("Internal invariant violated: {0}")]
    Invariant(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Protocol mismatch: {0}")]
    Protocol(String),

    #[error("Pass-through store error: {0}")]
    ThroughStore(String),

    #[error("Group {group}: {source}")]
    Group {
        group: String,
        source: Box<StorageError>,
    },

    #[error("Cache operation failed after {attempts} attempt(s): {source}")]
    #[serde(skip)]
    CacheOperation {
        attempts: u32,
        #[source]
        source: CacheError,
    },

    #[error("Cache operation failed: {0}")]
    #[serde(skip)]
    Cache(#[from] CacheError),

    #[error("Configuration error: {0}")]
    #[serde(skip)]
    Config(#[from] ConfigError),
}

impl StorageError {
    /// Record the error refers to, if any
    pub fn record(&self) -> Option<&DataRecord> {
        match self {
            StorageError::DuplicateRecord { record, .. }
            | StorageError::InvalidRecord { record, .. } => record.as_deref(),
            StorageError::Group { source, .. } => source.record(),
            _ => None,
        }
    }

    pub fn record_mut(&mut self) -> Option<&mut DataRecord> {
        match self {
            StorageError::DuplicateRecord { record, .. }
            | StorageError::InvalidRecord { record, .. } => record.as_deref_mut(),
            StorageError::Group { source, .. } => source.record_mut(),
            _ => None,
        }
    }

    pub(crate) fn invalid_record(record: DataRecord, message: impl Into<String>) -> Self {
        StorageError::InvalidRecord {
            name: record.name.clone(),
            message: message.into(),
            record: Some(Box::new(record)),
        }
    }
}

impl From<bincode::Error> for StorageError {
    fn from(e: bincode::Error) -> Self {
        StorageError::Serialization(e.to_string())
    }
}

/// Errors reported by the cache collaborator.
#[derive(Error, Debug, Clone)]
pub enum CacheError {
    #[error("Cache operation timed out after {0:?}")]
    Timeout(Duration),

    #[error("Cache client disconnected: {message}")]
    Disconnected {
        message: String,
        recovery: Option<RecoveryHandle>,
    },

    #[error("Cache cluster is restarting")]
    Restarting { recovery: Option<RecoveryHandle> },

    #[error("Cache cluster topology changed")]
    TopologyChanged { recovery: Option<RecoveryHandle> },

    #[error("Cache unavailable: {0}")]
    Unavailable(String),

    #[error("Cache operation aborted: {0}")]
    Aborted(String),

    #[error("Cache loader failed: {0}")]
    Loader(String),

    #[error("Unknown cache: {0}")]
    UnknownCache(String),

    #[error("Cache is full and cannot evict more entries")]
    CacheFull,

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl CacheError {
    /// Whether another attempt may succeed
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            CacheError::Timeout(_)
                | CacheError::Disconnected { .. }
                | CacheError::Restarting { .. }
                | CacheError::TopologyChanged { .. }
                | CacheError::Unavailable(_)
                | CacheError::Aborted(_)
                | CacheError::Loader(_)
        )
    }

    /// Future that completes once the cluster has recovered from this failure
    pub fn recovery(&self) -> Option<&RecoveryHandle> {
        match self {
            CacheError::Disconnected { recovery, .. }
            | CacheError::Restarting { recovery }
            | CacheError::TopologyChanged { recovery } => recovery.as_ref(),
            _ => None,
        }
    }
}

impl From<bincode::Error> for CacheError {
    fn from(e: bincode::Error) -> Self {
        CacheError::Serialization(e.to_string())
    }
}

/// Shareable signal that a failed cache client has reconnected.
#[derive(Clone)]
pub struct RecoveryHandle(Shared<BoxFuture<'static, ()>>);

impl RecoveryHandle {
    pub fn new<F>(recovered: F) -> Self
    where
        F: Future<Output = ()> + Send + 'static,
    {
        Self(recovered.boxed().shared())
    }

    /// Handle that is already recovered
    pub fn ready() -> Self {
        Self::new(futures::future::ready(()))
    }

    /// Wait for recovery; `false` if the timeout expired first
    pub async fn wait(&self, timeout: Duration) -> bool {
        tokio::time::timeout(timeout, self.0.clone()).await.is_ok()
    }
}

impl fmt::Debug for RecoveryHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RecoveryHandle")
            .field("recovered", &self.0.peek().is_some())
            .finish()
    }
}

/// Errors raised while loading configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Missing configuration value {0}")]
    Missing(&'static str),

    #[error("Invalid value {value:?} for {key}: {reason}")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },

    #[error("Failed to parse configuration: {0}")]
    Parse(#[from] serde_json::Error),
}
