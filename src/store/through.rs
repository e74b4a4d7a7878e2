use crate::error::StorageError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

/// Compression applied when a backing file is rewritten
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RepackCompression {
    None,
    Lzf,
    Zlib,
}

/// Options of [`ThroughStore::copy`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CopyOptions {
    pub output_dir: PathBuf,
    pub compression: RepackCompression,
    /// Attribute holding the last-change timestamp checked against the ages
    pub timestamp_check: Option<String>,
    /// Skip files changed more recently than this
    pub min_age: Option<Duration>,
    /// Skip files not changed for longer than this
    pub max_age: Option<Duration>,
}

impl CopyOptions {
    pub fn new(output_dir: impl Into<PathBuf>, compression: RepackCompression) -> Self {
        Self {
            output_dir: output_dir.into(),
            compression,
            timestamp_check: None,
            min_age: None,
            max_age: None,
        }
    }
}

/// Persistent store behind the cache for one file path.
///
/// Calls block, so the data store runs them on the blocking pool.
pub trait ThroughStore: Send + Sync + 'static {
    fn delete_datasets(&self, path: &str, datasets: &[String]) -> Result<(), StorageError>;

    fn delete_groups(&self, path: &str, groups: &[String]) -> Result<(), StorageError>;

    /// Remove everything stored for `path`
    fn delete_files(&self, path: &str) -> Result<(), StorageError>;

    fn repack(&self, path: &str, compression: RepackCompression) -> Result<(), StorageError>;

    fn copy(&self, path: &str, options: &CopyOptions) -> Result<(), StorageError>;

    /// Remove data older than the cutoff of the first pattern its path matches
    fn delete_orphan_data(
        &self,
        path: &str,
        cutoffs: &BTreeMap<String, DateTime<Utc>>,
    ) -> Result<(), StorageError>;
}
