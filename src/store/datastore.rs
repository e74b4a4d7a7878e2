use crate::cache::accessor::CacheAccessor;
use crate::cache::{Cache, CacheQuery};
use crate::chunk::ChunkCodec;
use crate::config::StoreConfig;
use crate::error::{CacheError, StorageError};
use crate::merge::merge;
use crate::metrics::{MetricsConfig, PerformanceLog};
use crate::processor::{decode_response, Invocation};
use crate::record::{Correlation, DataRecord, StorageKey, StorageStatus, StoreOp};
use crate::request::Request;
use crate::store::through::{CopyOptions, RepackCompression, ThroughStore};
use bytes::Bytes;
use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use futures::future::join_all;
use futures::StreamExt;
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Instant;

/// Separator between group and dataset names
pub const SEPARATOR: &str = "/";

/// Dates as they appear in file names: `20240131` or `2024-01-31`
static ORPHAN_DATE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(19|20)(\d\d)-?(0[1-9]|1[012])-?(0[1-9]|[12][0-9]|3[01])")
        .expect("valid date pattern")
});

/// Data store for one file path, holding its records in a [`Cache`].
///
/// Records are buffered with [`add_record`](Self::add_record) and written by
/// [`store`](Self::store), one cache key per group. Operations the cache
/// cannot answer on its own are forwarded to the optional [`ThroughStore`].
pub struct CacheDataStore<C: Cache> {
    path: String,
    accessor: CacheAccessor<C>,
    config: StoreConfig,
    codec: ChunkCodec,
    through: Option<Arc<dyn ThroughStore>>,
    pending: BTreeMap<String, Vec<DataRecord>>,
    performance: PerformanceLog,
}

impl<C: Cache> CacheDataStore<C> {
    pub fn new(
        path: impl Into<String>,
        accessor: CacheAccessor<C>,
        config: StoreConfig,
    ) -> Result<Self, StorageError> {
        let codec = ChunkCodec::new(config.chunk_size)?;
        Ok(Self {
            path: path.into(),
            accessor,
            config,
            codec,
            through: None,
            pending: BTreeMap::new(),
            performance: PerformanceLog::new(MetricsConfig::default()),
        })
    }

    pub fn with_through_store(mut self, through: Arc<dyn ThroughStore>) -> Self {
        self.through = Some(through);
        self
    }

    /// Share a performance log between stores
    pub fn with_performance_log(mut self, performance: PerformanceLog) -> Self {
        self.performance = performance;
        self
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    pub fn accessor(&self) -> &CacheAccessor<C> {
        &self.accessor
    }

    pub fn performance(&self) -> &PerformanceLog {
        &self.performance
    }

    /// Number of records waiting for the next [`store`](Self::store)
    pub fn pending_records(&self) -> usize {
        self.pending.values().map(Vec::len).sum()
    }

    fn key(&self, group: &str) -> StorageKey {
        StorageKey::new(self.path.clone(), group)
    }

    /// Buffer `record` until the next [`store`](Self::store)
    pub fn add_record(&mut self, record: DataRecord) {
        self.pending
            .entry(record.group.clone())
            .or_default()
            .push(record);
    }

    /// Write every buffered record.
    ///
    /// Groups are stored concurrently. Failures of single records or whole
    /// groups are reported in the returned status; the buffer is empty
    /// afterwards either way.
    pub async fn store(&mut self, op: StoreOp) -> StorageStatus {
        let start = Instant::now();
        let pending = std::mem::take(&mut self.pending);
        let fast = self.config.fast_store
            && op != StoreOp::Append
            && pending.values().flatten().all(|record| !record.is_partial());

        tracing::info!(
            "Storing {} records in {} groups to {} with {:?}{}",
            pending.values().map(Vec::len).sum::<usize>(),
            pending.len(),
            self.path,
            op,
            if fast { " (fast)" } else { "" }
        );

        let this = &*self;
        let statuses = join_all(
            pending
                .into_iter()
                .map(|(group, records)| this.store_group(group, records, op, fast)),
        )
        .await;

        let mut status = StorageStatus::new(op);
        for group_status in statuses {
            status.absorb(group_status);
        }

        self.performance
            .record("store", &self.path, start.elapsed(), !status.has_exceptions())
            .await;
        status
    }

    async fn store_group(
        &self,
        group: String,
        mut records: Vec<DataRecord>,
        op: StoreOp,
        fast: bool,
    ) -> StorageStatus {
        let mut correlations: HashMap<String, Correlation> = HashMap::new();
        for record in &mut records {
            if let Some(correlation) = record.correlation.take() {
                correlations.insert(record.name.clone(), correlation);
            }
        }

        let mut status = StorageStatus::new(op);
        let records = self.compress_records(records, op, &mut status);
        if !records.is_empty() {
            let key = self.key(&group);
            let stored = if fast {
                self.fast_store(key, records, op).await
            } else {
                self.invoke_store(key, records, op).await
            };
            match stored {
                Ok(stored) => status.absorb(stored),
                Err(e) => {
                    tracing::error!("Failed to store group {} of {}: {}", group, self.path, e);
                    status.exceptions.push(StorageError::Group {
                        group,
                        source: Box::new(e),
                    });
                }
            }
        }

        for exception in &mut status.exceptions {
            if let Some(record) = exception.record_mut() {
                if let Some(correlation) = correlations.get(&record.name) {
                    record.correlation = Some(Arc::clone(correlation));
                }
            }
        }
        status
    }

    /// Compress the records that ask for it. Partial records and appends
    /// stay plain so the merge can splice them.
    fn compress_records(
        &self,
        records: Vec<DataRecord>,
        op: StoreOp,
        status: &mut StorageStatus,
    ) -> Vec<DataRecord> {
        let mut kept = Vec::with_capacity(records.len());
        for mut record in records {
            if record.properties.compress && !record.is_partial() && op != StoreOp::Append {
                let compressed = match record.properties.chunk_size {
                    Some(chunk_size) if chunk_size != self.codec.chunk_size() => {
                        ChunkCodec::new(chunk_size).and_then(|codec| record.compress(&codec))
                    }
                    _ => record.compress(&self.codec),
                };
                if let Err(e) = compressed {
                    status
                        .exceptions
                        .push(StorageError::invalid_record(record, e.to_string()));
                    continue;
                }
            }
            kept.push(record);
        }
        kept
    }

    /// Conditional put of the whole group. When the key already holds a
    /// value the merge runs inside a store invocation, which the cache
    /// applies atomically per key.
    async fn fast_store(
        &self,
        key: StorageKey,
        records: Vec<DataRecord>,
        op: StoreOp,
    ) -> Result<StorageStatus, StorageError> {
        let outcome = merge(None, records, op);
        let mut status = outcome.status;
        let value = outcome.value;
        let policy = self.config.previous_value;

        let previous = {
            let key = key.clone();
            let value = value.clone();
            self.accessor
                .do_async_op(move |cache| {
                    let key = key.clone();
                    let value = value.clone();
                    async move { cache.get_and_put_if_absent(&key, value, policy).await }
                })
                .await?
        };

        if previous.is_some() {
            tracing::debug!("{} already present, storing {:?} through the cache", key, op);
            let stored = self.invoke_store(key, value.into_records(), op).await?;
            status.absorb(stored);
        }
        Ok(status)
    }

    async fn invoke_store(
        &self,
        key: StorageKey,
        records: Vec<DataRecord>,
        op: StoreOp,
    ) -> Result<StorageStatus, StorageError> {
        let response = self.invoke(key, Invocation::store(op, records)?).await?;
        decode_response(&response)
    }

    async fn invoke(&self, key: StorageKey, invocation: Invocation) -> Result<Bytes, StorageError> {
        self.accessor
            .do_async_op(move |cache| {
                let key = key.clone();
                let invocation = invocation.clone();
                async move { cache.invoke(&key, &invocation).await }
            })
            .await
    }

    async fn retrieve_key(
        &self,
        group: &str,
        datasets: Option<BTreeSet<String>>,
        request: Request,
    ) -> Result<Vec<DataRecord>, StorageError> {
        let response = self
            .invoke(self.key(group), Invocation::retrieve(datasets, request)?)
            .await?;
        decode_response(&response)
    }

    async fn timed<T>(
        &self,
        operation: &str,
        target: &str,
        start: Instant,
        result: Result<T, StorageError>,
    ) -> Result<T, StorageError> {
        self.performance
            .record(operation, target, start.elapsed(), result.is_ok())
            .await;
        result
    }

    /// Every record of `group`
    pub async fn retrieve(&self, group: &str) -> Result<Vec<DataRecord>, StorageError> {
        let start = Instant::now();
        let result = self.retrieve_key(group, None, Request::All).await;
        self.timed("retrieve", &self.key(group).to_string(), start, result)
            .await
    }

    /// One dataset, restricted to `request`.
    ///
    /// A group of `/` means the root group. With an empty group the dataset
    /// may carry its group as a `group/dataset` path.
    pub async fn retrieve_dataset(
        &self,
        group: &str,
        dataset: &str,
        request: Request,
    ) -> Result<DataRecord, StorageError> {
        let start = Instant::now();
        let (group, dataset) = normalize_dataset_path(group, dataset);

        let result = self
            .retrieve_key(&group, Some(BTreeSet::from([dataset.clone()])), request)
            .await
            .and_then(|mut records| match records.len() {
                0 => Err(StorageError::NotFound(format!(
                    "{} {} in {}",
                    group, dataset, self.path
                ))),
                1 => Ok(records.remove(0)),
                n => Err(StorageError::Invariant(format!(
                    "{} records found for {} {} in {}",
                    n, group, dataset, self.path
                ))),
            });

        let target = format!("{}{}{}", group, SEPARATOR, dataset);
        self.timed("retrieve_dataset", &target, start, result).await
    }

    /// Datasets given as `group/dataset` paths, one invocation per group
    pub async fn retrieve_datasets(
        &self,
        paths: &[String],
        request: Request,
    ) -> Result<Vec<DataRecord>, StorageError> {
        let start = Instant::now();
        let groups = group_dataset_paths(paths);

        let results = join_all(groups.into_iter().map(|(group, datasets)| {
            let request = request.clone();
            async move { self.retrieve_key(&group, Some(datasets), request).await }
        }))
        .await;
        let result = flatten(results);

        self.timed("retrieve_datasets", &self.path, start, result)
            .await
    }

    /// Every record of each group, in the order of `groups`
    pub async fn retrieve_groups(
        &self,
        groups: &[String],
        request: Request,
    ) -> Result<Vec<DataRecord>, StorageError> {
        let start = Instant::now();
        let results = join_all(groups.iter().map(|group| {
            let request = request.clone();
            async move { self.retrieve_key(group, None, request).await }
        }))
        .await;
        let result = flatten(results);

        self.timed("retrieve_groups", &self.path, start, result)
            .await
    }

    /// Names of the datasets stored in `group`
    pub async fn get_datasets(&self, group: &str) -> Result<Vec<String>, StorageError> {
        let response = self
            .invoke(self.key(group), Invocation::dataset_names()?)
            .await?;
        decode_response(&response)
    }

    /// Store a single new record, failing if the name is taken
    pub async fn create_dataset(&self, mut record: DataRecord) -> Result<(), StorageError> {
        let key = self.key(&record.group);
        let correlation = record.correlation.take();

        let status = self
            .invoke_store(key, vec![record], StoreOp::StoreOnly)
            .await?;
        match status.exceptions.into_iter().next() {
            Some(mut exception) => {
                if let (Some(record), Some(correlation)) = (exception.record_mut(), correlation) {
                    record.correlation = Some(correlation);
                }
                Err(exception)
            }
            None => Ok(()),
        }
    }

    /// Delete datasets given as `group/dataset` paths
    pub async fn delete_datasets(&self, datasets: &[String]) -> Result<(), StorageError> {
        let start = Instant::now();
        tracing::info!("Deleting {} datasets: {:?}", self.path, datasets);
        let groups = group_dataset_paths(datasets);

        let result = match &self.through {
            Some(through) => {
                let keys = groups.iter().map(|(group, _)| self.key(group)).collect();
                let through = Arc::clone(through);
                let path = self.path.clone();
                let datasets = datasets.to_vec();
                let (cleared, passed) = tokio::join!(
                    self.clear_keys(keys),
                    run_blocking(move || through.delete_datasets(&path, &datasets))
                );
                passed.and(cleared)
            }
            None => {
                let results = join_all(groups.into_iter().map(|(group, datasets)| async move {
                    let response = self
                        .invoke(self.key(&group), Invocation::delete_datasets(datasets)?)
                        .await?;
                    let removed: Vec<String> = decode_response(&response)?;
                    tracing::debug!("Removed {:?} from {}", removed, self.key(&group));
                    Ok::<_, StorageError>(removed)
                }))
                .await;
                flatten(results).map(|_| ())
            }
        };

        self.timed("delete_datasets", &self.path, start, result)
            .await
    }

    pub async fn delete_groups(&self, groups: &[String]) -> Result<(), StorageError> {
        let start = Instant::now();
        tracing::info!("Deleting {} groups: {:?}", self.path, groups);
        let keys: Vec<StorageKey> = groups.iter().map(|group| self.key(group)).collect();

        let result = match &self.through {
            Some(through) => {
                let through = Arc::clone(through);
                let path = self.path.clone();
                let groups = groups.to_vec();
                let (cleared, passed) = tokio::join!(
                    self.clear_keys(keys),
                    run_blocking(move || through.delete_groups(&path, &groups))
                );
                passed.and(cleared)
            }
            None => self.remove_keys(keys).await,
        };

        self.timed("delete_groups", &self.path, start, result)
            .await
    }

    /// Remove every group of this path from the cache and the backing store
    pub async fn delete_files(&self) -> Result<(), StorageError> {
        let start = Instant::now();
        tracing::info!("Deleting {}", self.path);

        let result = async {
            let groups = self
                .query_column(CacheQuery::GroupsForPath(self.path.clone()))
                .await?;
            tracing::info!("Deleting {} keys for path {}", groups.len(), self.path);
            let keys = groups.iter().map(|group| self.key(group)).collect();
            self.remove_keys(keys).await?;

            if let Some(through) = &self.through {
                let through = Arc::clone(through);
                let path = self.path.clone();
                run_blocking(move || through.delete_files(&path)).await?;
            }
            Ok::<(), StorageError>(())
        }
        .await;

        self.timed("delete_files", &self.path, start, result)
            .await
    }

    /// Purge cached paths older than their cutoff.
    ///
    /// Each cached path is checked against the first pattern of `cutoffs` it
    /// matches; it is purged when it embeds a date before that cutoff.
    pub async fn delete_orphan_data(
        &self,
        cutoffs: &BTreeMap<String, DateTime<Utc>>,
    ) -> Result<(), StorageError> {
        let start = Instant::now();
        tracing::info!("Deleting {} orphan data: {:?}", self.path, cutoffs);

        let result = async {
            let patterns = cutoffs
                .iter()
                .map(|(pattern, cutoff)| {
                    Regex::new(pattern)
                        .map(|regex| (regex, *cutoff))
                        .map_err(|e| StorageError::InvalidRequest(e.to_string()))
                })
                .collect::<Result<Vec<_>, _>>()?;

            let paths = self.query_column(CacheQuery::DistinctPaths).await?;
            let purge: Vec<String> = paths
                .into_iter()
                .filter(|path| is_orphan(path, &patterns))
                .collect();

            if !purge.is_empty() {
                tracing::info!("Purging orphaned paths {:?}", purge);
                let mut keys = Vec::new();
                for path in &purge {
                    let groups = self
                        .query_column(CacheQuery::GroupsForPath(path.clone()))
                        .await?;
                    keys.extend(groups.into_iter().map(|group| StorageKey::new(path.clone(), group)));
                }
                self.remove_keys(keys).await?;
            }

            if let Some(through) = &self.through {
                let through = Arc::clone(through);
                let path = self.path.clone();
                let cutoffs = cutoffs.clone();
                run_blocking(move || through.delete_orphan_data(&path, &cutoffs)).await?;
            }
            Ok::<(), StorageError>(())
        }
        .await;

        self.timed("delete_orphan_data", &self.path, start, result)
            .await
    }

    /// Links between files are not supported by cache-backed stores
    pub async fn create_links(&self, links: &BTreeMap<String, String>) -> Result<(), StorageError> {
        Err(StorageError::Unsupported(format!(
            "Cannot create {} links in {}",
            links.len(),
            self.path
        )))
    }

    pub async fn repack(&self, compression: RepackCompression) -> Result<(), StorageError> {
        let through = self.require_through("repack")?;
        let path = self.path.clone();
        run_blocking(move || through.repack(&path, compression)).await
    }

    pub async fn copy(&self, options: CopyOptions) -> Result<(), StorageError> {
        let through = self.require_through("copy")?;
        let path = self.path.clone();
        run_blocking(move || through.copy(&path, &options)).await
    }

    fn require_through(&self, operation: &str) -> Result<Arc<dyn ThroughStore>, StorageError> {
        self.through.clone().ok_or_else(|| {
            StorageError::Unsupported(format!(
                "{} of {} needs a pass-through store",
                operation, self.path
            ))
        })
    }

    /// First column of every row `query` returns
    async fn query_column(&self, query: CacheQuery) -> Result<BTreeSet<String>, StorageError> {
        self.accessor
            .do_sync_op(|cache| {
                let query = query.clone();
                async move {
                    let mut rows = cache.query(&query).await?;
                    let mut values = BTreeSet::new();
                    while let Some(row) = rows.next().await {
                        if let Some(value) = row?.into_iter().next() {
                            values.insert(value);
                        }
                    }
                    Ok::<_, CacheError>(values)
                }
            })
            .await
    }

    async fn remove_keys(&self, keys: Vec<StorageKey>) -> Result<(), StorageError> {
        if keys.is_empty() {
            return Ok(());
        }
        self.accessor
            .do_async_op(move |cache| {
                let keys = keys.clone();
                async move { cache.remove_all(&keys).await }
            })
            .await
    }

    /// Drop cached entries, leaving the backing store alone
    async fn clear_keys(&self, keys: Vec<StorageKey>) -> Result<(), StorageError> {
        self.accessor
            .do_async_op(move |cache| {
                let keys = keys.clone();
                async move {
                    for key in &keys {
                        cache.clear(key).await?;
                    }
                    Ok::<(), CacheError>(())
                }
            })
            .await
    }
}

async fn run_blocking<F>(call: F) -> Result<(), StorageError>
where
    F: FnOnce() -> Result<(), StorageError> + Send + 'static,
{
    tokio::task::spawn_blocking(call)
        .await
        .map_err(|e| StorageError::ThroughStore(e.to_string()))?
}

fn flatten<T>(results: Vec<Result<Vec<T>, StorageError>>) -> Result<Vec<T>, StorageError> {
    let mut flat = Vec::new();
    for result in results {
        flat.extend(result?);
    }
    Ok(flat)
}

/// Split `group/dataset` paths, keeping groups in order of first appearance
fn group_dataset_paths(paths: &[String]) -> Vec<(String, BTreeSet<String>)> {
    let mut groups: Vec<(String, BTreeSet<String>)> = Vec::new();
    for path in paths {
        let (group, dataset) = match path.rfind(SEPARATOR) {
            Some(index) => (&path[..index], &path[index + SEPARATOR.len()..]),
            None => ("", path.as_str()),
        };
        match groups.iter_mut().find(|(name, _)| name == group) {
            Some((_, datasets)) => {
                datasets.insert(dataset.to_string());
            }
            None => groups.push((group.to_string(), BTreeSet::from([dataset.to_string()]))),
        }
    }
    groups
}

fn normalize_dataset_path(group: &str, dataset: &str) -> (String, String) {
    let mut group = if group == SEPARATOR { "" } else { group }.to_string();
    let mut dataset = dataset.to_string();

    if group.is_empty() {
        if let Some(index) = dataset.rfind(SEPARATOR) {
            group = dataset[..index].to_string();
            dataset = dataset[index + SEPARATOR.len()..].to_string();
        }
    }

    let doubled = SEPARATOR.repeat(2);
    let mut group = group.replace(&doubled, SEPARATOR);
    if group.ends_with(SEPARATOR) {
        group.truncate(group.len() - SEPARATOR.len());
    }
    (group, dataset)
}

fn is_orphan(path: &str, patterns: &[(Regex, DateTime<Utc>)]) -> bool {
    let Some((_, cutoff)) = patterns.iter().find(|(regex, _)| regex.is_match(path)) else {
        return false;
    };
    embedded_date(path).map_or(false, |date| date < *cutoff)
}

/// Midnight UTC of the first date embedded in `path`
fn embedded_date(path: &str) -> Option<DateTime<Utc>> {
    let captures = ORPHAN_DATE.captures(path)?;
    let year: i32 = format!("{}{}", &captures[1], &captures[2]).parse().ok()?;
    let month: u32 = captures[3].parse().ok()?;
    let day: u32 = captures[4].parse().ok()?;
    let midnight = NaiveDate::from_ymd_opt(year, month, day)?.and_hms_opt(0, 0, 0)?;
    Some(Utc.from_utc_datetime(&midnight))
}
