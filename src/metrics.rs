use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

/// Bounded log of timed storage operations
#[derive(Debug, Clone)]
pub struct PerformanceLog {
    history: Arc<RwLock<VecDeque<OperationSample>>>,
    config: MetricsConfig,
}

/// Configuration for operation timing
///
/// # Default Values
/// - `max_history_size`: 1000 samples
/// - `track_operations`: true
/// - `slow_operation_threshold`: 10 seconds
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Maximum number of samples to keep
    pub max_history_size: usize,
    /// Keep samples at all; slow operations are logged regardless
    pub track_operations: bool,
    /// Operations slower than this are logged as warnings
    pub slow_operation_threshold: Duration,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            max_history_size: 1000,
            track_operations: true,
            slow_operation_threshold: Duration::from_secs(10),
        }
    }
}

/// One timed operation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperationSample {
    pub timestamp: DateTime<Utc>,
    pub operation: String,
    pub target: String,
    pub duration: Duration,
    pub success: bool,
}

/// Aggregate over the samples of one operation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationSummary {
    pub count: u64,
    pub failures: u64,
    pub total: Duration,
    pub max: Duration,
    pub slow: u64,
}

impl OperationSummary {
    pub fn average(&self) -> Duration {
        if self.count == 0 {
            Duration::ZERO
        } else {
            self.total / self.count as u32
        }
    }
}

impl PerformanceLog {
    pub fn new(config: MetricsConfig) -> Self {
        Self {
            history: Arc::new(RwLock::new(VecDeque::new())),
            config,
        }
    }

    pub fn config(&self) -> &MetricsConfig {
        &self.config
    }

    /// Record one operation on `target`
    pub async fn record(&self, operation: &str, target: &str, duration: Duration, success: bool) {
        if duration > self.config.slow_operation_threshold {
            tracing::warn!(
                "{} of {} took {:.3}s",
                operation,
                target,
                duration.as_secs_f64()
            );
        } else {
            tracing::debug!("{} of {} took {:?}", operation, target, duration);
        }

        #[cfg(feature = "metrics")]
        {
            ::metrics::histogram!("datastore_cache.operation_seconds", duration.as_secs_f64(), "operation" => operation.to_string());
            if !success {
                ::metrics::increment_counter!("datastore_cache.operation_failures", "operation" => operation.to_string());
            }
        }

        if !self.config.track_operations {
            return;
        }

        let mut history = self.history.write().await;
        history.push_back(OperationSample {
            timestamp: Utc::now(),
            operation: operation.to_string(),
            target: target.to_string(),
            duration,
            success,
        });

        // Maintain history size limit
        while history.len() > self.config.max_history_size {
            history.pop_front();
        }
    }

    /// Samples recorded since `since`, oldest first
    pub async fn samples_since(&self, since: DateTime<Utc>) -> Vec<OperationSample> {
        let history = self.history.read().await;
        history
            .iter()
            .filter(|s| s.timestamp >= since)
            .cloned()
            .collect()
    }

    /// Per-operation aggregates over the retained history
    pub async fn summary(&self) -> BTreeMap<String, OperationSummary> {
        let history = self.history.read().await;
        let mut summary: BTreeMap<String, OperationSummary> = BTreeMap::new();
        for sample in history.iter() {
            let entry = summary
                .entry(sample.operation.clone())
                .or_insert(OperationSummary {
                    count: 0,
                    failures: 0,
                    total: Duration::ZERO,
                    max: Duration::ZERO,
                    slow: 0,
                });
            entry.count += 1;
            entry.total += sample.duration;
            entry.max = entry.max.max(sample.duration);
            if !sample.success {
                entry.failures += 1;
            }
            if sample.duration > self.config.slow_operation_threshold {
                entry.slow += 1;
            }
        }
        summary
    }

    /// Summary as JSON
    pub async fn report_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(&self.summary().await)
    }

    pub async fn clear(&self) {
        self.history.write().await.clear();
    }
}
