//! Retry envelope around cache operations.
//!
//! Every call into the cache goes through a [`CacheAccessor`]. An attempt that
//! fails with a retryable error waits for the cluster to recover (bounded by
//! the recovery timeout) and, when it did not recover, pauses for the retry
//! delay before the next attempt. Once the budget is spent the last error is
//! raised as [`StorageError::CacheOperation`].

use crate::cache::Cache;
use crate::config::RetryConfig;
use crate::error::{CacheError, StorageError};
use std::future::Future;
use std::sync::Arc;

pub struct CacheAccessor<C: Cache> {
    cache: Arc<C>,
    retry: RetryConfig,
    allow_retry: bool,
}

impl<C: Cache> Clone for CacheAccessor<C> {
    fn clone(&self) -> Self {
        Self {
            cache: Arc::clone(&self.cache),
            retry: self.retry.clone(),
            allow_retry: self.allow_retry,
        }
    }
}

impl<C: Cache> CacheAccessor<C> {
    pub fn new(cache: Arc<C>, retry: RetryConfig) -> Self {
        Self {
            cache,
            retry,
            allow_retry: true,
        }
    }

    /// Accessor using the process-wide retry configuration
    pub fn with_global_config(cache: Arc<C>) -> Result<Self, StorageError> {
        Ok(Self::new(cache, RetryConfig::global()?.clone()))
    }

    /// Copy of this accessor that makes a single attempt per operation
    pub fn without_retries(&self) -> Self {
        Self {
            allow_retry: false,
            ..self.clone()
        }
    }

    pub fn cache(&self) -> &Arc<C> {
        &self.cache
    }

    pub fn retry_config(&self) -> &RetryConfig {
        &self.retry
    }

    fn attempts(&self) -> u32 {
        if self.allow_retry {
            self.retry.max_attempts.max(1)
        } else {
            1
        }
    }

    /// Run `op` in place, without a per-attempt timeout
    pub async fn do_sync_op<T, F, Fut>(&self, op: F) -> Result<T, StorageError>
    where
        F: Fn(Arc<C>) -> Fut,
        Fut: Future<Output = Result<T, CacheError>>,
    {
        let attempts = self.attempts();
        let mut attempt = 1;
        loop {
            let error = match op(Arc::clone(&self.cache)).await {
                Ok(value) => return Ok(value),
                Err(e) => e,
            };
            self.handle_failure(error, attempt, attempts).await?;
            attempt += 1;
        }
    }

    /// Run `op` as a spawned task bounded by the operation timeout. A timed
    /// out attempt is aborted before the next one starts.
    pub async fn do_async_op<T, F, Fut>(&self, op: F) -> Result<T, StorageError>
    where
        F: Fn(Arc<C>) -> Fut,
        Fut: Future<Output = Result<T, CacheError>> + Send + 'static,
        T: Send + 'static,
    {
        let attempts = self.attempts();
        let mut attempt = 1;
        loop {
            let mut handle = tokio::spawn(op(Arc::clone(&self.cache)));
            let result = match tokio::time::timeout(self.retry.op_timeout, &mut handle).await {
                Ok(Ok(result)) => result,
                Ok(Err(join_error)) => Err(CacheError::Aborted(join_error.to_string())),
                Err(_) => {
                    handle.abort();
                    tracing::debug!(
                        "Cancelled {} operation after {:?}",
                        self.cache.name(),
                        self.retry.op_timeout
                    );
                    Err(CacheError::Timeout(self.retry.op_timeout))
                }
            };

            let error = match result {
                Ok(value) => return Ok(value),
                Err(e) => e,
            };
            self.handle_failure(error, attempt, attempts).await?;
            attempt += 1;
        }
    }

    /// Decide what follows a failed attempt: `Ok` to try again, or the
    /// terminal error.
    async fn handle_failure(
        &self,
        error: CacheError,
        attempt: u32,
        attempts: u32,
    ) -> Result<(), StorageError> {
        if !error.is_retryable() {
            tracing::debug!("{} operation failed: {}", self.cache.name(), error);
            return Err(StorageError::Cache(error));
        }

        let recovered = match error.recovery() {
            Some(recovery) => {
                tracing::info!(
                    "Waiting up to {:?} for {} to recover: {}",
                    self.retry.recovery_timeout,
                    self.cache.name(),
                    error
                );
                recovery.wait(self.retry.recovery_timeout).await
            }
            None => false,
        };

        if attempt >= attempts {
            tracing::error!(
                "{} operation failed after {} attempt(s): {}",
                self.cache.name(),
                attempt,
                error
            );
            return Err(StorageError::CacheOperation {
                attempts: attempt,
                source: error,
            });
        }

        if recovered {
            tracing::warn!(
                "Attempt {}/{} on {} failed, cache recovered: {}",
                attempt,
                attempts,
                self.cache.name(),
                error
            );
        } else {
            tracing::warn!(
                "Attempt {}/{} on {} failed, retrying in {:?}: {}",
                attempt,
                attempts,
                self.cache.name(),
                self.retry.retry_delay,
                error
            );
            tokio::time::sleep(self.retry.retry_delay).await;
        }
        Ok(())
    }
}
