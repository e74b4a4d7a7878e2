use crate::chunk::DEFAULT_CHUNK_SIZE;
use crate::error::ConfigError;
use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub const ENV_OP_NUM_ATTEMPTS: &str = "DATASTORE_CACHE_OP_NUM_ATTEMPTS";
pub const ENV_OP_TIMEOUT_SECS: &str = "DATASTORE_CACHE_OP_TIMEOUT_SECS";
pub const ENV_RECOVERY_TIMEOUT_SECS: &str = "DATASTORE_CACHE_RECOVERY_TIMEOUT_SECS";
pub const ENV_RETRY_DELAY_MS: &str = "DATASTORE_CACHE_RETRY_DELAY_MS";

static GLOBAL_RETRY_CONFIG: OnceCell<RetryConfig> = OnceCell::new();

/// Retry budget for cache operations
///
/// # Default Values
/// - `max_attempts`: 3
/// - `op_timeout`: 60 seconds
/// - `recovery_timeout`: 60 seconds
/// - `retry_delay`: 1 second
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Attempts per operation, including the first
    pub max_attempts: u32,

    /// Time limit of one asynchronous attempt
    pub op_timeout: Duration,

    /// How long to wait for a failed client to reconnect
    pub recovery_timeout: Duration,

    /// Pause between attempts that did not recover
    pub retry_delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            op_timeout: Duration::from_secs(60),
            recovery_timeout: Duration::from_secs(60),
            retry_delay: Duration::from_secs(1),
        }
    }
}

impl RetryConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_attempts == 0 {
            return Err(ConfigError::Invalid {
                key: ENV_OP_NUM_ATTEMPTS,
                value: self.max_attempts.to_string(),
                reason: "at least one attempt is required".to_string(),
            });
        }
        if self.op_timeout.is_zero() {
            return Err(ConfigError::Invalid {
                key: ENV_OP_TIMEOUT_SECS,
                value: "0".to_string(),
                reason: "timeout must be positive".to_string(),
            });
        }
        if self.recovery_timeout.is_zero() {
            return Err(ConfigError::Invalid {
                key: ENV_RECOVERY_TIMEOUT_SECS,
                value: "0".to_string(),
                reason: "timeout must be positive".to_string(),
            });
        }
        Ok(())
    }

    /// Read every value from the environment; none may be missing
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read every value through `lookup`; none may be missing
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let config = Self {
            max_attempts: parse(&lookup, ENV_OP_NUM_ATTEMPTS)?,
            op_timeout: Duration::from_secs(parse(&lookup, ENV_OP_TIMEOUT_SECS)?),
            recovery_timeout: Duration::from_secs(parse(&lookup, ENV_RECOVERY_TIMEOUT_SECS)?),
            retry_delay: Duration::from_millis(parse(&lookup, ENV_RETRY_DELAY_MS)?),
        };
        config.validate()?;
        Ok(config)
    }

    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Install the process-wide configuration. Fails if already installed.
    pub fn install(self) -> Result<&'static RetryConfig, ConfigError> {
        self.validate()?;
        GLOBAL_RETRY_CONFIG
            .try_insert(self)
            .map_err(|(current, _)| ConfigError::Invalid {
                key: "retry config",
                value: format!("{:?}", current),
                reason: "already installed".to_string(),
            })
    }

    /// The process-wide configuration, read from the environment on first use
    pub fn global() -> Result<&'static RetryConfig, ConfigError> {
        GLOBAL_RETRY_CONFIG.get_or_try_init(Self::from_env)
    }
}

fn parse<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &'static str,
) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    let raw = lookup(key).ok_or(ConfigError::Missing(key))?;
    raw.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
        key,
        value: raw.clone(),
        reason: e.to_string(),
    })
}

/// What the fast store path does when the key is not resident in the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PreviousValuePolicy {
    /// Consult the cache loader, so records only held by the backing store
    /// are still seen as duplicates
    Load,
    /// Only look at resident entries; an evicted entry is overwritten
    ResidentOnly,
}

/// Behaviour of a [`CacheDataStore`](crate::store::CacheDataStore)
///
/// # Default Values
/// There is no `Default`: `previous_value` must be chosen explicitly.
/// [`StoreConfig::new`] uses
/// - `chunk_size`: 256
/// - `fast_store`: true
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Edge length of compression chunks
    pub chunk_size: usize,

    /// Use conditional puts instead of invocations where possible
    pub fast_store: bool,

    /// Previous-value lookup of the fast path
    pub previous_value: PreviousValuePolicy,
}

impl StoreConfig {
    pub fn new(previous_value: PreviousValuePolicy) -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            fast_store: true,
            previous_value,
        }
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size;
        self
    }

    pub fn with_fast_store(mut self, fast_store: bool) -> Self {
        self.fast_store = fast_store;
        self
    }
}

/// In-process cache settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Name reported by the cache
    pub name: String,

    /// Maximum memory cache size in bytes
    pub max_memory_size: usize,

    /// Time-to-live for cached entries
    pub ttl: Option<Duration>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            name: "datastore".to_string(),
            max_memory_size: 100 * 1024 * 1024, // 100MB
            ttl: None,
        }
    }
}
