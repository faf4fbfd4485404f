//! Pool configuration and connection-parameter sources

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

/// Configuration for pool behavior.
///
/// All knobs have the conservative defaults of the reference behavior: a pool
/// of one, no pre-warming, no proactive top-off, fail fast on exhaustion, and
/// no age or idle limit.
///
/// # Examples
///
/// ```
/// use leasepool::PoolConfig;
/// use std::time::Duration;
///
/// let config = PoolConfig::new()
///     .with_max_pool_size(10)
///     .with_acquire_increment(3)
///     .with_retry(5, Duration::from_millis(200));
///
/// assert_eq!(config.max_pool_size, 10);
/// assert_eq!(config.retry_attempts, 5);
/// ```
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Maximum number of entries the pool will ever hold, leased or not.
    pub max_pool_size: usize,

    /// Once the available queue is empty, proactively create this many spare
    /// handles before `acquire` returns. Capped so the total never exceeds
    /// `max_pool_size`. Zero disables top-off.
    pub acquire_increment: usize,

    /// Number of handles fully materialized before the constructor returns.
    pub initial_pool_size: usize,

    /// Invoke the handle's flush hook before it returns to the pool.
    pub auto_flush_on_release: bool,

    /// How long to sleep between retry rounds when the pool is exhausted.
    ///
    /// The wait is a blocking `thread::sleep` of the calling thread, with no
    /// cancellation mechanism. A known limitation, kept as-is.
    pub retry_wait: Duration,

    /// How many extra rounds to try when the pool is exhausted before
    /// reporting the no-handle outcome. Zero fails fast.
    pub retry_attempts: u32,

    /// Maximum age of a handle before it is discarded instead of leased.
    /// `None` means no limit. Checked lazily, only at acquisition time.
    pub max_handle_age: Option<Duration>,

    /// Maximum time a handle may sit unleased before it is discarded instead
    /// of leased. `None` means no limit. Checked lazily, only at acquisition
    /// time.
    pub max_idle: Option<Duration>,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_pool_size: 1,
            acquire_increment: 0,
            initial_pool_size: 0,
            auto_flush_on_release: false,
            retry_wait: Duration::from_millis(300),
            retry_attempts: 0,
            max_handle_age: None,
            max_idle: None,
        }
    }
}

impl PoolConfig {
    /// Create a new configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the maximum pool size.
    pub fn with_max_pool_size(mut self, size: usize) -> Self {
        self.max_pool_size = size;
        self
    }

    /// Set how many spare handles to create once the available queue drains.
    pub fn with_acquire_increment(mut self, increment: usize) -> Self {
        self.acquire_increment = increment;
        self
    }

    /// Set how many handles to materialize eagerly at construction.
    pub fn with_initial_pool_size(mut self, size: usize) -> Self {
        self.initial_pool_size = size;
        self
    }

    /// Flush handles before they return to the pool.
    pub fn with_auto_flush_on_release(mut self) -> Self {
        self.auto_flush_on_release = true;
        self
    }

    /// Set the retry policy applied when the pool is exhausted.
    pub fn with_retry(mut self, attempts: u32, wait: Duration) -> Self {
        self.retry_attempts = attempts;
        self.retry_wait = wait;
        self
    }

    /// Set the maximum handle age before lazy eviction.
    pub fn with_max_handle_age(mut self, age: Duration) -> Self {
        self.max_handle_age = Some(age);
        self
    }

    /// Set the maximum idle time before lazy eviction.
    pub fn with_max_idle(mut self, idle: Duration) -> Self {
        self.max_idle = Some(idle);
        self
    }

    /// Load a configuration from a JSON file.
    ///
    /// Absent fields fall back to their defaults. The millisecond fields
    /// `maxHandleAgeMillis` and `maxIdleMillis` treat any value less than or
    /// equal to zero as "no limit".
    ///
    /// ```json
    /// {
    ///     "maxPoolSize": 8,
    ///     "acquireIncrement": 2,
    ///     "retryAttempts": 3,
    ///     "retryWaitMillis": 250,
    ///     "maxHandleAgeMillis": 3600000
    /// }
    /// ```
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let file: PoolConfigFile =
            serde_json::from_str(&raw).map_err(|source| ConfigError::Parse {
                path: path.display().to_string(),
                source,
            })?;
        Ok(file.into())
    }
}

/// Wire representation of a JSON pool configuration file.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct PoolConfigFile {
    max_pool_size: usize,
    acquire_increment: usize,
    initial_pool_size: usize,
    auto_flush_on_release: bool,
    retry_wait_millis: u64,
    retry_attempts: u32,
    max_handle_age_millis: i64,
    max_idle_millis: i64,
}

impl Default for PoolConfigFile {
    fn default() -> Self {
        Self {
            max_pool_size: 1,
            acquire_increment: 0,
            initial_pool_size: 0,
            auto_flush_on_release: false,
            retry_wait_millis: 300,
            retry_attempts: 0,
            max_handle_age_millis: -1,
            max_idle_millis: -1,
        }
    }
}

fn millis_limit(millis: i64) -> Option<Duration> {
    if millis > 0 {
        Some(Duration::from_millis(millis as u64))
    } else {
        None
    }
}

impl From<PoolConfigFile> for PoolConfig {
    fn from(file: PoolConfigFile) -> Self {
        Self {
            max_pool_size: file.max_pool_size,
            acquire_increment: file.acquire_increment,
            initial_pool_size: file.initial_pool_size,
            auto_flush_on_release: file.auto_flush_on_release,
            retry_wait: Duration::from_millis(file.retry_wait_millis),
            retry_attempts: file.retry_attempts,
            max_handle_age: millis_limit(file.max_handle_age_millis),
            max_idle: millis_limit(file.max_idle_millis),
        }
    }
}

/// Parameters handed to the [`HandleFactory`](crate::HandleFactory) when a
/// handle is materialized. Opaque to the pool itself.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ConnectionParams {
    /// Endpoint the factory should connect to.
    pub url: String,

    /// Username, if the endpoint requires authentication.
    pub user: Option<String>,

    /// Password. Ignored when `user` is absent.
    pub password: Option<String>,
}

impl ConnectionParams {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            user: None,
            password: None,
        }
    }

    pub fn with_credentials(
        mut self,
        user: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        self.user = Some(user.into());
        self.password = Some(password.into());
        self
    }

    /// Load connection parameters from a JSON file.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        serde_json::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })
    }
}

/// Failure reading a JSON configuration source.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("could not read config file {path}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("could not parse config file {path}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },
}
