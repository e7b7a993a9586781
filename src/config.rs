use serde::{Deserialize, Serialize};

use crate::error::{DatastoreError, Result};

pub const ENV_DATABASE_PATH: &str = "DATASTORE_DATABASE_PATH";
pub const ENV_MIN_CONNECTIONS: &str = "DATASTORE_MIN_CONNECTIONS";
pub const ENV_MAX_CONNECTIONS: &str = "DATASTORE_MAX_CONNECTIONS";
pub const ENV_MAX_RETRIES: &str = "DATASTORE_MAX_RETRIES";
pub const ENV_RETRY_TIMEOUT_MS: &str = "DATASTORE_RETRY_TIMEOUT_MS";
pub const ENV_DEVELOPMENT: &str = "DATASTORE_DEVELOPMENT";

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    pub min_connections: u32,
    pub max_connections: u32,
    pub acquire_timeout_ms: u64,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            min_connections: 2,
            max_connections: 5,
            acquire_timeout_ms: 5_000,
        }
    }
}

/// Retry policy for transient connection-level failures.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub retry_timeout_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 5,
            retry_timeout_ms: 400,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatastoreConfig {
    /// SQLite file. `None` opens a private in-memory database.
    pub database_path: Option<String>,
    pub pool: PoolConfig,
    pub retry: RetryConfig,
    /// Enables destructive maintenance operations such as `truncate_db`.
    pub development_mode: bool,
    /// Positions fetched per batch while migrating.
    pub migration_batch_size: usize,
}

impl Default for DatastoreConfig {
    fn default() -> Self {
        Self {
            database_path: None,
            pool: PoolConfig::default(),
            retry: RetryConfig::default(),
            development_mode: false,
            migration_batch_size: 1_000,
        }
    }
}

impl DatastoreConfig {
    pub fn in_memory() -> Self {
        Self::default()
    }

    pub fn sqlite(path: impl Into<String>) -> Self {
        Self {
            database_path: Some(path.into()),
            ..Self::default()
        }
    }

    /// Defaults overlaid with the `DATASTORE_*` environment variables.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`DatastoreConfig::from_env`] with an injectable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        if let Some(path) = lookup(ENV_DATABASE_PATH).filter(|p| !p.is_empty()) {
            config.database_path = Some(path);
        }
        if let Some(raw) = lookup(ENV_MIN_CONNECTIONS) {
            config.pool.min_connections = parse_var(ENV_MIN_CONNECTIONS, &raw)?;
        }
        if let Some(raw) = lookup(ENV_MAX_CONNECTIONS) {
            config.pool.max_connections = parse_var(ENV_MAX_CONNECTIONS, &raw)?;
        }
        if let Some(raw) = lookup(ENV_MAX_RETRIES) {
            config.retry.max_retries = parse_var(ENV_MAX_RETRIES, &raw)?;
        }
        if let Some(raw) = lookup(ENV_RETRY_TIMEOUT_MS) {
            config.retry.retry_timeout_ms = parse_var(ENV_RETRY_TIMEOUT_MS, &raw)?;
        }
        if let Some(raw) = lookup(ENV_DEVELOPMENT) {
            config.development_mode = parse_flag(ENV_DEVELOPMENT, &raw)?;
        }
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let pool = &self.pool;
        if pool.min_connections == 0 || pool.min_connections > pool.max_connections {
            return Err(DatastoreError::InvalidFormat(format!(
                "pool bounds must satisfy 1 <= min <= max, got min={} max={}",
                pool.min_connections, pool.max_connections
            )));
        }
        if self.migration_batch_size == 0 {
            return Err(DatastoreError::InvalidFormat(
                "migration_batch_size must be positive".into(),
            ));
        }
        Ok(())
    }
}

fn parse_var<T: std::str::FromStr>(key: &str, raw: &str) -> Result<T> {
    raw.trim()
        .parse()
        .map_err(|_| DatastoreError::InvalidFormat(format!("invalid value for {key}: {raw:?}")))
}

fn parse_flag(key: &str, raw: &str) -> Result<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" | "" => Ok(false),
        _ => Err(DatastoreError::InvalidFormat(format!(
            "invalid value for {key}: {raw:?}"
        ))),
    }
}
