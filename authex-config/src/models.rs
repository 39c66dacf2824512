use std::time::Duration;

/// Hard default for the server name when neither the current key nor the
/// deprecated one is present.
pub const DEFAULT_SERVER_NAME: &str = "authex";

pub const DEFAULT_TICK_INTERVAL_MS: u64 = 500;
pub const DEFAULT_FETCHER_CACHE_SIZE: usize = 1024;
pub const DEFAULT_METASTORE_TIMEOUT_MS: u64 = 10_000;

/// Fully resolved configuration handed to the server after file + env
/// composition and validation.
#[derive(Debug, Clone)]
pub struct Config {
    pub server: ServerConfig,
    pub follower: FollowerConfig,
    pub database: DatabaseConfig,
    pub redis: Option<RedisConfig>,
    pub metastore: MetastoreConfig,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Logical name of this authorization server instance. Mandatory in the
    /// sense that resolution always yields one: the `server.name` key, else
    /// the deprecated `server.principal` key, else [`DEFAULT_SERVER_NAME`].
    pub name: String,
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone)]
pub struct FollowerConfig {
    /// Whether the path image is kept in sync with HDFS; controls both the
    /// empty-path-snapshot trigger and full-image persistence.
    pub hdfs_sync_enabled: bool,
    /// Whether to subscribe to the force-full-update topic at all.
    pub full_update_subscribe_enabled: bool,
    pub tick_interval_ms: u64,
    pub fetcher_cache_size: usize,
}

impl FollowerConfig {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms.max(1))
    }
}

impl Default for FollowerConfig {
    fn default() -> Self {
        Self {
            hdfs_sync_enabled: true,
            full_update_subscribe_enabled: true,
            tick_interval_ms: DEFAULT_TICK_INTERVAL_MS,
            fetcher_cache_size: DEFAULT_FETCHER_CACHE_SIZE,
        }
    }
}

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: String,
}

#[derive(Debug, Clone)]
pub struct RedisConfig {
    pub url: String,
}

#[derive(Debug, Clone)]
pub struct MetastoreConfig {
    /// Base URL of the metastore JSON gateway.
    pub base_url: String,
    pub timeout_ms: u64,
}

impl MetastoreConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms.max(1))
    }
}
