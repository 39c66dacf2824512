//! Composition of the effective [`Config`] from a TOML file and environment
//! overrides. Environment values always win over file values; defaults fill
//! whatever is left.

pub mod error;

use std::env;
use std::path::Path;

use serde::Deserialize;

use crate::models::{
    Config, DatabaseConfig, FollowerConfig, MetastoreConfig, RedisConfig, ServerConfig,
    DEFAULT_FETCHER_CACHE_SIZE, DEFAULT_METASTORE_TIMEOUT_MS, DEFAULT_SERVER_NAME,
    DEFAULT_TICK_INTERVAL_MS,
};
use crate::validation::{self, ConfigWarning, ConfigWarnings};
use error::ConfigLoadError;

/// Raw file shape; every field optional so partial files compose cleanly.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct FileConfig {
    #[serde(default)]
    server: FileServer,
    #[serde(default)]
    follower: FileFollower,
    #[serde(default)]
    database: FileDatabase,
    #[serde(default)]
    redis: Option<FileRedis>,
    #[serde(default)]
    metastore: FileMetastore,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct FileServer {
    name: Option<String>,
    /// Deprecated spelling of `name`; kept for config files written against
    /// earlier releases.
    principal: Option<String>,
    host: Option<String>,
    port: Option<u16>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct FileFollower {
    hdfs_sync_enabled: Option<bool>,
    full_update_subscribe_enabled: Option<bool>,
    tick_interval_ms: Option<u64>,
    fetcher_cache_size: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct FileDatabase {
    url: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct FileRedis {
    url: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct FileMetastore {
    base_url: Option<String>,
    timeout_ms: Option<u64>,
}

/// Loads and composes configuration. Stateless; exists so callers can pick
/// the file path (or skip the file entirely) without a pile of free
/// functions.
#[derive(Debug, Default)]
pub struct ConfigLoader;

impl ConfigLoader {
    pub fn new() -> Self {
        Self
    }

    /// Compose from an optional TOML file plus the process environment.
    pub fn load(
        &self,
        path: Option<&Path>,
    ) -> Result<(Config, ConfigWarnings), ConfigLoadError> {
        let file = match path {
            Some(path) => read_file(path)?,
            None => FileConfig::default(),
        };
        compose(file)
    }
}

fn read_file(path: &Path) -> Result<FileConfig, ConfigLoadError> {
    let display = path.display().to_string();
    let raw = std::fs::read_to_string(path).map_err(|source| ConfigLoadError::Read {
        path: display.clone(),
        source,
    })?;
    toml::from_str(&raw).map_err(|source| ConfigLoadError::Parse {
        path: display,
        source,
    })
}

fn env_var(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn compose(file: FileConfig) -> Result<(Config, ConfigWarnings), ConfigLoadError> {
    let mut warnings = ConfigWarnings::default();

    let name = resolve_server_name(&file.server, &mut warnings);

    let server = ServerConfig {
        name,
        host: env_var("AUTHEX_HOST")
            .or(file.server.host)
            .unwrap_or_else(|| "127.0.0.1".to_string()),
        port: match env_var("AUTHEX_PORT") {
            Some(raw) => raw
                .parse()
                .map_err(|_| ConfigLoadError::InvalidValue {
                    key: "AUTHEX_PORT",
                    message: format!("`{raw}` is not a valid port"),
                })?,
            None => file.server.port.unwrap_or(8038),
        },
    };

    let defaults = FollowerConfig::default();
    let tick_interval_ms = file
        .follower
        .tick_interval_ms
        .unwrap_or(DEFAULT_TICK_INTERVAL_MS);
    let tick_interval_ms = clamp_min(
        tick_interval_ms,
        1,
        "follower.tick_interval_ms",
        &mut warnings,
    );
    let fetcher_cache_size = file
        .follower
        .fetcher_cache_size
        .unwrap_or(DEFAULT_FETCHER_CACHE_SIZE);
    let fetcher_cache_size = clamp_min(
        fetcher_cache_size,
        1,
        "follower.fetcher_cache_size",
        &mut warnings,
    );

    let follower = FollowerConfig {
        hdfs_sync_enabled: file
            .follower
            .hdfs_sync_enabled
            .unwrap_or(defaults.hdfs_sync_enabled),
        full_update_subscribe_enabled: file
            .follower
            .full_update_subscribe_enabled
            .unwrap_or(defaults.full_update_subscribe_enabled),
        tick_interval_ms,
        fetcher_cache_size,
    };

    let database = DatabaseConfig {
        url: env_var("DATABASE_URL")
            .or(file.database.url)
            .ok_or(ConfigLoadError::MissingDatabaseUrl)?,
    };

    let redis = match env_var("REDIS_URL") {
        Some(url) => Some(RedisConfig { url }),
        None => file.redis.map(|redis| RedisConfig { url: redis.url }),
    };

    let metastore = MetastoreConfig {
        base_url: env_var("METASTORE_URL")
            .or(file.metastore.base_url)
            .ok_or(ConfigLoadError::MissingMetastoreUrl)?,
        timeout_ms: file
            .metastore
            .timeout_ms
            .unwrap_or(DEFAULT_METASTORE_TIMEOUT_MS),
    };

    let config = Config {
        server,
        follower,
        database,
        redis,
        metastore,
    };
    validation::cross_check(&config, &mut warnings);
    Ok((config, warnings))
}

fn resolve_server_name(server: &FileServer, warnings: &mut ConfigWarnings) -> String {
    if let Some(name) = env_var("AUTHEX_SERVER_NAME") {
        return name;
    }
    if let Some(name) = server.name.clone().filter(|n| !n.trim().is_empty()) {
        return name;
    }
    if let Some(principal) = server.principal.clone().filter(|n| !n.trim().is_empty()) {
        warnings.push(ConfigWarning::DeprecatedServerPrincipal);
        return principal;
    }
    warnings.push(ConfigWarning::DefaultServerName);
    DEFAULT_SERVER_NAME.to_string()
}

fn clamp_min<T: Ord + Copy>(
    value: T,
    floor: T,
    key: &'static str,
    warnings: &mut ConfigWarnings,
) -> T {
    if value < floor {
        warnings.push(ConfigWarning::ClampedValue { key });
        floor
    } else {
        value
    }
}
