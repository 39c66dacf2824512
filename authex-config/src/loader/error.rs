use thiserror::Error;

/// Failures while reading or composing configuration.
#[derive(Error, Debug)]
pub enum ConfigLoadError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: String,
        source: toml::de::Error,
    },

    #[error("database.url is required (set it in the config file or DATABASE_URL)")]
    MissingDatabaseUrl,

    #[error("metastore.base_url is required (set it in the config file or METASTORE_URL)")]
    MissingMetastoreUrl,

    #[error("invalid value for {key}: {message}")]
    InvalidValue { key: &'static str, message: String },
}
