use crate::models::Config;

/// A non-fatal finding surfaced during config composition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigWarning {
    /// The deprecated `server.principal` key supplied the server name.
    DeprecatedServerPrincipal,
    /// No name was configured at all; the hard default is in effect.
    DefaultServerName,
    /// A numeric knob was below its floor and was clamped.
    ClampedValue { key: &'static str },
    /// Pub/sub refresh is enabled but no redis section is configured.
    RefreshWithoutRedis,
}

impl std::fmt::Display for ConfigWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigWarning::DeprecatedServerPrincipal => f.write_str(
                "server.principal is deprecated; rename the key to server.name",
            ),
            ConfigWarning::DefaultServerName => {
                f.write_str("no server.name configured; using the built-in default")
            }
            ConfigWarning::ClampedValue { key } => {
                write!(f, "{key} was below its minimum and has been clamped")
            }
            ConfigWarning::RefreshWithoutRedis => f.write_str(
                "follower.full_update_subscribe_enabled is set but no [redis] section exists; \
                 the force-refresh topic will not be watched",
            ),
        }
    }
}

/// Warnings accumulated while composing a [`Config`].
#[derive(Debug, Clone, Default)]
pub struct ConfigWarnings(Vec<ConfigWarning>);

impl ConfigWarnings {
    pub fn push(&mut self, warning: ConfigWarning) {
        self.0.push(warning);
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ConfigWarning> {
        self.0.iter()
    }

    /// Emit every warning through tracing; called once by the binary after
    /// load so the log carries the full picture.
    pub fn log_all(&self) {
        for warning in &self.0 {
            tracing::warn!(%warning, "config warning");
        }
    }
}

pub(crate) fn cross_check(config: &Config, warnings: &mut ConfigWarnings) {
    if config.follower.full_update_subscribe_enabled && config.redis.is_none() {
        warnings.push(ConfigWarning::RefreshWithoutRedis);
    }
}
