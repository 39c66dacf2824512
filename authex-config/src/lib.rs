//! Shared configuration library for Authex.
//!
//! This crate centralizes config loading and validation for the follower
//! daemon: a TOML file composed with environment overrides, typed section
//! structs with defaults, and guard-rail validation. The `authex-server`
//! binary is the single consumer, so defaults here are the single source of
//! truth for deployment knobs.

pub mod loader;
pub mod models;
pub mod validation;

/// Load `.env` into the process environment if one exists. Call before
/// [`ConfigLoader::load`] so file-local overrides participate in env
/// resolution.
pub fn init_dotenv() {
    let _ = dotenvy::dotenv();
}

pub use loader::{ConfigLoader, error::ConfigLoadError};
pub use models::{
    Config, DatabaseConfig, FollowerConfig, MetastoreConfig, RedisConfig, ServerConfig,
};
pub use validation::{ConfigWarning, ConfigWarnings};
