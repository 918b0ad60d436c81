//! Process configuration: fixed once at startup, read-only afterwards.

use std::env;
use std::net::SocketAddr;
use std::path::PathBuf;

use thiserror::Error;

/// 100 MiB.
pub const DEFAULT_MAX_FILE_SIZE: u64 = 100 * 1024 * 1024;
pub const DEFAULT_PORT: u16 = 8000;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value '{value}' for {key}")]
    InvalidValue { key: &'static str, value: String },

    #[error("cannot use data directory '{path}': {source}")]
    Root {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Settings the file API runs with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileApiConfig {
    pub root: PathBuf,
    pub read_only: bool,
    pub allow_delete: bool,
    pub max_file_size: u64,
}

impl Default for FileApiConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("."),
            read_only: false,
            allow_delete: true,
            max_file_size: DEFAULT_MAX_FILE_SIZE,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    pub addr: SocketAddr,
    pub api: FileApiConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            addr: SocketAddr::from(([0, 0, 0, 0], DEFAULT_PORT)),
            api: FileApiConfig::default(),
        }
    }
}

impl ServerConfig {
    /// Build the configuration from `SMNFS_*` environment variables,
    /// falling back to the defaults for anything unset.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(lookup)
    }

    /// Same as [`ServerConfig::from_env`] but with an injectable source.
    pub fn from_lookup<F>(get: F) -> Result<Self, ConfigError>
    where
        F: Fn(&'static str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(root) = get("SMNFS_ROOT") {
            config.api.root = PathBuf::from(root);
        }
        if let Some(v) = get("SMNFS_READ_ONLY") {
            config.api.read_only = parse_bool("SMNFS_READ_ONLY", &v)?;
        }
        if let Some(v) = get("SMNFS_ALLOW_DELETE") {
            config.api.allow_delete = parse_bool("SMNFS_ALLOW_DELETE", &v)?;
        }
        if let Some(v) = get("SMNFS_MAX_FILE_SIZE") {
            config.api.max_file_size = v.trim().parse().map_err(|_| ConfigError::InvalidValue {
                key: "SMNFS_MAX_FILE_SIZE",
                value: v.clone(),
            })?;
        }
        if let Some(v) = get("SMNFS_ADDR") {
            config.addr = v.trim().parse().map_err(|_| ConfigError::InvalidValue {
                key: "SMNFS_ADDR",
                value: v.clone(),
            })?;
        }

        Ok(config)
    }
}

// try both upper- and lower-case env var names for compatibility
fn lookup(key: &str) -> Option<String> {
    env::var(key)
        .or_else(|_| env::var(key.to_lowercase()))
        .ok()
}

fn parse_bool(key: &'static str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidValue {
            key,
            value: value.to_string(),
        }),
    }
}
