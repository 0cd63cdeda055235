//! Configuration management for the sync layer.

use std::env;

const DEFAULT_DATABASE_URL: &str = "sqlite::memory:";
const DEFAULT_MAX_CONNECTIONS: u32 = 4;
const DEFAULT_LOG_FILTER: &str = "opqueue_sync=info";

/// Sync configuration loaded from environment variables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncConfig {
    /// SQLite connection URL of the local store
    pub database_url: String,
    /// Maximum pooled connections to the local store
    pub max_connections: u32,
    /// Fallback tracing filter when `RUST_LOG` is unset
    pub log_filter: String,
    /// Stop a push on network errors instead of recording them per item
    pub abort_on_network_error: bool,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            database_url: DEFAULT_DATABASE_URL.to_string(),
            max_connections: DEFAULT_MAX_CONNECTIONS,
            log_filter: DEFAULT_LOG_FILTER.to_string(),
            abort_on_network_error: true,
        }
    }
}

impl SyncConfig {
    /// Load a `.env` file if present, then read the environment.
    pub fn load() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        Self::from_env()
    }

    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Load configuration from an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let database_url =
            lookup("OPQUEUE_DATABASE_URL").unwrap_or_else(|| DEFAULT_DATABASE_URL.to_string());

        let max_connections = match lookup("OPQUEUE_MAX_CONNECTIONS") {
            Some(value) => match value.trim().parse::<u32>() {
                Ok(n) if n > 0 => n,
                _ => return Err(ConfigError::InvalidMaxConnections(value)),
            },
            None => DEFAULT_MAX_CONNECTIONS,
        };

        let log_filter =
            lookup("OPQUEUE_LOG_FILTER").unwrap_or_else(|| DEFAULT_LOG_FILTER.to_string());

        let abort_on_network_error = match lookup("OPQUEUE_ABORT_ON_NETWORK_ERROR") {
            Some(value) => parse_bool("OPQUEUE_ABORT_ON_NETWORK_ERROR", &value)?,
            None => true,
        };

        Ok(Self {
            database_url,
            max_connections,
            log_filter,
            abort_on_network_error,
        })
    }
}

fn parse_bool(name: &'static str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidBool {
            name,
            value: value.to_string(),
        }),
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid OPQUEUE_MAX_CONNECTIONS value: {0}")]
    InvalidMaxConnections(String),

    #[error("Invalid {name} value: {value}")]
    InvalidBool { name: &'static str, value: String },
}
