/// Configuration management for the AI PlayGround engine
///
/// Handles server configuration, database location, and orchestrator limits.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub engine: EngineConfig,
}

/// HTTP server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Server bind address (e.g., "0.0.0.0")
    pub host: String,
    pub port: u16,
}

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Directory holding the SQLite file (default: "data")
    pub data_dir: String,
}

impl DatabaseConfig {
    /// Path of the SQLite database inside the data directory
    pub fn database_path(&self) -> PathBuf {
        PathBuf::from(&self.data_dir).join("playground.db")
    }
}

/// Orchestrator limits
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Default run timeout when a request does not carry one
    pub run_timeout_secs: u64,
    /// Maximum node tasks executing concurrently within one run
    pub max_concurrency: usize,
}

impl EngineConfig {
    pub fn run_timeout(&self) -> Duration {
        Duration::from_secs(self.run_timeout_secs)
    }
}

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|value| value.parse().ok())
        .unwrap_or(default)
}

impl Default for Config {
    /// Default configuration with ENV_VAR support for container deployment
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: std::env::var("PLAYGROUND_HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
                port: env_or("PLAYGROUND_PORT", 3004),
            },
            database: DatabaseConfig {
                data_dir: std::env::var("PLAYGROUND_DATA_DIR").unwrap_or_else(|_| "data".to_string()),
            },
            engine: EngineConfig {
                run_timeout_secs: env_or("PLAYGROUND_RUN_TIMEOUT_SECS", 300),
                max_concurrency: env_or("PLAYGROUND_MAX_CONCURRENCY", 8),
            },
        }
    }
}
