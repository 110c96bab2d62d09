//! Bootstrap configuration loading
//!
//! The TOML file carries bootstrap settings only (where to listen, where the
//! database lives, scratch space, logging). Every key is optional so a
//! missing file or a partial file falls back to built-in defaults.
//!
//! Priority when resolving a setting:
//! 1. Command-line argument / environment variable (owned by each binary)
//! 2. TOML configuration file
//! 3. Built-in defaults

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Bootstrap configuration loaded from TOML file
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
pub struct TomlConfig {
    /// HTTP bind address
    #[serde(default)]
    pub host: Option<String>,

    /// HTTP server port
    #[serde(default)]
    pub port: Option<u16>,

    /// Path to SQLite database file
    #[serde(default)]
    pub database_path: Option<PathBuf>,

    /// Directory for per-ingestion scratch files
    #[serde(default)]
    pub scratch_dir: Option<PathBuf>,

    /// Upper bound on a single blob download, in seconds
    #[serde(default)]
    pub fetch_timeout_secs: Option<u64>,

    /// Maximum number of cached notifications (absent = unbounded)
    #[serde(default)]
    pub event_cache_capacity: Option<usize>,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Load TOML bootstrap configuration from `path`
///
/// A missing file is not an error: defaults are returned so a fresh install
/// starts without any configuration.
pub fn load_toml_config(path: &Path) -> Result<TomlConfig> {
    if !path.exists() {
        tracing::debug!(path = %path.display(), "No config file, using defaults");
        return Ok(TomlConfig::default());
    }

    let content = std::fs::read_to_string(path)
        .map_err(|e| Error::Config(format!("Read {} failed: {}", path.display(), e)))?;

    toml::from_str(&content)
        .map_err(|e| Error::Config(format!("Parse {} failed: {}", path.display(), e)))
}

/// Default configuration file location (`~/.config/musicvotes/config.toml` on Linux)
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("musicvotes").join("config.toml"))
}

/// OS-dependent default database path
pub fn default_database_path() -> PathBuf {
    dirs::data_local_dir()
        .map(|d| d.join("musicvotes"))
        .unwrap_or_else(|| PathBuf::from("./musicvotes_data"))
        .join("musicvotes.db")
}
