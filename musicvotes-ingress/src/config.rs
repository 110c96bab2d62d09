//! Configuration resolution for musicvotes-ingress
//!
//! Priority: command line / environment → TOML bootstrap file → defaults.

use clap::Parser;
use musicvotes_common::config::{
    default_config_path, default_database_path, load_toml_config, TomlConfig,
};
use musicvotes_common::{Error, Result};
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_HOST: &str = "127.0.0.1";
pub const DEFAULT_PORT: u16 = 5780;
pub const DEFAULT_FETCH_TIMEOUT_SECS: u64 = 60;

/// Command-line arguments for musicvotes-ingress
#[derive(Parser, Debug, Clone, Default)]
#[command(name = "musicvotes-ingress")]
#[command(about = "Event Grid ingestion service for musicvotes")]
#[command(version)]
pub struct Args {
    /// Address to bind
    #[arg(long, env = "MUSICVOTES_HOST")]
    pub host: Option<String>,

    /// Port to listen on
    #[arg(short, long, env = "MUSICVOTES_PORT")]
    pub port: Option<u16>,

    /// SQLite database file
    #[arg(short, long, env = "MUSICVOTES_DATABASE")]
    pub database: Option<PathBuf>,

    /// Directory for scratch files while songs are ingested
    #[arg(long, env = "MUSICVOTES_SCRATCH_DIR")]
    pub scratch_dir: Option<PathBuf>,

    /// Per-download timeout in seconds
    #[arg(long, env = "MUSICVOTES_FETCH_TIMEOUT_SECS")]
    pub fetch_timeout_secs: Option<u64>,

    /// Maximum cached notifications (unbounded when unset)
    #[arg(long, env = "MUSICVOTES_EVENT_CACHE_CAPACITY")]
    pub event_cache_capacity: Option<usize>,

    /// TOML bootstrap file
    #[arg(short, long, env = "MUSICVOTES_CONFIG")]
    pub config: Option<PathBuf>,
}

/// Fully resolved service configuration
#[derive(Debug, Clone, PartialEq)]
pub struct ServiceConfig {
    pub host: String,
    pub port: u16,
    pub database_path: PathBuf,
    pub scratch_dir: PathBuf,
    pub fetch_timeout: Duration,
    pub event_cache_capacity: Option<usize>,
    pub log_level: String,
}

impl ServiceConfig {
    /// Load the TOML file named by `args` (or the default location) and merge
    pub fn load(args: &Args) -> Result<Self> {
        let toml = match args.config.as_ref() {
            Some(path) if !path.exists() => {
                return Err(Error::Config(format!(
                    "Config file not found: {}",
                    path.display()
                )))
            }
            Some(path) => load_toml_config(path)?,
            None => match default_config_path() {
                Some(path) => load_toml_config(&path)?,
                None => TomlConfig::default(),
            },
        };

        Self::resolve(args, toml)
    }

    /// Merge arguments over TOML over built-in defaults
    pub fn resolve(args: &Args, toml: TomlConfig) -> Result<Self> {
        let fetch_timeout_secs = args
            .fetch_timeout_secs
            .or(toml.fetch_timeout_secs)
            .unwrap_or(DEFAULT_FETCH_TIMEOUT_SECS);
        if fetch_timeout_secs == 0 {
            return Err(Error::Config("fetch timeout must be at least 1 second".into()));
        }

        let event_cache_capacity = args.event_cache_capacity.or(toml.event_cache_capacity);
        if event_cache_capacity == Some(0) {
            return Err(Error::Config("event cache capacity must be positive".into()));
        }

        Ok(Self {
            host: args
                .host
                .clone()
                .or(toml.host)
                .unwrap_or_else(|| DEFAULT_HOST.to_string()),
            port: args.port.or(toml.port).unwrap_or(DEFAULT_PORT),
            database_path: args
                .database
                .clone()
                .or(toml.database_path)
                .unwrap_or_else(default_database_path),
            scratch_dir: args
                .scratch_dir
                .clone()
                .or(toml.scratch_dir)
                .unwrap_or_else(std::env::temp_dir),
            fetch_timeout: Duration::from_secs(fetch_timeout_secs),
            event_cache_capacity,
            log_level: toml.logging.level,
        })
    }
}
