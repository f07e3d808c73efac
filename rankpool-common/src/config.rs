//! Bootstrap configuration
//!
//! Resolution order for every value:
//! 1. Command-line argument (highest priority, applied by the binary)
//! 2. TOML config file
//! 3. Compiled default (fallback)
//!
//! A missing config file is not an error: the engine starts on defaults and
//! logs a warning.

use crate::{Error, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Default HTTP port for the ranking service
pub const DEFAULT_PORT: u16 = 5790;

/// Default upper bound for lock retries on writes
pub const DEFAULT_MAX_LOCK_WAIT_MS: u64 = 5000;

/// Bootstrap configuration loaded from TOML
///
/// These settings cannot change while the engine runs.
#[derive(Debug, Clone, Deserialize)]
pub struct TomlConfig {
    /// Path to the SQLite database file
    #[serde(default = "default_database_path")]
    pub database_path: PathBuf,

    /// Address the HTTP server binds to
    #[serde(default = "default_bind_address")]
    pub bind_address: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Seed pool CSV loaded by `rankpool init` when present
    #[serde(default)]
    pub seed_csv: Option<PathBuf>,

    /// Maximum total time to retry a write that hit SQLite lock contention
    ///
    /// When absent the `rebuild_max_lock_wait_ms` database setting applies.
    #[serde(default)]
    pub max_lock_wait_ms: Option<u64>,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
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

impl Default for TomlConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
            bind_address: default_bind_address(),
            port: default_port(),
            seed_csv: None,
            max_lock_wait_ms: None,
            logging: LoggingConfig::default(),
        }
    }
}

fn default_database_path() -> PathBuf {
    dirs::data_local_dir()
        .map(|d| d.join("rankpool").join("rankpool.db"))
        .unwrap_or_else(|| PathBuf::from("./rankpool_data/rankpool.db"))
}

fn default_bind_address() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_log_level() -> String {
    "info".to_string()
}

impl TomlConfig {
    /// Parse configuration from TOML text
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: TomlConfig =
            toml::from_str(content).map_err(|e| Error::Config(format!("Invalid config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("Cannot read {}: {}", path.display(), e)))?;
        let config = Self::from_toml_str(&content)?;
        info!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    /// Load from an explicit path, else the platform default location, else defaults
    ///
    /// An explicit path that cannot be read is an error; an absent default
    /// file only produces a warning.
    pub fn load_or_default(explicit: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit {
            return Self::load(path);
        }

        match default_config_path() {
            Some(path) if path.exists() => Self::load(&path),
            Some(path) => {
                warn!("No config file at {}, using built-in defaults", path.display());
                Ok(Self::default())
            }
            None => {
                warn!("Could not determine config directory, using built-in defaults");
                Ok(Self::default())
            }
        }
    }

    fn validate(&self) -> Result<()> {
        if self.port == 0 {
            return Err(Error::Config("port must be non-zero".to_string()));
        }
        if self.max_lock_wait_ms == Some(0) {
            return Err(Error::Config("max_lock_wait_ms must be non-zero".to_string()));
        }
        if self.database_path.as_os_str().is_empty() {
            return Err(Error::Config("database_path must not be empty".to_string()));
        }
        Ok(())
    }
}

/// Platform config file location: `<config dir>/rankpool/config.toml`
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("rankpool").join("config.toml"))
}
