//! Configuration loading and database path resolution
//!
//! Settings come from, highest priority first:
//! 1. Command-line arguments
//! 2. Environment variables (`PROBED_DATABASE`)
//! 3. TOML configuration file
//! 4. Built-in defaults

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use tracing::{debug, info};

use crate::{Error, Result};

/// Environment variable overriding the database path
pub const DATABASE_ENV: &str = "PROBED_DATABASE";

const APP_DIR: &str = "probed";
const DATABASE_FILE: &str = "probed.db";
const CONFIG_FILE: &str = "config.toml";

/// Bootstrap configuration loaded from TOML
///
/// Every key is optional; a missing file behaves like an empty one.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct TomlConfig {
    /// Path to the SQLite database file
    pub database: Option<PathBuf>,

    /// HTTP listen address of the ingestion daemon
    pub listen_address: String,

    /// Upper bound on pooled connections
    pub max_connections: u32,

    /// SQLite busy timeout in milliseconds
    pub busy_timeout_ms: u64,
}

impl Default for TomlConfig {
    fn default() -> Self {
        Self {
            database: None,
            listen_address: "0.0.0.0:14734".to_string(),
            max_connections: 16,
            busy_timeout_ms: 5000,
        }
    }
}

impl TomlConfig {
    /// Load a config file
    ///
    /// An explicitly named file must exist. The default file is optional.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let path = match explicit {
            Some(path) => path.to_path_buf(),
            None => match default_config_path() {
                Some(path) if path.exists() => path,
                _ => {
                    debug!("No config file found, using defaults");
                    return Ok(Self::default());
                }
            },
        };
        Self::from_file(&path)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("failed to read {}: {}", path.display(), e))
        })?;
        let config = Self::parse(&content)
            .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))?;
        info!(path = %path.display(), "Loaded config file");
        Ok(config)
    }

    pub fn parse(content: &str) -> std::result::Result<Self, toml::de::Error> {
        toml::from_str(content)
    }
}

/// Settings the store needs to open its database
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreConfig {
    pub database: PathBuf,
    pub max_connections: u32,
    pub busy_timeout: Duration,
}

impl StoreConfig {
    /// Store settings for a database file, other values defaulted
    pub fn new(database: impl Into<PathBuf>) -> Self {
        let defaults = TomlConfig::default();
        Self {
            database: database.into(),
            max_connections: defaults.max_connections,
            busy_timeout: Duration::from_millis(defaults.busy_timeout_ms),
        }
    }

    /// Combine a command-line database path with the TOML config
    pub fn resolve(cli_database: Option<&Path>, toml: &TomlConfig) -> Result<Self> {
        if toml.max_connections == 0 {
            return Err(Error::Config("max_connections must be at least 1".to_string()));
        }
        Ok(Self {
            database: resolve_database_path(cli_database, toml.database.as_deref())?,
            max_connections: toml.max_connections,
            busy_timeout: Duration::from_millis(toml.busy_timeout_ms),
        })
    }
}

/// Database path following the priority order:
/// 1. Command-line argument
/// 2. `PROBED_DATABASE` environment variable
/// 3. `database` key of the TOML config
/// 4. `<data dir>/probed/probed.db`
pub fn resolve_database_path(cli_arg: Option<&Path>, toml_value: Option<&Path>) -> Result<PathBuf> {
    if let Some(path) = cli_arg {
        return Ok(path.to_path_buf());
    }

    if let Some(path) = std::env::var_os(DATABASE_ENV).filter(|v| !v.is_empty()) {
        return Ok(PathBuf::from(path));
    }

    if let Some(path) = toml_value {
        return Ok(path.to_path_buf());
    }

    default_database_path()
}

/// Default location of the TOML config, `~/.config/probed/config.toml` on Linux
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join(APP_DIR).join(CONFIG_FILE))
}

/// OS-dependent default database path
pub fn default_database_path() -> Result<PathBuf> {
    dirs::data_local_dir()
        .or_else(dirs::data_dir)
        .map(|d| d.join(APP_DIR).join(DATABASE_FILE))
        .ok_or_else(|| Error::Config("could not determine data directory".to_string()))
}
