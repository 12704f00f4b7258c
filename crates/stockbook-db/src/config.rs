//! # Stockbook Configuration
//!
//! ## Load Order (later overrides earlier)
//! 1. Default values
//! 2. Config file (`stockbook.toml`)
//! 3. Environment variables (`STOCKBOOK_*`)
//!
//! ## Example `stockbook.toml`
//! ```toml
//! [database]
//! path = "/var/lib/stockbook/stockbook.db"
//! max_connections = 5
//!
//! [engine]
//! lock_timeout_ms = 5000
//! allow_negative_overrides = false
//! history_page_size = 100
//! ```

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use stockbook_core::{StockPolicy, DEFAULT_HISTORY_PAGE_SIZE};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::pool::DbConfig;
use crate::stock::EngineConfig;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("Invalid configuration: {0}")]
    InvalidValue(String),
}

pub type ConfigResult<T> = Result<T, ConfigError>;

// =============================================================================
// Sections
// =============================================================================

/// `[database]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseSettings {
    /// SQLite database file.
    #[serde(default = "default_database_path")]
    pub path: PathBuf,

    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    #[serde(default = "default_min_connections")]
    pub min_connections: u32,

    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
}

fn default_database_path() -> PathBuf {
    directories::ProjectDirs::from("com", "stockbook", "stockbook")
        .map(|dirs| dirs.data_dir().join("stockbook.db"))
        .unwrap_or_else(|| PathBuf::from("stockbook.db"))
}

fn default_max_connections() -> u32 {
    5
}

fn default_min_connections() -> u32 {
    1
}

fn default_connect_timeout() -> u64 {
    30
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        DatabaseSettings {
            path: default_database_path(),
            max_connections: default_max_connections(),
            min_connections: default_min_connections(),
            connect_timeout_secs: default_connect_timeout(),
        }
    }
}

/// `[engine]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineSettings {
    /// Bounded wait for all product locks of one request.
    #[serde(default = "default_lock_timeout")]
    pub lock_timeout_ms: u64,

    /// Whether adjustments may request a negative balance at all.
    #[serde(default)]
    pub allow_negative_overrides: bool,

    #[serde(default = "default_history_page_size")]
    pub history_page_size: u32,
}

fn default_lock_timeout() -> u64 {
    5_000
}

fn default_history_page_size() -> u32 {
    DEFAULT_HISTORY_PAGE_SIZE
}

impl Default for EngineSettings {
    fn default() -> Self {
        EngineSettings {
            lock_timeout_ms: default_lock_timeout(),
            allow_negative_overrides: false,
            history_page_size: default_history_page_size(),
        }
    }
}

// =============================================================================
// Root
// =============================================================================

/// Complete stockbook configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StockbookConfig {
    #[serde(default)]
    pub database: DatabaseSettings,

    #[serde(default)]
    pub engine: EngineSettings,
}

impl StockbookConfig {
    /// Loads configuration from file, environment, and defaults.
    pub fn load(config_path: Option<PathBuf>) -> ConfigResult<Self> {
        let mut config = Self::default();

        if let Some(path) = config_path.or_else(Self::default_config_path) {
            if path.exists() {
                info!(?path, "Loading config from file");
                let contents = std::fs::read_to_string(&path)?;
                config = Self::from_toml(&contents)?;
            } else {
                debug!(?path, "Config file not found, using defaults");
            }
        }

        config.apply_env_overrides();
        config.validate()?;

        Ok(config)
    }

    /// Parses a TOML document. Missing keys fall back to defaults.
    pub fn from_toml(contents: &str) -> ConfigResult<Self> {
        Ok(toml::from_str(contents)?)
    }

    /// Serializes to pretty TOML.
    pub fn to_toml(&self) -> ConfigResult<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Validates the configuration.
    pub fn validate(&self) -> ConfigResult<()> {
        if self.database.max_connections == 0 {
            return Err(ConfigError::InvalidValue(
                "database.max_connections must be greater than 0".into(),
            ));
        }

        if self.database.min_connections > self.database.max_connections {
            return Err(ConfigError::InvalidValue(
                "database.min_connections cannot exceed max_connections".into(),
            ));
        }

        if self.engine.lock_timeout_ms == 0 {
            return Err(ConfigError::InvalidValue(
                "engine.lock_timeout_ms must be greater than 0".into(),
            ));
        }

        if self.engine.history_page_size == 0 {
            return Err(ConfigError::InvalidValue(
                "engine.history_page_size must be greater than 0".into(),
            ));
        }

        Ok(())
    }

    /// Applies `STOCKBOOK_*` environment variable overrides.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    /// Applies overrides from an arbitrary key lookup.
    ///
    /// ## Keys
    /// - `STOCKBOOK_DATABASE_PATH`
    /// - `STOCKBOOK_MAX_CONNECTIONS`
    /// - `STOCKBOOK_LOCK_TIMEOUT_MS`
    /// - `STOCKBOOK_ALLOW_NEGATIVE_OVERRIDES`
    /// - `STOCKBOOK_HISTORY_PAGE_SIZE`
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(path) = lookup("STOCKBOOK_DATABASE_PATH") {
            debug!(path = %path, "Overriding database path from environment");
            self.database.path = PathBuf::from(path);
        }

        if let Some(value) = lookup("STOCKBOOK_MAX_CONNECTIONS") {
            match value.parse::<u32>() {
                Ok(n) => self.database.max_connections = n,
                Err(_) => warn!(value = %value, "Ignoring invalid STOCKBOOK_MAX_CONNECTIONS"),
            }
        }

        if let Some(value) = lookup("STOCKBOOK_LOCK_TIMEOUT_MS") {
            match value.parse::<u64>() {
                Ok(ms) => self.engine.lock_timeout_ms = ms,
                Err(_) => warn!(value = %value, "Ignoring invalid STOCKBOOK_LOCK_TIMEOUT_MS"),
            }
        }

        if let Some(value) = lookup("STOCKBOOK_ALLOW_NEGATIVE_OVERRIDES") {
            match value.to_lowercase().as_str() {
                "1" | "true" | "yes" => self.engine.allow_negative_overrides = true,
                "0" | "false" | "no" => self.engine.allow_negative_overrides = false,
                _ => warn!(value = %value, "Ignoring invalid STOCKBOOK_ALLOW_NEGATIVE_OVERRIDES"),
            }
        }

        if let Some(value) = lookup("STOCKBOOK_HISTORY_PAGE_SIZE") {
            match value.parse::<u32>() {
                Ok(n) => self.engine.history_page_size = n,
                Err(_) => warn!(value = %value, "Ignoring invalid STOCKBOOK_HISTORY_PAGE_SIZE"),
            }
        }
    }

    /// Returns the default config file path.
    fn default_config_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("com", "stockbook", "stockbook")
            .map(|dirs| dirs.config_dir().join("stockbook.toml"))
    }

    // =========================================================================
    // Conversions
    // =========================================================================

    /// Pool settings. SQLite's `busy_timeout` follows the engine lock timeout
    /// so cross-process writers wait as long as in-process ones.
    pub fn db_config(&self) -> DbConfig {
        DbConfig::new(&self.database.path)
            .max_connections(self.database.max_connections)
            .min_connections(self.database.min_connections)
            .connect_timeout(Duration::from_secs(self.database.connect_timeout_secs))
            .busy_timeout(Duration::from_millis(self.engine.lock_timeout_ms))
    }

    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            lock_timeout: Duration::from_millis(self.engine.lock_timeout_ms),
            policy: StockPolicy {
                allow_negative_overrides: self.engine.allow_negative_overrides,
            },
            history_page_size: self.engine.history_page_size,
        }
    }
}
