//! Configuration management
//!
//! Configuration is read once at startup and handed to the scheduler as an
//! immutable value. Sources, lowest precedence first:
//!
//! 1. built-in defaults
//! 2. a TOML file (`PRODSYNC_CONFIG`, default `prodsync.toml`; optional)
//! 3. `PRODSYNC_*` environment variables, nested with `__`
//!    (e.g. `PRODSYNC_MONITOR__POLL_INTERVAL_SECS=10`)
//! 4. `DATABASE_URL`, which always wins for the connection string

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use prodsync_common::{ProdsyncError, Result};
use serde::{Deserialize, Serialize};

use crate::db::TableName;

// ============================================================================
// Defaults
// ============================================================================

/// Default configuration file path.
pub const DEFAULT_CONFIG_PATH: &str = "prodsync.toml";

/// Default database URL for local development.
pub const DEFAULT_DATABASE_URL: &str = "postgresql://localhost/production";

/// Default maximum database connections in the pool.
pub const DEFAULT_DATABASE_MAX_CONNECTIONS: u32 = 10;

/// Default minimum database connections in the pool.
pub const DEFAULT_DATABASE_MIN_CONNECTIONS: u32 = 1;

/// Default database connection timeout in seconds.
pub const DEFAULT_DATABASE_CONNECT_TIMEOUT_SECS: u64 = 10;

/// Default database idle timeout in seconds (10 minutes).
pub const DEFAULT_DATABASE_IDLE_TIMEOUT_SECS: u64 = 600;

/// Folder on each line's share that holds the production files.
pub const DEFAULT_BASE_FOLDER: &str = "Data Server";

/// Subfolder of the source root that holds archived copies.
pub const DEFAULT_ARCHIVE_FOLDER: &str = "Processed";

/// Seconds between poll cycles.
pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 5;

/// Shared table receiving derived loss-time entries.
pub const DEFAULT_LOSS_TIME_TABLE: &str = "loss_time";

/// Collector configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub monitor: MonitorConfig,
}

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    pub connect_timeout_secs: u64,
    pub idle_timeout_secs: u64,
}

/// What to watch and where to put it
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    /// Folder name under each line's share, e.g. `\\10.0.0.21\Data Server`
    pub base_folder: String,

    /// Subfolder of the source root receiving processed copies
    pub archive_folder: String,

    pub poll_interval_secs: u64,

    /// Shared table for derived loss-time entries
    pub loss_time_table: TableName,

    /// When set, shares are reached at `<share_root>/<ip>/<base_folder>`
    /// (mounted shares) instead of the UNC path `\\<ip>\<base_folder>`
    pub share_root: Option<PathBuf>,

    pub lines: Vec<LineConfig>,
}

/// One monitored production line
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LineConfig {
    pub name: String,

    /// Network address of the line's PC; empty means "not wired yet"
    #[serde(default)]
    pub ip: String,

    /// Destination table for this line's production records
    pub table_name: TableName,
}

impl LineConfig {
    /// Whether this line has an address to poll
    pub fn is_enabled(&self) -> bool {
        !self.ip.trim().is_empty()
    }

    /// Folder the line's machine writes its text files into
    pub fn source_root(&self, monitor: &MonitorConfig) -> PathBuf {
        let ip = self.ip.trim();
        match &monitor.share_root {
            Some(root) => root.join(ip).join(&monitor.base_folder),
            None => PathBuf::from(format!(r"\\{}\{}", ip, monitor.base_folder)),
        }
    }
}

impl MonitorConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    /// Archive folder for a given source root
    pub fn archive_root(&self, source_root: &Path) -> PathBuf {
        source_root.join(&self.archive_folder)
    }
}

impl Config {
    /// Load configuration from the default file location and the environment
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();

        let path = std::env::var("PRODSYNC_CONFIG").unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
        let figment = Figment::from(Serialized::defaults(Config::default()))
            .merge(Toml::file(&path))
            .merge(Env::prefixed("PRODSYNC_").split("__"));

        let mut config = Self::from_figment(figment)?;
        if let Ok(url) = std::env::var("DATABASE_URL") {
            config.database.url = url;
        }

        config.validate()?;
        Ok(config)
    }

    /// Extract a configuration from an already assembled figment
    pub fn from_figment(figment: Figment) -> Result<Self> {
        figment
            .extract()
            .map_err(|e| ProdsyncError::config(e.to_string()))
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.database.url.is_empty() {
            return Err(ProdsyncError::config("database url cannot be empty"));
        }
        if self.database.max_connections == 0 {
            return Err(ProdsyncError::config(
                "database max_connections must be greater than 0",
            ));
        }
        if self.database.min_connections > self.database.max_connections {
            return Err(ProdsyncError::config(format!(
                "database min_connections ({}) cannot be greater than max_connections ({})",
                self.database.min_connections, self.database.max_connections
            )));
        }

        let monitor = &self.monitor;
        if monitor.poll_interval_secs == 0 {
            return Err(ProdsyncError::config(
                "monitor poll_interval_secs must be greater than 0",
            ));
        }
        if monitor.base_folder.trim().is_empty() {
            return Err(ProdsyncError::config("monitor base_folder cannot be empty"));
        }
        if monitor.archive_folder.trim().is_empty() {
            return Err(ProdsyncError::config(
                "monitor archive_folder cannot be empty",
            ));
        }

        let mut names = HashSet::new();
        for line in &monitor.lines {
            if line.name.trim().is_empty() {
                return Err(ProdsyncError::config("line name cannot be empty"));
            }
            if !names.insert(line.name.as_str()) {
                return Err(ProdsyncError::config(format!(
                    "duplicate line name '{}'",
                    line.name
                )));
            }
            if !line.is_enabled() {
                tracing::warn!(line = %line.name, "Line has no ip configured and will not be polled");
            }
        }

        if monitor.lines.is_empty() {
            tracing::warn!("No production lines configured");
        }

        Ok(())
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_DATABASE_URL.to_string(),
            max_connections: DEFAULT_DATABASE_MAX_CONNECTIONS,
            min_connections: DEFAULT_DATABASE_MIN_CONNECTIONS,
            connect_timeout_secs: DEFAULT_DATABASE_CONNECT_TIMEOUT_SECS,
            idle_timeout_secs: DEFAULT_DATABASE_IDLE_TIMEOUT_SECS,
        }
    }
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            base_folder: DEFAULT_BASE_FOLDER.to_string(),
            archive_folder: DEFAULT_ARCHIVE_FOLDER.to_string(),
            poll_interval_secs: DEFAULT_POLL_INTERVAL_SECS,
            loss_time_table: TableName::loss_time_default(),
            share_root: None,
            lines: Vec::new(),
        }
    }
}
