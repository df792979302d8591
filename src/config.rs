//! Configuration module for the local watcher.
//!
//! This module provides a layered configuration system that supports:
//! - Default values
//! - TOML configuration file (`.syncwatch/settings.toml`)
//! - Environment variable overrides
//!
//! # Environment Variables
//!
//! Environment variables must be prefixed with `SYNCWATCH_` and use double
//! underscores to separate nested levels:
//! - `SYNCWATCH_WATCHER__FLUSH_TIMEOUT_MS=1000` sets `watcher.flush_timeout_ms`
//! - `SYNCWATCH_WATCHER__CHECKSUM_CONCURRENCY=8` sets `watcher.checksum_concurrency`
//! - `SYNCWATCH_LOGGING__DEFAULT=debug` sets `logging.default`

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Directory holding the settings file, searched from the working directory up.
pub const CONFIG_DIR: &str = ".syncwatch";
const CONFIG_FILE: &str = "settings.toml";
const ENV_PREFIX: &str = "SYNCWATCH_";

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct Settings {
    /// Version of the configuration schema
    #[serde(default = "default_version")]
    pub version: u32,

    /// Directory to watch. Defaults to the workspace root.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sync_path: Option<PathBuf>,

    #[serde(default)]
    pub watcher: WatcherConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct WatcherConfig {
    /// Quiet period after the last raw event before a batch is flushed
    #[serde(default = "default_flush_timeout_ms")]
    pub flush_timeout_ms: u64,

    /// Checksums and existence checks in flight at once
    #[serde(default = "default_checksum_concurrency")]
    pub checksum_concurrency: usize,

    /// Wait on a non-forced stop
    #[serde(default = "default_stop_grace_ms")]
    pub stop_grace_ms: u64,

    /// Interval between checks that the sync root still exists
    #[serde(default = "default_root_check_interval_ms")]
    pub root_check_interval_ms: u64,

    /// Where in-progress changes survive a restart
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pending_file: Option<PathBuf>,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct LoggingConfig {
    /// Default level for every target
    #[serde(default = "default_log_level")]
    pub default: String,

    /// Per-target overrides, e.g. `syncwatch::analysis = "debug"`
    #[serde(default)]
    pub modules: BTreeMap<String, String>,
}

fn default_version() -> u32 {
    1
}
fn default_flush_timeout_ms() -> u64 {
    10_000
}
fn default_checksum_concurrency() -> usize {
    50
}
fn default_stop_grace_ms() -> u64 {
    3_000
}
fn default_root_check_interval_ms() -> u64 {
    5_000
}
fn default_log_level() -> String {
    "warn".to_string()
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            version: default_version(),
            sync_path: None,
            watcher: WatcherConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            flush_timeout_ms: default_flush_timeout_ms(),
            checksum_concurrency: default_checksum_concurrency(),
            stop_grace_ms: default_stop_grace_ms(),
            root_check_interval_ms: default_root_check_interval_ms(),
            pending_file: None,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            default: default_log_level(),
            modules: BTreeMap::new(),
        }
    }
}

impl Settings {
    /// Load configuration from all sources, starting the search in the
    /// current directory.
    pub fn load() -> Result<Self, Box<figment::Error>> {
        let current = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
        Self::load_in(&current)
    }

    /// Load configuration from all sources, searching `start` and its
    /// ancestors for the settings directory.
    pub fn load_in(start: &Path) -> Result<Self, Box<figment::Error>> {
        let config_path = Self::find_workspace_config(start)
            .unwrap_or_else(|| start.join(CONFIG_DIR).join(CONFIG_FILE));

        Self::figment(&config_path)
            .extract()
            .map_err(Box::new)
            .map(|mut settings: Settings| {
                // Default to the directory holding the settings
                if settings.sync_path.is_none() {
                    settings.sync_path = Self::workspace_root(start);
                }
                settings
            })
    }

    /// Load configuration from a specific file
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self, Box<figment::Error>> {
        Self::figment(path.as_ref()).extract().map_err(Box::new)
    }

    fn figment(config_path: &Path) -> Figment {
        Figment::new()
            .merge(Serialized::defaults(Settings::default()))
            .merge(Toml::file(config_path))
            // Double underscore (__) separates nested levels,
            // single underscore (_) remains as is within field names
            .merge(Env::prefixed(ENV_PREFIX).map(|key| {
                key.as_str().to_lowercase().replace("__", ".").into()
            }))
    }

    /// Find the settings file by looking for the config directory
    /// from `start` up to the filesystem root
    fn find_workspace_config(start: &Path) -> Option<PathBuf> {
        Self::workspace_root(start).map(|root| root.join(CONFIG_DIR).join(CONFIG_FILE))
    }

    /// Get the workspace root directory (where the config directory is located)
    pub fn workspace_root(start: &Path) -> Option<PathBuf> {
        start
            .ancestors()
            .find(|ancestor| ancestor.join(CONFIG_DIR).is_dir())
            .map(Path::to_path_buf)
    }

    /// Save current configuration to file
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), Box<dyn std::error::Error>> {
        let parent = path.as_ref().parent().ok_or("Invalid path")?;
        std::fs::create_dir_all(parent)?;

        let toml_string = toml::to_string_pretty(self)?;
        std::fs::write(path, toml_string)?;

        Ok(())
    }

    /// Create a default settings file under `dir`
    pub fn init_config_file(
        dir: &Path,
        force: bool,
    ) -> Result<PathBuf, Box<dyn std::error::Error>> {
        let config_path = dir.join(CONFIG_DIR).join(CONFIG_FILE);

        if !force && config_path.exists() {
            return Err("Configuration file already exists. Use --force to overwrite".into());
        }

        let settings = Settings {
            sync_path: Some(dir.to_path_buf()),
            ..Settings::default()
        };
        settings.save(&config_path)?;

        Ok(config_path)
    }
}
