//! Configuration management.

use std::path::{Path, PathBuf};

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};

use crate::{Error, LogLevel, NetworkSelection, NodeSettings, Result};

const APP_NAME: &str = "ldk-node-monday";

/// Application configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    /// Root directory for node storage and secrets.
    pub data_dir: PathBuf,
    /// Network the node is built for.
    #[serde(default = "default_network")]
    pub network: NetworkSelection,
    /// Engine log verbosity.
    #[serde(default)]
    pub log_level: LogLevel,
}

const fn default_network() -> NetworkSelection {
    NetworkSelection::Signet
}

impl Default for Config {
    fn default() -> Self {
        let data_dir = ProjectDirs::from("", "", APP_NAME)
            .map(|dirs| dirs.data_dir().to_path_buf())
            .unwrap_or_else(|| PathBuf::from(".monday"));

        Self {
            data_dir,
            network: default_network(),
            log_level: LogLevel::default(),
        }
    }
}

impl Config {
    /// Load configuration from disk or create default.
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path()?)
    }

    /// Load configuration from `path`, writing defaults there if missing.
    pub fn load_from(path: &Path) -> Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)?;
            let config: Self = serde_json::from_str(&content)?;
            Ok(config)
        } else {
            let config = Self::default();
            config.save_to(path)?;
            Ok(config)
        }
    }

    /// Save configuration to disk.
    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_path()?)
    }

    /// Save configuration to `path`.
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Directory holding the wallet secret.
    pub fn secrets_dir(&self) -> PathBuf {
        self.data_dir.join("secrets")
    }

    /// Per-build node settings rooted at the data directory.
    pub fn node_settings(&self) -> NodeSettings {
        let mut settings = NodeSettings::new(self.data_dir.join("nodes"));
        settings.log_level = self.log_level;
        settings
    }

    /// Get configuration file path.
    fn config_path() -> Result<PathBuf> {
        ProjectDirs::from("", "", APP_NAME)
            .map(|dirs| dirs.config_dir().join("config.json"))
            .ok_or_else(|| Error::Config("could not determine config directory".into()))
    }
}
