//! Application configuration management.
//!
//! This module handles loading and saving the application configuration,
//! which includes the backend address, the last used username and the
//! session timing settings.
//!
//! Configuration is stored at `~/.config/smtrend/config.json`.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Application name used for config/cache directory paths
const APP_NAME: &str = "smtrend";

/// Config file name
const CONFIG_FILE: &str = "config.json";

const DEFAULT_API_BASE_URL: &str = "https://localhost:44352/Users";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,
    #[serde(default)]
    pub last_username: Option<String>,
    #[serde(default)]
    pub session: SessionSettings,
}

fn default_api_base_url() -> String {
    DEFAULT_API_BASE_URL.to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_base_url: default_api_base_url(),
            last_username: None,
            session: SessionSettings::default(),
        }
    }
}

/// Timing and storage settings for the session lifecycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionSettings {
    /// Remaining lifetime at or below which activity triggers renewal.
    pub imminent_threshold_secs: u64,
    /// How often the remaining lifetime is re-derived while signed in.
    pub poll_interval_secs: u64,
    /// Silence required after a burst of activity before renewing.
    pub debounce_ms: u64,
    /// Storage key holding the raw credential.
    pub storage_key: String,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            imminent_threshold_secs: 15 * 60,
            poll_interval_secs: 10,
            debounce_ms: 300,
            storage_key: "jwt".to_string(),
        }
    }
}

impl SessionSettings {
    /// Saturates at the longest representable span.
    pub fn imminent_threshold(&self) -> chrono::Duration {
        i64::try_from(self.imminent_threshold_secs)
            .ok()
            .and_then(chrono::Duration::try_seconds)
            .unwrap_or(chrono::Duration::MAX)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs.max(1))
    }

    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        let path = Self::config_path()?;
        if path.exists() {
            let contents = std::fs::read_to_string(&path)
                .with_context(|| format!("Failed to read config file {}", path.display()))?;
            serde_json::from_str(&contents).context("Failed to parse config file")
        } else {
            Ok(Self::default())
        }
    }

    pub fn save(&self) -> Result<()> {
        let path = Self::config_path()?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = serde_json::to_string_pretty(self)?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find config directory"))?;
        Ok(config_dir.join(APP_NAME).join(CONFIG_FILE))
    }

    /// Directory for the durable credential store and logs.
    pub fn cache_dir(&self) -> Result<PathBuf> {
        let cache_dir = dirs::cache_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find cache directory"))?;
        Ok(cache_dir.join(APP_NAME))
    }
}
