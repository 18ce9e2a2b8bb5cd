//! Application configuration persistence
//!
//! Stores server settings and local paths in ~/.config/ampsync/config.json.
//! The password is never written here; it lives in the system keyring.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

const APP_DIR: &str = "ampsync";
const CONFIG_VERSION: u32 = 1;

fn default_parallel_downloads() -> usize {
    4
}

fn default_request_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppConfig {
    /// Config format version
    #[serde(default)]
    pub version: u32,
    /// Ampache server URL
    pub server_url: Option<String>,
    pub username: Option<String>,
    /// Directory holding `library.json`; platform data dir when unset
    pub data_dir: Option<PathBuf>,
    /// Directory holding cached blobs; platform cache dir when unset
    pub cache_dir: Option<PathBuf>,
    #[serde(default = "default_parallel_downloads")]
    pub parallel_downloads: usize,
    /// Upper bound for each document request, in seconds
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            version: CONFIG_VERSION,
            server_url: None,
            username: None,
            data_dir: None,
            cache_dir: None,
            parallel_downloads: default_parallel_downloads(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

impl AppConfig {
    /// Load the config from its default location
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path()?)
    }

    /// Save the config to its default location
    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_path()?)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            debug!("No config found at {:?}, using defaults", path);
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config from {:?}", path))?;
        let config: Self =
            serde_json::from_str(&contents).with_context(|| "Failed to parse config")?;

        debug!("Loaded config from {:?}", path);
        Ok(config)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create config directory {:?}", parent))?;
        }

        let contents =
            serde_json::to_string_pretty(self).context("Failed to serialize config")?;
        fs::write(path, contents)
            .with_context(|| format!("Failed to write config to {:?}", path))?;

        debug!("Saved config to {:?}", path);
        Ok(())
    }

    /// Get the config file path
    pub fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not determine config directory"))?;
        Ok(config_dir.join(APP_DIR).join("config.json"))
    }

    /// Path of the persistent library document
    pub fn library_path(&self) -> Result<PathBuf> {
        let dir = match &self.data_dir {
            Some(dir) => dir.clone(),
            None => dirs::data_dir()
                .ok_or_else(|| anyhow::anyhow!("Could not determine data directory"))?
                .join(APP_DIR),
        };
        Ok(dir.join("library.json"))
    }

    /// Directory holding cached playables
    pub fn cache_path(&self) -> Result<PathBuf> {
        match &self.cache_dir {
            Some(dir) => Ok(dir.clone()),
            None => Ok(dirs::cache_dir()
                .ok_or_else(|| anyhow::anyhow!("Could not determine cache directory"))?
                .join(APP_DIR)
                .join("blobs")),
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs.max(1))
    }

    /// Server URL and username, or an error telling the user to authenticate
    pub fn server(&self) -> Result<(&str, &str)> {
        match (&self.server_url, &self.username) {
            (Some(url), Some(username)) => Ok((url, username)),
            _ => anyhow::bail!("No server configured. Run `ampsync auth` first."),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = AppConfig::load_from(&dir.path().join("config.json")).unwrap();
        assert_eq!(config, AppConfig::default());
        assert_eq!(config.request_timeout(), Duration::from_secs(30));
        assert!(config.server().is_err());
    }

    #[test]
    fn test_round_trip_and_paths() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.json");
        let config = AppConfig {
            server_url: Some("https://music.example".to_string()),
            username: Some("alice".to_string()),
            data_dir: Some(dir.path().join("data")),
            cache_dir: Some(dir.path().join("blobs")),
            ..Default::default()
        };
        config.save_to(&path).unwrap();

        let loaded = AppConfig::load_from(&path).unwrap();
        assert_eq!(loaded, config);
        assert_eq!(
            loaded.library_path().unwrap(),
            dir.path().join("data").join("library.json")
        );
        assert_eq!(loaded.cache_path().unwrap(), dir.path().join("blobs"));
        assert_eq!(loaded.server().unwrap(), ("https://music.example", "alice"));
    }

    #[test]
    fn test_partial_file_uses_field_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{"server_url": "https://m.example"}"#).unwrap();

        let config = AppConfig::load_from(&path).unwrap();
        assert_eq!(config.parallel_downloads, 4);
        assert_eq!(config.request_timeout_secs, 30);
        assert!(config.username.is_none());
    }
}
